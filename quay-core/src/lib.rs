//! Core building blocks shared by the quay control plane and storage nodes.
//!
//! This crate holds everything that both sides of the cluster agree on:
//!
//! - [`types`]: strongly-typed identifiers and lifecycle states
//! - [`error`]: the coded [`QuayError`] taxonomy
//! - [`poll`]: the bounded convergence poller every wait is built on
//! - [`observability`]: tracing subscriber setup
//! - [`testing`]: deterministic fault injection for the command channel
//!
//! # Example
//!
//! ```no_run
//! use quay_core::poll::{PollSpec, wait_for};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! # async fn demo() -> quay_core::QuayResult<()> {
//! let flag = Arc::new(AtomicBool::new(false));
//! let observed = Arc::clone(&flag);
//! wait_for("flag set", PollSpec::new(100, 5_000), move || {
//!     observed.load(Ordering::SeqCst)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod observability;
pub mod poll;
pub mod prelude;
pub mod testing;
pub mod types;

pub use error::{QuayError, QuayResult};
pub use poll::{PollSpec, try_wait_for, wait_for};
pub use types::{ContainerId, DatanodeId, LifeCycleState, PipelineId, PipelineState};
