//! Commonly used types, re-exported for glob import.

pub use crate::error::{QuayError, QuayResult};
pub use crate::poll::{PollSpec, try_wait_for, wait_for};
pub use crate::types::{ContainerId, DatanodeId, LifeCycleState, PipelineId, PipelineState};
