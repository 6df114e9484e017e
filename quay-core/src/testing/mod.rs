//! Fault injection for cluster tests.
//!
//! The command channel between the control plane and datanodes consults a
//! [`ChaosEngine`] before each delivery, so tests can drop, refuse, or delay
//! commands and check that re-delivery still drives the cluster to convergence.

pub mod chaos;

pub use chaos::{ChaosConfig, ChaosEngine, ChaosFault};
