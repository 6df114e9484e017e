//! Lifecycle states for containers and pipelines.
//!
//! Both state machines only ever move forward:
//!
//! ```text
//! OPEN ──► CLOSING ──► CLOSED
//!   └──────────────────▲
//! ```
//!
//! A datanode may observe a container go straight from OPEN to CLOSED (it
//! applied the close before the control plane saw it closing), so skipping
//! CLOSING is a legal forward move. Moving backwards never is.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a container, either authoritative (control plane) or
/// local (datanode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifeCycleState {
    /// Accepting writes.
    Open,
    /// Close requested; in-flight writes are being flushed.
    Closing,
    /// Immutable. Terminal.
    Closed,
}

impl LifeCycleState {
    /// Returns `true` once the container can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns `true` if the container accepts writes.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if moving to `next` is allowed.
    ///
    /// Staying in the same state is allowed (idempotent re-delivery).
    pub fn can_transition_to(&self, next: Self) -> bool {
        next >= *self
    }

    /// Upper-case name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for LifeCycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a pipeline as tracked by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Members host an active consensus group; containers may be allocated.
    Open,
    /// Teardown requested; waiting for containers to close and members to
    /// drop the group.
    Closing,
    /// Group destroyed on every member. Terminal.
    Closed,
}

impl PipelineState {
    /// Returns `true` once the pipeline has been destroyed everywhere.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns `true` if moving to `next` is allowed.
    pub fn can_transition_to(&self, next: Self) -> bool {
        next >= *self
    }

    /// Upper-case name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_states_only_move_forward() {
        use LifeCycleState::*;

        assert!(Open.can_transition_to(Closing));
        assert!(Open.can_transition_to(Closed));
        assert!(Closing.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Closed));

        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Closing));
        assert!(!Closing.can_transition_to(Open));
    }

    #[test]
    fn pipeline_states_only_move_forward() {
        use PipelineState::*;

        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Open));
        assert!(Closed.is_terminal());
        assert!(!Closing.is_terminal());
    }

    #[test]
    fn states_serialize_upper_case() {
        let json = serde_json::to_string(&LifeCycleState::Closing).unwrap();
        assert_eq!(json, "\"CLOSING\"");
        assert_eq!(PipelineState::Open.to_string(), "OPEN");
    }
}
