//! Error types for quay.
//!
//! Every error carries the identifiers needed to act on it. Codes group the
//! failure classes so a caller can tell "this never existed" (`E0xx`) apart
//! from "this is taking too long" (`E1xx`) at a glance.

use crate::types::{ContainerId, DatanodeId, PipelineId};
use thiserror::Error;

/// Result type for quay operations.
pub type QuayResult<T> = std::result::Result<T, QuayError>;

/// The main error type for quay operations.
#[derive(Error, Debug)]
pub enum QuayError {
    // =========================================================================
    // Lookup Errors (E001-E099)
    // =========================================================================
    /// The control plane has no record of the container.
    #[error("E001: Container {0} not found")]
    ContainerNotFound(ContainerId),

    /// The control plane has no record of the pipeline.
    #[error("E002: Pipeline {0} not found")]
    PipelineNotFound(PipelineId),

    /// The datanode is not part of this cluster.
    #[error("E003: Datanode {0} not found")]
    DatanodeNotFound(DatanodeId),

    // =========================================================================
    // Convergence Errors (E100-E199)
    // =========================================================================
    /// A condition did not become true within its bound.
    #[error("E101: Timed out after {timeout_ms}ms ({attempts} checks) waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// The bound that elapsed.
        timeout_ms: u64,
        /// How many times the condition was evaluated.
        attempts: u32,
    },

    /// A wait was abandoned because its check reported a hard failure.
    #[error("E102: Wait for {what} aborted: {source}")]
    Aborted {
        /// What was being waited for.
        what: String,
        /// The failure that ended the wait.
        #[source]
        source: Box<QuayError>,
    },

    // =========================================================================
    // Lifecycle Errors (E200-E299)
    // =========================================================================
    /// A state machine was asked to move backwards.
    #[error("E201: Invalid {entity} transition {from} -> {to}")]
    InvalidTransition {
        /// "container" or "pipeline".
        entity: &'static str,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// A write reached a container that no longer accepts writes.
    #[error("E202: Container {container_id} is not open on datanode {datanode} (state {state})")]
    ContainerNotOpen {
        /// The container.
        container_id: ContainerId,
        /// The datanode that rejected the write.
        datanode: DatanodeId,
        /// The local state, or "CLOSED_BEFORE_CREATE".
        state: String,
    },

    /// A datanode holds a container in a state the caller did not expect.
    #[error("E203: Container {container_id} on datanode {datanode} is unexpectedly {state}")]
    UnexpectedContainerState {
        /// The container.
        container_id: ContainerId,
        /// The datanode holding it.
        datanode: DatanodeId,
        /// The local state observed.
        state: String,
    },

    /// The consensus group is not (or no longer) active on the datanode.
    #[error("E210: Pipeline group {pipeline_id} is not active on datanode {datanode}")]
    GroupNotFound {
        /// The pipeline.
        pipeline_id: PipelineId,
        /// The datanode.
        datanode: DatanodeId,
    },

    /// A group was re-added with a different member list.
    #[error("E211: Pipeline group {pipeline_id} already exists on datanode {datanode} with different members")]
    GroupMembershipMismatch {
        /// The pipeline.
        pipeline_id: PipelineId,
        /// The datanode.
        datanode: DatanodeId,
    },

    /// Not enough healthy datanodes to form a pipeline.
    #[error("E212: Pipeline needs {required} healthy datanodes, only {available} available")]
    InsufficientDatanodes {
        /// Replication factor requested.
        required: usize,
        /// Healthy datanodes known to the control plane.
        available: usize,
    },

    /// The pipeline is no longer accepting new containers.
    #[error("E213: Pipeline {0} is not open")]
    PipelineNotOpen(PipelineId),

    // =========================================================================
    // Command Channel Errors (E300-E399)
    // =========================================================================
    /// A command could not be handed to a datanode.
    #[error("E301: Failed to deliver {command} to datanode {datanode}: {cause}")]
    CommandDelivery {
        /// Command name.
        command: &'static str,
        /// Target datanode.
        datanode: DatanodeId,
        /// Reason for the failure.
        cause: String,
    },

    /// An internal channel was closed (component shut down).
    #[error("E302: Channel to {0} is closed")]
    ChannelClosed(String),

    // =========================================================================
    // Configuration / IO Errors (E900-E999)
    // =========================================================================
    /// Invalid configuration.
    #[error("E901: Configuration error: {0}")]
    Config(String),

    /// Failed to encode or decode configuration or reports.
    #[error("E902: Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("E903: IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuayError {
    /// Returns `true` if the control plane has no record of the entity.
    ///
    /// Looks through [`QuayError::Aborted`] so a strict wait that gave up on
    /// a missing record still reads as "not found".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ContainerNotFound(_) | Self::PipelineNotFound(_) | Self::DatanodeNotFound(_) => {
                true
            }
            Self::Aborted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Returns `true` if a wait ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` for failures that later convergence polling may repair.
    ///
    /// These are ignored by fire-and-forget call sites.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CommandDelivery { .. } | Self::GroupMembershipMismatch { .. }
        )
    }

    /// Wrap this error as the reason a wait was abandoned.
    pub fn abort(self, what: impl Into<String>) -> Self {
        Self::Aborted {
            what: what.into(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinct_from_timeout() {
        let missing = QuayError::ContainerNotFound(ContainerId::new(1));
        let slow = QuayError::Timeout {
            what: "container_1 closed".into(),
            timeout_ms: 15_000,
            attempts: 30,
        };

        assert!(missing.is_not_found());
        assert!(!missing.is_timeout());
        assert!(slow.is_timeout());
        assert!(!slow.is_not_found());
    }

    #[test]
    fn aborted_wait_keeps_not_found() {
        let err = QuayError::ContainerNotFound(ContainerId::new(3)).abort("state CLOSED");
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("E102"));
    }

    #[test]
    fn error_messages_carry_codes() {
        let err = QuayError::PipelineNotFound(PipelineId::new());
        assert!(err.to_string().starts_with("E002"));

        let err = QuayError::CommandDelivery {
            command: "CloseContainer",
            datanode: DatanodeId::new(),
            cause: "unreachable".into(),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("CloseContainer"));
    }
}
