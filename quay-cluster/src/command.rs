//! Commands sent from the control plane to datanodes.
//!
//! Delivery is at-least-once. A datanode must treat a repeated command as a
//! no-op, so every variant is idempotent on the receiving side.

use quay_core::{ContainerId, DatanodeId, PipelineId};
use serde::{Deserialize, Serialize};

/// A control-plane instruction for one datanode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatanodeCommand {
    // ==================== Pipeline Operations ====================
    /// Join the consensus group for a pipeline.
    CreatePipeline {
        /// Pipeline identifier.
        pipeline_id: PipelineId,
        /// Ordered member list, fixed for the life of the pipeline.
        members: Vec<DatanodeId>,
    },

    /// Leave and drop the consensus group for a pipeline.
    DestroyPipeline {
        /// Pipeline identifier.
        pipeline_id: PipelineId,
    },

    // ==================== Container Operations ====================
    /// Move the local replica of a container to CLOSED.
    CloseContainer {
        /// Container identifier.
        container_id: ContainerId,
        /// Pipeline the container was allocated on.
        pipeline_id: PipelineId,
    },
}

impl DatanodeCommand {
    /// Get a human-readable name for this command type.
    pub fn name(&self) -> &'static str {
        match self {
            DatanodeCommand::CreatePipeline { .. } => "CreatePipeline",
            DatanodeCommand::DestroyPipeline { .. } => "DestroyPipeline",
            DatanodeCommand::CloseContainer { .. } => "CloseContainer",
        }
    }

    /// Get the pipeline this command concerns.
    pub fn pipeline_id(&self) -> PipelineId {
        match self {
            DatanodeCommand::CreatePipeline { pipeline_id, .. }
            | DatanodeCommand::DestroyPipeline { pipeline_id }
            | DatanodeCommand::CloseContainer { pipeline_id, .. } => *pipeline_id,
        }
    }

    /// Get the container ID if this command is container-related.
    pub fn container_id(&self) -> Option<ContainerId> {
        match self {
            DatanodeCommand::CloseContainer { container_id, .. } => Some(*container_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let pipeline_id = PipelineId::new();
        let close = DatanodeCommand::CloseContainer {
            container_id: ContainerId::new(4),
            pipeline_id,
        };
        assert_eq!(close.name(), "CloseContainer");
        assert_eq!(close.pipeline_id(), pipeline_id);
        assert_eq!(close.container_id(), Some(ContainerId::new(4)));

        let destroy = DatanodeCommand::DestroyPipeline { pipeline_id };
        assert_eq!(destroy.name(), "DestroyPipeline");
        assert_eq!(destroy.container_id(), None);
    }
}
