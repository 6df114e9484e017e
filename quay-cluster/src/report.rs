//! Datanode reports.
//!
//! Reports are the only path from datanodes back to the control plane. The
//! control plane derives replica sets, container closure and pipeline teardown
//! from them; it never reads datanode memory.

use quay_core::{ContainerId, DatanodeId, LifeCycleState, PipelineId};
use serde::{Deserialize, Serialize};

/// A datanode's local view of one container replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaReport {
    /// Container identifier.
    pub container_id: ContainerId,
    /// Pipeline the replica was written through.
    pub pipeline_id: PipelineId,
    /// Local lifecycle state.
    pub state: LifeCycleState,
}

/// Full state report of one datanode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatanodeReport {
    /// Reporting datanode.
    pub datanode: DatanodeId,
    /// Every materialized container replica.
    pub replicas: Vec<ReplicaReport>,
    /// Containers closed on this datanode before they were ever written.
    pub closed_absent: Vec<ContainerId>,
    /// Pipelines whose consensus group is active on this datanode.
    pub pipelines: Vec<PipelineId>,
}

impl DatanodeReport {
    /// Whether the report lists the pipeline as active.
    pub fn hosts_pipeline(&self, pipeline_id: &PipelineId) -> bool {
        self.pipelines.contains(pipeline_id)
    }
}
