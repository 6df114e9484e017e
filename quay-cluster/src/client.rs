//! Minimal write client.
//!
//! Writes go to every member of the container's pipeline, which is enough to
//! materialize replicas the way a replicated write would.

use crate::datanode::Datanode;
use crate::scm::{ContainerInfo, StorageContainerManager};
use quay_core::{ContainerId, DatanodeId, PipelineId, PollSpec, QuayError, QuayResult, try_wait_for};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Client that allocates containers and writes chunks into them.
#[derive(Debug, Clone)]
pub struct WriteClient {
    scm: Arc<StorageContainerManager>,
    datanodes: Arc<BTreeMap<DatanodeId, Arc<Datanode>>>,
    pipeline_ready: PollSpec,
}

impl WriteClient {
    /// Create a client. `pipeline_ready` bounds the wait for a new
    /// pipeline's groups to come up.
    pub fn new(
        scm: Arc<StorageContainerManager>,
        datanodes: Arc<BTreeMap<DatanodeId, Arc<Datanode>>>,
        pipeline_ready: PollSpec,
    ) -> Self {
        Self {
            scm,
            datanodes,
            pipeline_ready,
        }
    }

    /// Allocate a container without writing to it.
    pub fn allocate(&self, pipeline: Option<PipelineId>) -> QuayResult<ContainerInfo> {
        self.scm.allocate_container(pipeline)
    }

    /// Allocate a container and write one chunk to it.
    pub async fn create_and_write(&self, data: &[u8]) -> QuayResult<ContainerId> {
        let info = self.scm.allocate_container(None)?;
        self.write_chunk(&info.container_id, data).await?;
        Ok(info.container_id)
    }

    /// Write a chunk to every replica of a container.
    ///
    /// While the pipeline is OPEN the client waits for each member's group
    /// to come up. Once it is closing or gone, the write goes straight to the
    /// datanode and fails there.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the container has no record, or its pipeline has
    ///   been torn down
    /// - [`QuayError::GroupNotFound`] if a member has dropped the group
    /// - [`QuayError::ContainerNotOpen`] if a replica no longer accepts writes
    pub async fn write_chunk(&self, container_id: &ContainerId, data: &[u8]) -> QuayResult<()> {
        let container = self.scm.get_container(container_id)?;
        let pipeline_id = container.pipeline_id;
        let members = self.scm.get_pipeline(&pipeline_id)?.members;

        for member in &members {
            let dn = self
                .datanodes
                .get(member)
                .ok_or(QuayError::DatanodeNotFound(*member))?;
            self.await_group(dn, &pipeline_id).await?;
            dn.write_chunk(*container_id, pipeline_id, data).await?;
        }

        tracing::debug!(
            container_id = %container_id,
            pipeline_id = %pipeline_id,
            bytes = data.len(),
            replicas = members.len(),
            "Chunk written"
        );
        Ok(())
    }

    async fn await_group(&self, dn: &Datanode, pipeline_id: &PipelineId) -> QuayResult<()> {
        let what = format!("{pipeline_id} ready on datanode {}", dn.id());
        try_wait_for(&what, self.pipeline_ready, || {
            if dn.groups().is_exist(pipeline_id) {
                return Ok(true);
            }
            match self.scm.get_pipeline(pipeline_id) {
                Ok(pipeline) => Ok(!pipeline.is_open()),
                Err(_) => Ok(true),
            }
        })
        .await
    }
}
