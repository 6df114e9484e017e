//! End-to-end close protocol.
//!
//! The coordinator issues commands through the control plane and observes
//! convergence by polling node-local state with bounded waits. It holds no
//! locks across waits and keeps no state between calls, so a timed-out call
//! leaves nothing to clean up. Commands already sent are not rolled back.

use crate::config::WaitConfig;
use crate::datanode::Datanode;
use crate::scm::{PipelineInfo, StorageContainerManager};
use quay_core::{
    ContainerId, DatanodeId, LifeCycleState, PipelineId, QuayError, QuayResult, try_wait_for,
    wait_for,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Drives container close and pipeline teardown for one cluster.
#[derive(Debug, Clone)]
pub struct LifecycleCoordinator {
    scm: Arc<StorageContainerManager>,
    datanodes: Arc<BTreeMap<DatanodeId, Arc<Datanode>>>,
    wait: WaitConfig,
}

impl LifecycleCoordinator {
    /// Create a coordinator over a control plane and its datanodes.
    pub fn new(
        scm: Arc<StorageContainerManager>,
        datanodes: Arc<BTreeMap<DatanodeId, Arc<Datanode>>>,
        wait: WaitConfig,
    ) -> Self {
        Self {
            scm,
            datanodes,
            wait,
        }
    }

    /// The wait bounds in use.
    pub fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }

    // ==================== Lookups ====================

    /// Get a datanode handle.
    ///
    /// # Errors
    ///
    /// [`QuayError::DatanodeNotFound`] if the datanode is not in this cluster.
    pub fn datanode(&self, id: &DatanodeId) -> QuayResult<&Arc<Datanode>> {
        self.datanodes
            .get(id)
            .ok_or(QuayError::DatanodeNotFound(*id))
    }

    /// Handles of every pipeline member, in member order.
    pub fn datanodes_of(&self, pipeline: &PipelineInfo) -> QuayResult<Vec<Arc<Datanode>>> {
        pipeline
            .members
            .iter()
            .map(|id| self.datanode(id).cloned())
            .collect()
    }

    /// Resolve a container to its pipeline.
    ///
    /// # Errors
    ///
    /// [`QuayError::ContainerNotFound`] or [`QuayError::PipelineNotFound`]
    /// if either record is missing.
    pub fn pipeline_of(&self, container_id: &ContainerId) -> QuayResult<PipelineInfo> {
        let container = self.scm.get_container(container_id)?;
        self.scm.get_pipeline(&container.pipeline_id)
    }

    // ==================== Node-local queries ====================

    /// Whether the container has materialized on the datanode.
    pub fn is_container_present(&self, container_id: &ContainerId, datanode: &DatanodeId) -> bool {
        self.datanodes
            .get(datanode)
            .is_some_and(|dn| dn.containers().is_present(container_id))
    }

    /// Whether the datanode holds the container in CLOSED state.
    pub fn is_container_closed(&self, container_id: &ContainerId, datanode: &DatanodeId) -> bool {
        self.datanodes
            .get(datanode)
            .is_some_and(|dn| dn.containers().is_closed(container_id))
    }

    /// Number of datanodes holding a replica of the container.
    pub fn count_local_replicas(&self, container_id: &ContainerId) -> usize {
        self.datanodes
            .values()
            .filter(|dn| dn.containers().is_present(container_id))
            .count()
    }

    /// Replica count as the control plane sees it. Unknown containers count 0.
    pub fn count_replicas(&self, container_id: &ContainerId) -> usize {
        match self.scm.get_container_replicas(container_id) {
            Ok(replicas) => {
                let holders: Vec<String> = replicas.iter().map(|r| r.datanode.to_string()).collect();
                tracing::info!(
                    container_id = %container_id,
                    count = replicas.len(),
                    datanodes = ?holders,
                    "Container replicas"
                );
                replicas.len()
            }
            Err(e) => {
                tracing::warn!(container_id = %container_id, error = %e, "Container not found");
                0
            }
        }
    }

    // ==================== Waits ====================

    /// Wait until the control plane reports `count` replicas.
    pub async fn wait_for_replica_count(
        &self,
        container_id: &ContainerId,
        count: usize,
    ) -> QuayResult<()> {
        let what = format!("{container_id} to have {count} replicas");
        wait_for(&what, self.wait.replica_count, || {
            self.count_replicas(container_id) == count
        })
        .await
    }

    /// Wait until the control plane holds the container in `state`.
    ///
    /// A missing record counts as "not yet".
    pub async fn wait_for_scm_container_state(
        &self,
        container_id: &ContainerId,
        state: LifeCycleState,
    ) -> QuayResult<()> {
        let what = format!("{container_id} to be {state} in SCM");
        try_wait_for(&what, self.wait.scm_state, || {
            Ok(self.scm.get_container(container_id)?.state == state)
        })
        .await
    }

    /// Like [`Self::wait_for_scm_container_state`], but a missing record
    /// fails the wait immediately.
    pub async fn wait_for_container_state_strict(
        &self,
        container_id: &ContainerId,
        state: LifeCycleState,
    ) -> QuayResult<()> {
        let what = format!("{container_id} to be {state} in SCM");
        try_wait_for(&what, self.wait.scm_state_strict, || {
            match self.scm.get_container(container_id) {
                Ok(info) => Ok(info.state == state),
                Err(e) if e.is_not_found() => {
                    tracing::error!(container_id = %container_id, %state, "Container not found while waiting");
                    Err(e.abort(what.clone()))
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Wait until every former member has dropped each pipeline's group.
    pub async fn wait_for_pipelines_destroyed(&self, pipelines: &[PipelineInfo]) -> QuayResult<()> {
        for pipeline in pipelines {
            for dn in self.datanodes_of(pipeline)? {
                let what = format!("{} removed from datanode {}", pipeline.pipeline_id, dn.id());
                wait_for(&what, self.wait.pipeline_destroyed, || {
                    !dn.groups().is_exist(&pipeline.pipeline_id)
                })
                .await?;
            }
        }
        Ok(())
    }

    // ==================== Protocols ====================

    /// Close containers and wait until every pipeline member holds them CLOSED.
    ///
    /// Each container must materialize on every member first; one that is
    /// already CLOSED locally is an error.
    ///
    /// # Errors
    ///
    /// - `NotFound` if a container or its pipeline has no record
    /// - [`QuayError::UnexpectedContainerState`] if a replica is already CLOSED
    /// - [`QuayError::Timeout`] if a wait runs out
    pub async fn wait_for_container_close(&self, container_ids: &[ContainerId]) -> QuayResult<()> {
        let resolved = self.resolve(container_ids)?;

        for (container_id, pipeline) in &resolved {
            self.ensure_created(container_id, pipeline).await?;
            self.scm.close_container(container_id)?;
            tracing::info!(container_id = %container_id, "Close issued");
        }

        for (container_id, pipeline) in &resolved {
            self.wait_closed_on_members(container_id, pipeline, true)
                .await?;
        }
        Ok(())
    }

    /// Close the pipelines behind the containers and wait for their groups to
    /// disappear from every member.
    ///
    /// With `wait_for_creation`, each container must first materialize on
    /// every member. Without it, containers that were never written do not
    /// block the close.
    pub async fn wait_for_pipeline_close(
        &self,
        container_ids: &[ContainerId],
        wait_for_creation: bool,
    ) -> QuayResult<()> {
        let resolved = self.resolve(container_ids)?;

        if wait_for_creation {
            for (container_id, pipeline) in &resolved {
                self.ensure_created(container_id, pipeline).await?;
            }
        }

        self.close_pipelines(&unique_pipelines(&resolved)).await
    }

    /// Close pipelines and wait until their groups are gone from every member.
    pub async fn close_pipelines(&self, pipelines: &[PipelineInfo]) -> QuayResult<()> {
        for pipeline in pipelines {
            self.scm.close_pipeline(&pipeline.pipeline_id)?;
            tracing::info!(pipeline_id = %pipeline.pipeline_id, "Pipeline close issued");
        }
        self.wait_for_pipelines_destroyed(pipelines).await
    }

    /// Run the whole protocol: close containers, wait for CLOSED on every
    /// member, close their pipelines, wait for teardown.
    ///
    /// Without `wait_for_creation`, a member that never materialized a
    /// container counts as closed once the control plane has closed it.
    pub async fn close_and_teardown(
        &self,
        container_ids: &[ContainerId],
        wait_for_creation: bool,
    ) -> QuayResult<Vec<PipelineId>> {
        let resolved = self.resolve(container_ids)?;

        if wait_for_creation {
            for (container_id, pipeline) in &resolved {
                self.ensure_created(container_id, pipeline).await?;
            }
        }

        for (container_id, _) in &resolved {
            self.scm.close_container(container_id)?;
        }

        for (container_id, pipeline) in &resolved {
            self.wait_closed_on_members(container_id, pipeline, wait_for_creation)
                .await?;
        }

        let pipelines = unique_pipelines(&resolved);
        self.close_pipelines(&pipelines).await?;
        Ok(pipelines.into_iter().map(|p| p.pipeline_id).collect())
    }

    /// Join every member to the pipeline's group, ignoring failures.
    pub fn create_pipeline_on_datanodes(&self, pipeline: &PipelineInfo) {
        for member in &pipeline.members {
            let Some(dn) = self.datanodes.get(member) else {
                continue;
            };
            if let Err(e) = dn.add_group(pipeline.pipeline_id, &pipeline.members) {
                tracing::debug!(datanode = %member, error = %e, "Ignoring add group failure");
            }
        }
    }

    fn resolve(&self, container_ids: &[ContainerId]) -> QuayResult<Vec<(ContainerId, PipelineInfo)>> {
        let mut resolved: Vec<(ContainerId, PipelineInfo)> = Vec::with_capacity(container_ids.len());
        for id in container_ids {
            if resolved.iter().any(|(seen, _)| seen == id) {
                continue;
            }
            resolved.push((*id, self.pipeline_of(id)?));
        }
        Ok(resolved)
    }

    async fn ensure_created(&self, container_id: &ContainerId, pipeline: &PipelineInfo) -> QuayResult<()> {
        for dn in self.datanodes_of(pipeline)? {
            let what = format!("{container_id} present on datanode {}", dn.id());
            wait_for(&what, self.wait.container_present, || {
                dn.containers().is_present(container_id)
            })
            .await?;

            if dn.containers().is_closed(container_id) {
                return Err(QuayError::UnexpectedContainerState {
                    container_id: *container_id,
                    datanode: dn.id(),
                    state: LifeCycleState::Closed.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn wait_closed_on_members(
        &self,
        container_id: &ContainerId,
        pipeline: &PipelineInfo,
        creation_guaranteed: bool,
    ) -> QuayResult<()> {
        for dn in self.datanodes_of(pipeline)? {
            let what = format!("{container_id} closed on datanode {}", dn.id());
            try_wait_for(&what, self.wait.container_closed, || {
                if dn.containers().is_closed(container_id) {
                    return Ok(true);
                }
                if creation_guaranteed || dn.containers().is_present(container_id) {
                    return Ok(false);
                }
                Ok(self.scm.get_container(container_id)?.state == LifeCycleState::Closed)
            })
            .await?;
        }
        tracing::info!(container_id = %container_id, "Container closed on all members");
        Ok(())
    }
}

fn unique_pipelines(resolved: &[(ContainerId, PipelineInfo)]) -> Vec<PipelineInfo> {
    let mut pipelines: Vec<PipelineInfo> = Vec::new();
    for (_, pipeline) in resolved {
        if !pipelines.iter().any(|p| p.pipeline_id == pipeline.pipeline_id) {
            pipelines.push(pipeline.clone());
        }
    }
    pipelines
}
