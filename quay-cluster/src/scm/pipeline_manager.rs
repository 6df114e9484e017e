//! Control-plane pipeline records.

use crate::report::DatanodeReport;
use parking_lot::RwLock;
use quay_core::{DatanodeId, PipelineId, PipelineState, QuayError, QuayResult};
use std::collections::{BTreeSet, HashMap};

/// Authoritative record of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInfo {
    /// Pipeline identifier.
    pub pipeline_id: PipelineId,
    /// Ordered member list, never resized.
    pub members: Vec<DatanodeId>,
    /// Control-plane status.
    pub state: PipelineState,
    /// Members whose latest report lists the group as active.
    pub hosted_on: BTreeSet<DatanodeId>,
    /// Members that have not yet confirmed the group is gone.
    pub pending_destroy: BTreeSet<DatanodeId>,
}

impl PipelineInfo {
    /// Replication factor.
    pub fn replication_factor(&self) -> usize {
        self.members.len()
    }

    /// Whether the pipeline accepts new containers.
    pub fn is_open(&self) -> bool {
        self.state == PipelineState::Open
    }
}

/// Pipeline records keyed by ID.
///
/// A record is removed once every member has confirmed the group is gone.
#[derive(Debug, Default)]
pub struct PipelineManager {
    pipelines: RwLock<HashMap<PipelineId, PipelineInfo>>,
}

impl PipelineManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new OPEN pipeline.
    pub fn create(&self, members: Vec<DatanodeId>) -> PipelineInfo {
        let info = PipelineInfo {
            pipeline_id: PipelineId::new(),
            members,
            state: PipelineState::Open,
            hosted_on: BTreeSet::new(),
            pending_destroy: BTreeSet::new(),
        };
        self.pipelines.write().insert(info.pipeline_id, info.clone());
        tracing::info!(
            pipeline_id = %info.pipeline_id,
            members = info.members.len(),
            "Pipeline created"
        );
        info
    }

    /// Get a pipeline record.
    ///
    /// # Errors
    ///
    /// [`QuayError::PipelineNotFound`] if unknown or already destroyed.
    pub fn get_pipeline(&self, id: &PipelineId) -> QuayResult<PipelineInfo> {
        self.pipelines
            .read()
            .get(id)
            .cloned()
            .ok_or(QuayError::PipelineNotFound(*id))
    }

    /// Run `f` against a pipeline while it is held OPEN.
    ///
    /// The record stays read-locked until `f` returns, so [`Self::begin_close`]
    /// either runs before the check or sees whatever `f` did. `f` must not
    /// call back into this manager.
    ///
    /// # Errors
    ///
    /// - [`QuayError::PipelineNotFound`] if unknown
    /// - [`QuayError::PipelineNotOpen`] if it no longer accepts containers
    pub fn while_open<T>(
        &self,
        id: &PipelineId,
        f: impl FnOnce(&PipelineInfo) -> T,
    ) -> QuayResult<T> {
        let pipelines = self.pipelines.read();
        let info = pipelines.get(id).ok_or(QuayError::PipelineNotFound(*id))?;
        if !info.is_open() {
            return Err(QuayError::PipelineNotOpen(*id));
        }
        Ok(f(info))
    }

    /// Like [`Self::while_open`], for any OPEN pipeline with the given
    /// replication factor. Returns `None` if there is none.
    pub fn while_any_open<T>(
        &self,
        replication_factor: usize,
        f: impl FnOnce(&PipelineInfo) -> T,
    ) -> Option<T> {
        let pipelines = self.pipelines.read();
        pipelines
            .values()
            .find(|p| p.is_open() && p.replication_factor() == replication_factor)
            .map(f)
    }

    /// Move OPEN to CLOSING.
    ///
    /// Returns `true` if the state changed.
    pub fn begin_close(&self, id: &PipelineId) -> QuayResult<bool> {
        let mut pipelines = self.pipelines.write();
        let info = pipelines
            .get_mut(id)
            .ok_or(QuayError::PipelineNotFound(*id))?;
        if info.state != PipelineState::Open {
            return Ok(false);
        }
        info.state = PipelineState::Closing;
        tracing::info!(pipeline_id = %id, "Pipeline CLOSING");
        Ok(true)
    }

    /// Move CLOSING to CLOSED and start waiting for every member to drop
    /// the group.
    ///
    /// Returns the updated record if the state changed.
    pub fn mark_closed(&self, id: &PipelineId) -> Option<PipelineInfo> {
        let mut pipelines = self.pipelines.write();
        let info = pipelines.get_mut(id)?;
        if info.state != PipelineState::Closing {
            return None;
        }
        info.state = PipelineState::Closed;
        info.pending_destroy = info.members.iter().copied().collect();
        tracing::info!(pipeline_id = %id, "Pipeline CLOSED, destroying groups");
        Some(info.clone())
    }

    /// Fold a datanode report into membership knowledge.
    ///
    /// Returns pipelines the datanode still hosts but that have no record,
    /// so their groups can be destroyed.
    pub fn process_report(&self, report: &DatanodeReport) -> Vec<PipelineId> {
        let mut pipelines = self.pipelines.write();
        for info in pipelines.values_mut() {
            if !info.members.contains(&report.datanode) {
                continue;
            }
            if report.hosts_pipeline(&info.pipeline_id) {
                info.hosted_on.insert(report.datanode);
            } else {
                info.hosted_on.remove(&report.datanode);
                if info.pending_destroy.remove(&report.datanode) {
                    tracing::debug!(
                        pipeline_id = %info.pipeline_id,
                        datanode = %report.datanode,
                        remaining = info.pending_destroy.len(),
                        "Group destroy confirmed"
                    );
                }
            }
        }

        report
            .pipelines
            .iter()
            .filter(|id| !pipelines.contains_key(*id))
            .copied()
            .collect()
    }

    /// Remove CLOSED records whose groups are gone from every member.
    pub fn finalize_destroyed(&self) -> Vec<PipelineId> {
        let mut pipelines = self.pipelines.write();
        let done: Vec<_> = pipelines
            .values()
            .filter(|p| p.state == PipelineState::Closed && p.pending_destroy.is_empty())
            .map(|p| p.pipeline_id)
            .collect();
        for id in &done {
            pipelines.remove(id);
            tracing::info!(pipeline_id = %id, "Pipeline destroyed");
        }
        done
    }

    /// Pipelines in a given state.
    pub fn pipelines_in_state(&self, state: PipelineState) -> Vec<PipelineInfo> {
        let mut list: Vec<_> = self
            .pipelines
            .read()
            .values()
            .filter(|p| p.state == state)
            .cloned()
            .collect();
        list.sort_by_key(|p| p.pipeline_id);
        list
    }

    /// Number of pipeline records.
    pub fn len(&self) -> usize {
        self.pipelines.read().len()
    }

    /// Whether there are no pipeline records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
