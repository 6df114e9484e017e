//! Control-plane container records.

use parking_lot::RwLock;
use quay_core::{ContainerId, DatanodeId, LifeCycleState, PipelineId, QuayError, QuayResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// A replica as last reported by its datanode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerReplica {
    /// Datanode holding the replica.
    pub datanode: DatanodeId,
    /// Reported local state.
    pub state: LifeCycleState,
}

/// Authoritative record of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Container identifier.
    pub container_id: ContainerId,
    /// Owning pipeline, fixed at allocation.
    pub pipeline_id: PipelineId,
    /// Control-plane lifecycle state.
    pub state: LifeCycleState,
    /// Replicas known from reports.
    pub replicas: BTreeMap<DatanodeId, LifeCycleState>,
    /// Datanodes that acknowledged a close without holding a replica.
    pub closed_absent: BTreeSet<DatanodeId>,
}

impl ContainerInfo {
    /// Whether the datanode has confirmed closure, as a replica or a tombstone.
    pub fn is_closed_on(&self, datanode: &DatanodeId) -> bool {
        self.replicas.get(datanode) == Some(&LifeCycleState::Closed)
            || self.closed_absent.contains(datanode)
    }
}

/// Container records keyed by ID. Records are never deleted.
#[derive(Debug)]
pub struct ContainerManager {
    containers: RwLock<HashMap<ContainerId, ContainerInfo>>,
    next_id: AtomicU64,
}

impl Default for ContainerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerManager {
    /// Create an empty manager. IDs start at 1.
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a new OPEN container on a pipeline.
    pub fn allocate(&self, pipeline_id: PipelineId) -> ContainerInfo {
        let container_id = ContainerId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let info = ContainerInfo {
            container_id,
            pipeline_id,
            state: LifeCycleState::Open,
            replicas: BTreeMap::new(),
            closed_absent: BTreeSet::new(),
        };
        self.containers.write().insert(container_id, info.clone());
        info
    }

    /// Get a container record.
    ///
    /// # Errors
    ///
    /// [`QuayError::ContainerNotFound`] if no record exists.
    pub fn get_container(&self, id: &ContainerId) -> QuayResult<ContainerInfo> {
        self.containers
            .read()
            .get(id)
            .cloned()
            .ok_or(QuayError::ContainerNotFound(*id))
    }

    /// Replicas known from reports, ordered by datanode.
    ///
    /// # Errors
    ///
    /// [`QuayError::ContainerNotFound`] if no record exists.
    pub fn get_container_replicas(&self, id: &ContainerId) -> QuayResult<Vec<ContainerReplica>> {
        let containers = self.containers.read();
        let info = containers.get(id).ok_or(QuayError::ContainerNotFound(*id))?;
        Ok(info
            .replicas
            .iter()
            .map(|(datanode, state)| ContainerReplica {
                datanode: *datanode,
                state: *state,
            })
            .collect())
    }

    /// Move OPEN to CLOSING.
    ///
    /// Returns `true` if the state changed; CLOSING and CLOSED are left alone.
    pub fn begin_close(&self, id: &ContainerId) -> QuayResult<bool> {
        let mut containers = self.containers.write();
        let info = containers
            .get_mut(id)
            .ok_or(QuayError::ContainerNotFound(*id))?;
        if info.state != LifeCycleState::Open {
            return Ok(false);
        }
        info.state = LifeCycleState::Closing;
        tracing::info!(container_id = %id, "Container CLOSING");
        Ok(true)
    }

    /// Record a replica state from a report. Unknown containers are ignored.
    pub fn update_replica(&self, id: &ContainerId, datanode: DatanodeId, state: LifeCycleState) {
        if let Some(info) = self.containers.write().get_mut(id) {
            let previous = info.replicas.insert(datanode, state);
            if previous != Some(state) {
                tracing::debug!(
                    container_id = %id,
                    datanode = %datanode,
                    state = %state,
                    "Replica updated"
                );
            }
        }
    }

    /// Record a close acknowledgement for a container the datanode never held.
    pub fn update_closed_absent(&self, id: &ContainerId, datanode: DatanodeId) {
        if let Some(info) = self.containers.write().get_mut(id) {
            info.closed_absent.insert(datanode);
        }
    }

    /// Move CLOSING to CLOSED once every member has confirmed closure.
    ///
    /// Returns `true` if the state changed.
    pub fn try_complete_close(&self, id: &ContainerId, members: &[DatanodeId]) -> bool {
        let mut containers = self.containers.write();
        let Some(info) = containers.get_mut(id) else {
            return false;
        };
        if info.state != LifeCycleState::Closing {
            return false;
        }
        if !members.iter().all(|m| info.is_closed_on(m)) {
            return false;
        }
        info.state = LifeCycleState::Closed;
        tracing::info!(
            container_id = %id,
            replicas = info.replicas.len(),
            "Container CLOSED"
        );
        true
    }

    /// Containers allocated on a pipeline, ordered by ID.
    pub fn containers_in(&self, pipeline_id: &PipelineId) -> Vec<ContainerInfo> {
        let mut list: Vec<_> = self
            .containers
            .read()
            .values()
            .filter(|c| &c.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        list.sort_by_key(|c| c.container_id);
        list
    }

    /// Containers in a given state, ordered by ID.
    pub fn containers_in_state(&self, state: LifeCycleState) -> Vec<ContainerInfo> {
        let mut list: Vec<_> = self
            .containers
            .read()
            .values()
            .filter(|c| c.state == state)
            .cloned()
            .collect();
        list.sort_by_key(|c| c.container_id);
        list
    }

    /// Number of container records.
    pub fn len(&self) -> usize {
        self.containers.read().len()
    }

    /// Whether no container has been allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
