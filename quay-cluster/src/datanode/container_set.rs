//! Node-local container registry.

use parking_lot::RwLock;
use quay_core::{ContainerId, DatanodeId, LifeCycleState, PipelineId, QuayError, QuayResult};
use std::collections::{BTreeSet, HashMap};

/// Local state of one container replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerData {
    /// Container identifier.
    pub container_id: ContainerId,
    /// Pipeline the replica was written through.
    pub pipeline_id: PipelineId,
    /// Local lifecycle state.
    pub state: LifeCycleState,
    /// Bytes accepted so far.
    pub bytes_used: u64,
    /// Number of accepted writes.
    pub write_count: u64,
}

/// What a close command did to the local registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The replica moved to CLOSED.
    Closed,
    /// The replica was already CLOSED.
    AlreadyClosed,
    /// The container never materialized here; a tombstone now blocks it.
    Tombstoned,
}

/// Registry of container replicas on one datanode.
///
/// Local state only moves forward (OPEN -> CLOSING -> CLOSED). Reads take a
/// shared lock and return snapshots.
#[derive(Debug)]
pub struct ContainerSet {
    datanode: DatanodeId,
    containers: RwLock<HashMap<ContainerId, ContainerData>>,
    /// Containers closed before their first write.
    tombstones: RwLock<BTreeSet<ContainerId>>,
}

impl ContainerSet {
    /// Create an empty registry for a datanode.
    pub fn new(datanode: DatanodeId) -> Self {
        Self {
            datanode,
            containers: RwLock::new(HashMap::new()),
            tombstones: RwLock::new(BTreeSet::new()),
        }
    }

    /// Get a snapshot of a container replica.
    pub fn get_container(&self, id: &ContainerId) -> Option<ContainerData> {
        self.containers.read().get(id).cloned()
    }

    /// Whether the container has materialized here.
    pub fn is_present(&self, id: &ContainerId) -> bool {
        self.containers.read().contains_key(id)
    }

    /// Whether the local replica is CLOSED. False when absent.
    pub fn is_closed(&self, id: &ContainerId) -> bool {
        self.containers
            .read()
            .get(id)
            .is_some_and(|c| c.state == LifeCycleState::Closed)
    }

    /// Accept a write, materializing the container on first use.
    pub fn write(&self, id: ContainerId, pipeline_id: PipelineId, len: u64) -> QuayResult<()> {
        // Lock order: containers, then tombstones.
        let mut containers = self.containers.write();
        if !containers.contains_key(&id) && self.tombstones.read().contains(&id) {
            return Err(QuayError::ContainerNotOpen {
                container_id: id,
                datanode: self.datanode,
                state: "CLOSED_BEFORE_CREATE".to_string(),
            });
        }

        let container = containers.entry(id).or_insert_with(|| {
            tracing::debug!(
                datanode = %self.datanode,
                container_id = %id,
                pipeline_id = %pipeline_id,
                "Container created"
            );
            ContainerData {
                container_id: id,
                pipeline_id,
                state: LifeCycleState::Open,
                bytes_used: 0,
                write_count: 0,
            }
        });

        if !container.state.is_open() {
            return Err(QuayError::ContainerNotOpen {
                container_id: id,
                datanode: self.datanode,
                state: container.state.to_string(),
            });
        }

        container.bytes_used += len;
        container.write_count += 1;
        Ok(())
    }

    /// Close the local replica, or tombstone it if it never materialized.
    ///
    /// Repeated closes are no-ops.
    pub fn close(&self, id: ContainerId) -> CloseOutcome {
        let mut containers = self.containers.write();
        match containers.get_mut(&id) {
            Some(container) if container.state == LifeCycleState::Closed => {
                CloseOutcome::AlreadyClosed
            }
            Some(container) => {
                // Flushes are synchronous in-process, so CLOSING is transient.
                for next in [LifeCycleState::Closing, LifeCycleState::Closed] {
                    if container.state < next && container.state.can_transition_to(next) {
                        tracing::debug!(
                            datanode = %self.datanode,
                            container_id = %id,
                            from = %container.state,
                            to = %next,
                            "Container state change"
                        );
                        container.state = next;
                    }
                }
                CloseOutcome::Closed
            }
            None => {
                if self.tombstones.write().insert(id) {
                    tracing::debug!(
                        datanode = %self.datanode,
                        container_id = %id,
                        "Close for absent container, tombstoned"
                    );
                }
                CloseOutcome::Tombstoned
            }
        }
    }

    /// Snapshot of all replicas, ordered by container.
    pub fn replicas(&self) -> Vec<ContainerData> {
        let mut replicas: Vec<_> = self.containers.read().values().cloned().collect();
        replicas.sort_by_key(|c| c.container_id);
        replicas
    }

    /// Containers closed before they ever materialized.
    pub fn tombstones(&self) -> Vec<ContainerId> {
        self.tombstones.read().iter().copied().collect()
    }

    /// Number of materialized replicas.
    pub fn len(&self) -> usize {
        self.containers.read().len()
    }

    /// Whether no replica has materialized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> ContainerSet {
        ContainerSet::new(DatanodeId::new())
    }

    #[test]
    fn absent_container_is_not_closed() {
        let set = set();
        let id = ContainerId::new(1);
        assert!(set.get_container(&id).is_none());
        assert!(!set.is_present(&id));
        assert!(!set.is_closed(&id));
    }

    #[test]
    fn write_materializes_open_container() {
        let set = set();
        let id = ContainerId::new(1);
        set.write(id, PipelineId::new(), 64).unwrap();
        set.write(id, PipelineId::new(), 64).unwrap();

        let data = set.get_container(&id).unwrap();
        assert_eq!(data.state, LifeCycleState::Open);
        assert_eq!(data.bytes_used, 128);
        assert_eq!(data.write_count, 2);
        assert!(set.is_present(&id));
        assert!(!set.is_closed(&id));
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let set = set();
        let id = ContainerId::new(7);
        set.write(id, PipelineId::new(), 1).unwrap();

        assert_eq!(set.close(id), CloseOutcome::Closed);
        assert_eq!(set.close(id), CloseOutcome::AlreadyClosed);
        assert!(set.is_closed(&id));

        let err = set.write(id, PipelineId::new(), 1).unwrap_err();
        assert!(matches!(err, QuayError::ContainerNotOpen { ref state, .. } if state == "CLOSED"));
        assert!(set.is_closed(&id));
    }

    #[test]
    fn close_before_create_blocks_later_writes() {
        let set = set();
        let id = ContainerId::new(9);

        assert_eq!(set.close(id), CloseOutcome::Tombstoned);
        assert_eq!(set.close(id), CloseOutcome::Tombstoned);
        assert_eq!(set.tombstones(), vec![id]);

        let err = set.write(id, PipelineId::new(), 1).unwrap_err();
        assert!(
            matches!(err, QuayError::ContainerNotOpen { ref state, .. } if state == "CLOSED_BEFORE_CREATE")
        );
        assert!(!set.is_present(&id));
        assert!(set.is_empty());
    }
}
