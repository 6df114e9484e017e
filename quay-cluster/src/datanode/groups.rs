//! Consensus group membership on one datanode.

use parking_lot::RwLock;
use quay_core::{DatanodeId, PipelineId, QuayError, QuayResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// An active consensus group.
///
/// Writes hold an `Arc` to the handle for their whole duration and apply
/// through [`GroupHandle::apply`]. Removal waits for an apply in progress,
/// and every apply after it fails.
#[derive(Debug)]
pub struct GroupHandle {
    pipeline_id: PipelineId,
    members: Vec<DatanodeId>,
    closed: RwLock<bool>,
}

impl GroupHandle {
    /// Pipeline this group serves.
    pub fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    /// Ordered member list.
    pub fn members(&self) -> &[DatanodeId] {
        &self.members
    }

    /// Whether the group has been removed.
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Run `f` unless the group has been removed. Returns `None` if it has.
    pub fn apply<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let closed = self.closed.read();
        if *closed {
            return None;
        }
        Some(f())
    }
}

/// Table of consensus groups hosted by a datanode.
#[derive(Debug)]
pub struct GroupTable {
    datanode: DatanodeId,
    groups: RwLock<HashMap<PipelineId, Arc<GroupHandle>>>,
    /// Pipelines destroyed here. They are never re-added.
    destroyed: RwLock<BTreeSet<PipelineId>>,
}

impl GroupTable {
    /// Create an empty table.
    pub fn new(datanode: DatanodeId) -> Self {
        Self {
            datanode,
            groups: RwLock::new(HashMap::new()),
            destroyed: RwLock::new(BTreeSet::new()),
        }
    }

    /// Join a group.
    ///
    /// Returns `Ok(true)` when the group was added, `Ok(false)` when it was
    /// already active with the same members or has been destroyed here.
    ///
    /// # Errors
    ///
    /// [`QuayError::GroupMembershipMismatch`] if the group is active with a
    /// different member list.
    pub fn add_group(&self, pipeline_id: PipelineId, members: &[DatanodeId]) -> QuayResult<bool> {
        let mut groups = self.groups.write();
        if let Some(existing) = groups.get(&pipeline_id) {
            if existing.members == members {
                return Ok(false);
            }
            return Err(QuayError::GroupMembershipMismatch {
                pipeline_id,
                datanode: self.datanode,
            });
        }

        if self.destroyed.read().contains(&pipeline_id) {
            tracing::debug!(
                datanode = %self.datanode,
                pipeline_id = %pipeline_id,
                "Ignoring add for destroyed group"
            );
            return Ok(false);
        }

        groups.insert(
            pipeline_id,
            Arc::new(GroupHandle {
                pipeline_id,
                members: members.to_vec(),
                closed: RwLock::new(false),
            }),
        );
        tracing::info!(
            datanode = %self.datanode,
            pipeline_id = %pipeline_id,
            members = members.len(),
            "Group added"
        );
        Ok(true)
    }

    /// Whether the group is active here.
    pub fn is_exist(&self, pipeline_id: &PipelineId) -> bool {
        self.groups.read().contains_key(pipeline_id)
    }

    /// Get the handle of an active group.
    ///
    /// # Errors
    ///
    /// [`QuayError::GroupNotFound`] if the group is not active.
    pub fn get(&self, pipeline_id: &PipelineId) -> QuayResult<Arc<GroupHandle>> {
        self.groups
            .read()
            .get(pipeline_id)
            .cloned()
            .ok_or(QuayError::GroupNotFound {
                pipeline_id: *pipeline_id,
                datanode: self.datanode,
            })
    }

    /// Drop a group. Repeated removals are no-ops.
    ///
    /// Returns `true` if the group was active.
    pub fn remove_group(&self, pipeline_id: &PipelineId) -> bool {
        let mut groups = self.groups.write();
        self.destroyed.write().insert(*pipeline_id);
        match groups.remove(pipeline_id) {
            Some(handle) => {
                *handle.closed.write() = true;
                tracing::info!(
                    datanode = %self.datanode,
                    pipeline_id = %pipeline_id,
                    "Group removed"
                );
                true
            }
            None => false,
        }
    }

    /// Active pipelines, ordered.
    pub fn active(&self) -> Vec<PipelineId> {
        let mut ids: Vec<_> = self.groups.read().keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<DatanodeId> {
        vec![DatanodeId::new(), DatanodeId::new(), DatanodeId::new()]
    }

    #[test]
    fn add_is_idempotent() {
        let table = GroupTable::new(DatanodeId::new());
        let pipeline = PipelineId::new();
        let members = members();

        assert!(table.add_group(pipeline, &members).unwrap());
        assert!(!table.add_group(pipeline, &members).unwrap());
        assert!(table.is_exist(&pipeline));
        assert_eq!(table.active(), vec![pipeline]);
    }

    #[test]
    fn add_with_other_members_is_rejected() {
        let table = GroupTable::new(DatanodeId::new());
        let pipeline = PipelineId::new();
        table.add_group(pipeline, &members()).unwrap();

        let err = table.add_group(pipeline, &members()).unwrap_err();
        assert!(matches!(err, QuayError::GroupMembershipMismatch { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn removed_group_fails_held_handles() {
        let table = GroupTable::new(DatanodeId::new());
        let pipeline = PipelineId::new();
        table.add_group(pipeline, &members()).unwrap();

        let handle = table.get(&pipeline).unwrap();
        assert!(!handle.is_closed());

        assert!(table.remove_group(&pipeline));
        assert!(!table.remove_group(&pipeline));
        assert!(handle.is_closed());
        assert!(!table.is_exist(&pipeline));
        assert!(matches!(
            table.get(&pipeline),
            Err(QuayError::GroupNotFound { .. })
        ));
    }

    #[test]
    fn removal_waits_for_apply_in_progress() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let table = Arc::new(GroupTable::new(DatanodeId::new()));
        let pipeline = PipelineId::new();
        table.add_group(pipeline, &members()).unwrap();
        let handle = table.get(&pipeline).unwrap();

        let applied = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let writer = {
            let handle = Arc::clone(&handle);
            let applied = Arc::clone(&applied);
            std::thread::spawn(move || {
                handle.apply(|| {
                    entered_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(100));
                    applied.store(true, Ordering::SeqCst);
                })
            })
        };

        entered_rx.recv().unwrap();
        assert!(table.remove_group(&pipeline));
        assert!(applied.load(Ordering::SeqCst), "Removal must not overtake an apply");
        assert_eq!(writer.join().unwrap(), Some(()));

        assert!(handle.apply(|| ()).is_none());
    }

    #[test]
    fn destroyed_group_is_never_re_added() {
        let table = GroupTable::new(DatanodeId::new());
        let pipeline = PipelineId::new();
        let members = members();
        table.add_group(pipeline, &members).unwrap();
        table.remove_group(&pipeline);

        assert!(!table.add_group(pipeline, &members).unwrap());
        assert!(!table.is_exist(&pipeline));
    }

    #[test]
    fn destroy_before_create_blocks_create() {
        let table = GroupTable::new(DatanodeId::new());
        let pipeline = PipelineId::new();

        assert!(!table.remove_group(&pipeline));
        assert!(!table.add_group(pipeline, &members()).unwrap());
        assert!(table.active().is_empty());
    }
}
