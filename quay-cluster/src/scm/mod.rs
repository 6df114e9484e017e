//! The storage container manager (control plane).
//!
//! Owns the authoritative container and pipeline records. It never touches
//! datanode state directly: it sends commands through a [`CommandTransport`]
//! and learns what happened from [`DatanodeReport`]s.
//!
//! Two background tasks keep it moving:
//!
//! - the report loop folds reports into the records and advances
//!   CLOSING containers and pipelines
//! - housekeeping re-sends commands to members that have not converged
//!
//! # Pipeline teardown
//!
//! `close_pipeline` marks the pipeline CLOSING and closes its open containers.
//! Groups are destroyed only after every container of the pipeline is CLOSED,
//! so membership is never removed while a replica may still need it.

mod container_manager;
mod pipeline_manager;

pub use container_manager::{ContainerInfo, ContainerManager, ContainerReplica};
pub use pipeline_manager::{PipelineInfo, PipelineManager};

use crate::command::DatanodeCommand;
use crate::config::ScmConfig;
use crate::dispatch::CommandTransport;
use crate::report::DatanodeReport;
use parking_lot::{Mutex, RwLock};
use quay_core::{
    ContainerId, DatanodeId, LifeCycleState, PipelineId, PipelineState, QuayError, QuayResult,
};
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The control plane.
pub struct StorageContainerManager {
    config: ScmConfig,
    containers: ContainerManager,
    pipelines: PipelineManager,
    transport: Arc<dyn CommandTransport>,
    datanodes: RwLock<BTreeSet<DatanodeId>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StorageContainerManager {
    /// Create a control plane that sends commands through `transport`.
    pub fn new(config: ScmConfig, transport: Arc<dyn CommandTransport>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            containers: ContainerManager::new(),
            pipelines: PipelineManager::new(),
            transport,
            datanodes: RwLock::new(BTreeSet::new()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the report loop and housekeeping. Must run inside a tokio runtime.
    pub fn start(self: &Arc<Self>, reports: mpsc::UnboundedReceiver<DatanodeReport>) {
        let report_loop = tokio::spawn(Arc::clone(self).run_reports(reports, self.shutdown.subscribe()));
        let housekeeping = tokio::spawn(Arc::clone(self).run_housekeeping(self.shutdown.subscribe()));
        self.tasks.lock().extend([report_loop, housekeeping]);
        tracing::info!(transport = self.transport.name(), "SCM started");
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("SCM stopped");
    }

    // ==================== Datanodes ====================

    /// Make a datanode eligible for pipelines.
    pub fn register_datanode(&self, datanode: DatanodeId) {
        if self.datanodes.write().insert(datanode) {
            tracing::info!(datanode = %datanode, "Datanode registered");
        }
    }

    /// Registered datanodes, ordered.
    pub fn datanodes(&self) -> Vec<DatanodeId> {
        self.datanodes.read().iter().copied().collect()
    }

    /// Whether the datanode is registered.
    pub fn is_registered(&self, datanode: &DatanodeId) -> bool {
        self.datanodes.read().contains(datanode)
    }

    // ==================== Queries ====================

    /// Container records.
    pub fn container_manager(&self) -> &ContainerManager {
        &self.containers
    }

    /// Pipeline records.
    pub fn pipeline_manager(&self) -> &PipelineManager {
        &self.pipelines
    }

    /// Get a container record.
    pub fn get_container(&self, id: &ContainerId) -> QuayResult<ContainerInfo> {
        self.containers.get_container(id)
    }

    /// Replicas known from reports.
    pub fn get_container_replicas(&self, id: &ContainerId) -> QuayResult<Vec<ContainerReplica>> {
        self.containers.get_container_replicas(id)
    }

    /// Get a pipeline record.
    pub fn get_pipeline(&self, id: &PipelineId) -> QuayResult<PipelineInfo> {
        self.pipelines.get_pipeline(id)
    }

    // ==================== Allocation ====================

    /// Create a pipeline over `replication_factor` registered datanodes.
    ///
    /// # Errors
    ///
    /// [`QuayError::InsufficientDatanodes`] if not enough are registered.
    pub fn create_pipeline(&self, replication_factor: usize) -> QuayResult<PipelineInfo> {
        let available = self.datanodes();
        if replication_factor == 0 || replication_factor > available.len() {
            return Err(QuayError::InsufficientDatanodes {
                required: replication_factor,
                available: available.len(),
            });
        }

        let members: Vec<DatanodeId> = available
            .choose_multiple(&mut rand::thread_rng(), replication_factor)
            .copied()
            .collect();
        let info = self.pipelines.create(members);

        for member in &info.members {
            self.send(
                *member,
                DatanodeCommand::CreatePipeline {
                    pipeline_id: info.pipeline_id,
                    members: info.members.clone(),
                },
            );
        }
        Ok(info)
    }

    /// Allocate a container.
    ///
    /// With no pipeline given, an open pipeline of the configured replication
    /// factor is reused, or a new one is created.
    ///
    /// # Errors
    ///
    /// - [`QuayError::PipelineNotFound`] if the given pipeline is unknown
    /// - [`QuayError::PipelineNotOpen`] if it no longer accepts containers
    pub fn allocate_container(&self, pipeline: Option<PipelineId>) -> QuayResult<ContainerInfo> {
        // The container is inserted while the pipeline is held OPEN, so a
        // concurrent close_pipeline always finds it.
        let allocate = |p: &PipelineInfo| self.containers.allocate(p.pipeline_id);

        let info = match pipeline {
            Some(id) => self.pipelines.while_open(&id, allocate)?,
            None => {
                let rf = self.config.replication_factor;
                match self.pipelines.while_any_open(rf, allocate) {
                    Some(info) => info,
                    None => {
                        let created = self.create_pipeline(rf)?;
                        self.pipelines.while_open(&created.pipeline_id, allocate)?
                    }
                }
            }
        };

        tracing::info!(
            container_id = %info.container_id,
            pipeline_id = %info.pipeline_id,
            "Container allocated"
        );
        Ok(info)
    }

    // ==================== Lifecycle ====================

    /// Start closing a container. Fire-and-forget.
    ///
    /// OPEN moves to CLOSING and every pipeline member is told to close its
    /// replica. A CLOSING or CLOSED container is left unchanged.
    ///
    /// # Errors
    ///
    /// - [`QuayError::ContainerNotFound`] if there is no record
    /// - [`QuayError::PipelineNotFound`] if its pipeline is gone; the
    ///   container is left untouched
    pub fn close_container(&self, id: &ContainerId) -> QuayResult<()> {
        let info = self.containers.get_container(id)?;
        let pipeline = self.pipelines.get_pipeline(&info.pipeline_id)?;
        if !self.containers.begin_close(id)? {
            tracing::debug!(container_id = %id, state = %info.state, "Close ignored");
            return Ok(());
        }

        for member in &pipeline.members {
            self.send(
                *member,
                DatanodeCommand::CloseContainer {
                    container_id: *id,
                    pipeline_id: pipeline.pipeline_id,
                },
            );
        }
        Ok(())
    }

    /// Start closing a pipeline. Asynchronous.
    ///
    /// Open containers of the pipeline are closed. Groups are destroyed once
    /// all of them are CLOSED.
    ///
    /// # Errors
    ///
    /// [`QuayError::PipelineNotFound`] if there is no record.
    pub fn close_pipeline(&self, id: &PipelineId) -> QuayResult<()> {
        if self.pipelines.begin_close(id)? {
            for container in self.containers.containers_in(id) {
                if container.state == LifeCycleState::Open {
                    self.close_container(&container.container_id)?;
                }
            }
        }
        self.advance_pipeline(id);
        Ok(())
    }

    /// Fold a datanode report into the records.
    pub fn process_report(&self, report: &DatanodeReport) {
        for replica in &report.replicas {
            self.containers
                .update_replica(&replica.container_id, report.datanode, replica.state);
        }
        for container_id in &report.closed_absent {
            self.containers
                .update_closed_absent(container_id, report.datanode);
        }

        for stale in self.pipelines.process_report(report) {
            tracing::debug!(
                pipeline_id = %stale,
                datanode = %report.datanode,
                "Datanode hosts unknown pipeline"
            );
            self.send(
                report.datanode,
                DatanodeCommand::DestroyPipeline { pipeline_id: stale },
            );
        }

        self.reconcile();
    }

    /// Re-send commands to members that have not converged, then reconcile.
    pub fn housekeeping(&self) {
        for container in self.containers.containers_in_state(LifeCycleState::Closing) {
            let Ok(pipeline) = self.pipelines.get_pipeline(&container.pipeline_id) else {
                continue;
            };
            for member in pipeline.members.iter().filter(|m| !container.is_closed_on(m)) {
                self.send(
                    *member,
                    DatanodeCommand::CloseContainer {
                        container_id: container.container_id,
                        pipeline_id: pipeline.pipeline_id,
                    },
                );
            }
        }

        for pipeline in self.pipelines.pipelines_in_state(PipelineState::Open) {
            for member in pipeline
                .members
                .iter()
                .filter(|m| !pipeline.hosted_on.contains(m))
            {
                self.send(
                    *member,
                    DatanodeCommand::CreatePipeline {
                        pipeline_id: pipeline.pipeline_id,
                        members: pipeline.members.clone(),
                    },
                );
            }
        }

        for pipeline in self.pipelines.pipelines_in_state(PipelineState::Closed) {
            for member in &pipeline.pending_destroy {
                self.send(
                    *member,
                    DatanodeCommand::DestroyPipeline {
                        pipeline_id: pipeline.pipeline_id,
                    },
                );
            }
        }

        self.reconcile();
    }

    fn reconcile(&self) {
        for container in self.containers.containers_in_state(LifeCycleState::Closing) {
            if let Ok(pipeline) = self.pipelines.get_pipeline(&container.pipeline_id) {
                self.containers
                    .try_complete_close(&container.container_id, &pipeline.members);
            }
        }

        for pipeline in self.pipelines.pipelines_in_state(PipelineState::Closing) {
            self.advance_pipeline(&pipeline.pipeline_id);
        }

        self.pipelines.finalize_destroyed();
    }

    fn advance_pipeline(&self, id: &PipelineId) {
        let all_closed = self
            .containers
            .containers_in(id)
            .iter()
            .all(|c| c.state == LifeCycleState::Closed);
        if !all_closed {
            return;
        }

        if let Some(pipeline) = self.pipelines.mark_closed(id) {
            for member in &pipeline.members {
                self.send(*member, DatanodeCommand::DestroyPipeline { pipeline_id: *id });
            }
        }
    }

    fn send(&self, datanode: DatanodeId, command: DatanodeCommand) {
        let name = command.name();
        match self.transport.send(datanode, command) {
            Ok(()) => {
                tracing::trace!(datanode = %datanode, command = name, "Command sent");
            }
            Err(e) if e.is_transient() => {
                tracing::debug!(datanode = %datanode, command = name, error = %e, "Command not delivered");
            }
            Err(e) => {
                tracing::warn!(datanode = %datanode, command = name, error = %e, "Command failed");
            }
        }
    }

    async fn run_reports(
        self: Arc<Self>,
        mut reports: mpsc::UnboundedReceiver<DatanodeReport>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                report = reports.recv() => {
                    let Some(report) = report else { break };
                    self.process_report(&report);
                }
            }
        }
        tracing::debug!("SCM report loop exited");
    }

    async fn run_housekeeping(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.command_resend_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.housekeeping(),
            }
        }
        tracing::debug!("SCM housekeeping exited");
    }
}

impl std::fmt::Debug for StorageContainerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContainerManager")
            .field("datanodes", &self.datanodes.read().len())
            .field("containers", &self.containers.len())
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InProcessTransport;
    use crate::report::ReplicaReport;
    use std::time::Duration;

    struct Fixture {
        scm: Arc<StorageContainerManager>,
        inboxes: Vec<(DatanodeId, mpsc::UnboundedReceiver<DatanodeCommand>)>,
    }

    fn fixture(datanodes: usize) -> Fixture {
        let transport = Arc::new(InProcessTransport::reliable());
        let mut inboxes = Vec::new();
        for _ in 0..datanodes {
            let id = DatanodeId::new();
            inboxes.push((id, transport.register(id)));
        }
        let scm = StorageContainerManager::new(ScmConfig::default(), transport);
        for (id, _) in &inboxes {
            scm.register_datanode(*id);
        }
        Fixture { scm, inboxes }
    }

    fn drain(inbox: &mut mpsc::UnboundedReceiver<DatanodeCommand>) -> Vec<DatanodeCommand> {
        let mut commands = Vec::new();
        while let Ok(c) = inbox.try_recv() {
            commands.push(c);
        }
        commands
    }

    fn report_closed(scm: &StorageContainerManager, info: &ContainerInfo, members: &[DatanodeId]) {
        for member in members {
            scm.process_report(&DatanodeReport {
                datanode: *member,
                replicas: vec![ReplicaReport {
                    container_id: info.container_id,
                    pipeline_id: info.pipeline_id,
                    state: LifeCycleState::Closed,
                }],
                closed_absent: Vec::new(),
                pipelines: vec![info.pipeline_id],
            });
        }
    }

    #[test]
    fn pipeline_needs_enough_datanodes() {
        let f = fixture(2);
        let err = f.scm.create_pipeline(3).unwrap_err();
        assert!(matches!(
            err,
            QuayError::InsufficientDatanodes {
                required: 3,
                available: 2
            }
        ));
    }

    #[test]
    fn allocation_reuses_open_pipeline() {
        let mut f = fixture(3);
        let a = f.scm.allocate_container(None).unwrap();
        let b = f.scm.allocate_container(None).unwrap();
        assert_eq!(a.pipeline_id, b.pipeline_id);
        assert_eq!(f.scm.pipeline_manager().len(), 1);

        for (_, inbox) in &mut f.inboxes {
            let commands = drain(inbox);
            assert_eq!(commands.len(), 1);
            assert_eq!(commands[0].name(), "CreatePipeline");
        }
    }

    #[test]
    fn close_container_twice_sends_once() {
        let mut f = fixture(3);
        let info = f.scm.allocate_container(None).unwrap();
        for (_, inbox) in &mut f.inboxes {
            drain(inbox);
        }

        f.scm.close_container(&info.container_id).unwrap();
        f.scm.close_container(&info.container_id).unwrap();

        for (_, inbox) in &mut f.inboxes {
            let commands = drain(inbox);
            assert_eq!(commands.len(), 1);
            assert_eq!(commands[0].container_id(), Some(info.container_id));
        }
    }

    #[test]
    fn close_unknown_container_is_not_found() {
        let f = fixture(1);
        let err = f.scm.close_container(&ContainerId::new(99)).unwrap_err();
        assert!(matches!(err, QuayError::ContainerNotFound(_)));
    }

    #[test]
    fn pipeline_teardown_waits_for_container_closure() {
        let mut f = fixture(3);
        let info = f.scm.allocate_container(None).unwrap();
        let members = f.scm.get_pipeline(&info.pipeline_id).unwrap().members;
        for (_, inbox) in &mut f.inboxes {
            drain(inbox);
        }

        f.scm.close_pipeline(&info.pipeline_id).unwrap();
        let pipeline = f.scm.get_pipeline(&info.pipeline_id).unwrap();
        assert_eq!(pipeline.state, PipelineState::Closing);
        for (_, inbox) in &mut f.inboxes {
            let names: Vec<_> = drain(inbox).iter().map(|c| c.name()).collect();
            assert_eq!(names, vec!["CloseContainer"]);
        }

        report_closed(&f.scm, &info, &members[..2]);
        assert_eq!(
            f.scm.get_container(&info.container_id).unwrap().state,
            LifeCycleState::Closing
        );
        for (_, inbox) in &mut f.inboxes {
            assert!(drain(inbox).is_empty());
        }

        report_closed(&f.scm, &info, &members[2..]);
        assert_eq!(
            f.scm.get_container(&info.container_id).unwrap().state,
            LifeCycleState::Closed
        );
        assert_eq!(
            f.scm.get_pipeline(&info.pipeline_id).unwrap().state,
            PipelineState::Closed
        );
        for (_, inbox) in &mut f.inboxes {
            let names: Vec<_> = drain(inbox).iter().map(|c| c.name()).collect();
            assert_eq!(names, vec!["DestroyPipeline"]);
        }
    }

    #[test]
    fn closed_pipeline_rejects_allocation() {
        let f = fixture(3);
        let pipeline = f.scm.create_pipeline(3).unwrap();
        f.scm.close_pipeline(&pipeline.pipeline_id).unwrap();

        // No containers, so teardown starts immediately.
        let state = f.scm.get_pipeline(&pipeline.pipeline_id).unwrap().state;
        assert_eq!(state, PipelineState::Closed);

        let err = f
            .scm
            .allocate_container(Some(pipeline.pipeline_id))
            .unwrap_err();
        assert!(matches!(err, QuayError::PipelineNotOpen(_)));
    }

    #[test]
    fn pipeline_close_waits_for_allocation_in_flight() {
        let mut f = fixture(3);
        let id = f.scm.create_pipeline(3).unwrap().pipeline_id;
        for (_, inbox) in &mut f.inboxes {
            drain(inbox);
        }

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let scm = Arc::clone(&f.scm);
        let allocating = std::thread::spawn(move || {
            scm.pipelines.while_open(&id, |p| {
                entered_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                scm.containers.allocate(p.pipeline_id)
            })
        });

        entered_rx.recv().unwrap();
        f.scm.close_pipeline(&id).unwrap();
        let info = allocating.join().unwrap().unwrap();

        // The sweep saw the new container and started closing it.
        assert_eq!(
            f.scm.get_container(&info.container_id).unwrap().state,
            LifeCycleState::Closing
        );
        assert_eq!(f.scm.get_pipeline(&id).unwrap().state, PipelineState::Closing);
        for (_, inbox) in &mut f.inboxes {
            let names: Vec<_> = drain(inbox).iter().map(|c| c.name()).collect();
            assert_eq!(names, vec!["CloseContainer"]);
        }
    }

    #[test]
    fn concurrent_allocation_never_strands_open_container() {
        for _ in 0..50 {
            let f = fixture(3);
            let id = f.scm.create_pipeline(3).unwrap().pipeline_id;

            let workers: Vec<_> = (0..4)
                .map(|_| {
                    let scm = Arc::clone(&f.scm);
                    std::thread::spawn(move || {
                        for _ in 0..20 {
                            let _ = scm.allocate_container(Some(id));
                        }
                    })
                })
                .collect();
            f.scm.close_pipeline(&id).unwrap();
            for worker in workers {
                worker.join().unwrap();
            }

            for container in f.scm.container_manager().containers_in(&id) {
                assert_ne!(container.state, LifeCycleState::Open);
            }
        }
    }

    #[test]
    fn close_with_missing_pipeline_leaves_container_open() {
        let f = fixture(3);
        let orphan = f.scm.container_manager().allocate(PipelineId::new());

        let err = f.scm.close_container(&orphan.container_id).unwrap_err();
        assert!(matches!(err, QuayError::PipelineNotFound(_)));
        assert_eq!(
            f.scm.get_container(&orphan.container_id).unwrap().state,
            LifeCycleState::Open
        );
    }

    #[test]
    fn housekeeping_resends_to_unconverged_members() {
        let mut f = fixture(3);
        let info = f.scm.allocate_container(None).unwrap();
        let members = f.scm.get_pipeline(&info.pipeline_id).unwrap().members;
        f.scm.close_container(&info.container_id).unwrap();
        report_closed(&f.scm, &info, &members[..1]);
        for (_, inbox) in &mut f.inboxes {
            drain(inbox);
        }

        f.scm.housekeeping();

        for (id, inbox) in &mut f.inboxes {
            let close_count = drain(inbox)
                .iter()
                .filter(|c| c.name() == "CloseContainer")
                .count();
            let expected = if *id == members[0] { 0 } else { 1 };
            assert_eq!(close_count, expected);
        }
    }
}
