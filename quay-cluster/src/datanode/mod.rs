//! Storage node.
//!
//! A datanode owns two local stores, its [`ContainerSet`] and its
//! [`GroupTable`]. It runs two tasks:
//!
//! - the command loop applies control-plane commands from its inbox
//! - the reporter sends a [`DatanodeReport`] every report interval, and
//!   right after each applied command
//!
//! Outside the command loop, the stores change only through the write path
//! and explicit group joins. Everything else reads them through the
//! side-effect free accessors.

mod container_set;
mod groups;

pub use container_set::{CloseOutcome, ContainerData, ContainerSet};
pub use groups::{GroupHandle, GroupTable};

use crate::command::DatanodeCommand;
use crate::config::DatanodeConfig;
use crate::report::{DatanodeReport, ReplicaReport};
use parking_lot::Mutex;
use quay_core::{ContainerId, DatanodeId, PipelineId, QuayError, QuayResult};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A running storage node.
pub struct Datanode {
    id: DatanodeId,
    config: DatanodeConfig,
    containers: ContainerSet,
    groups: GroupTable,
    running: AtomicBool,
    report_now: Notify,
    shutdown: watch::Sender<bool>,
    commands_applied: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Datanode {
    /// Start a datanode.
    ///
    /// Commands are read from `inbox`; reports go to `reports`. Must be
    /// called from within a tokio runtime.
    pub fn start(
        id: DatanodeId,
        config: DatanodeConfig,
        inbox: mpsc::UnboundedReceiver<DatanodeCommand>,
        reports: mpsc::UnboundedSender<DatanodeReport>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let node = Arc::new(Self {
            id,
            config,
            containers: ContainerSet::new(id),
            groups: GroupTable::new(id),
            running: AtomicBool::new(true),
            report_now: Notify::new(),
            shutdown,
            commands_applied: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        });

        let command_loop = tokio::spawn(Arc::clone(&node).run_commands(inbox, node.shutdown.subscribe()));
        let reporter = tokio::spawn(Arc::clone(&node).run_reports(reports, node.shutdown.subscribe()));
        node.tasks.lock().extend([command_loop, reporter]);

        tracing::info!(datanode = %id, "Datanode started");
        node
    }

    /// This datanode's identity.
    pub fn id(&self) -> DatanodeId {
        self.id
    }

    /// Local container registry.
    pub fn containers(&self) -> &ContainerSet {
        &self.containers
    }

    /// Local consensus group membership.
    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    /// Whether the datanode still applies commands and reports.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of commands applied so far.
    pub fn commands_applied(&self) -> u64 {
        self.commands_applied.load(Ordering::Relaxed)
    }

    /// Stop applying commands and reporting. Local state stays readable.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let _ = self.shutdown.send(true);
            tracing::info!(datanode = %self.id, "Datanode stopped");
        }
    }

    /// Stop and wait for both tasks to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Write a chunk through the pipeline's consensus group.
    ///
    /// The first write materializes the container locally.
    ///
    /// # Errors
    ///
    /// - [`QuayError::ChannelClosed`] if the datanode is stopped
    /// - [`QuayError::GroupNotFound`] if the group is absent, or was removed
    ///   while the write was in flight
    /// - [`QuayError::ContainerNotOpen`] if the container no longer accepts
    ///   writes
    pub async fn write_chunk(
        &self,
        container_id: ContainerId,
        pipeline_id: PipelineId,
        data: &[u8],
    ) -> QuayResult<()> {
        if !self.is_running() {
            return Err(QuayError::ChannelClosed(format!("datanode {}", self.id)));
        }

        let group = self.groups.get(&pipeline_id)?;

        if self.config.write_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.write_latency_ms)).await;
        }

        group
            .apply(|| {
                self.containers
                    .write(container_id, pipeline_id, data.len() as u64)
            })
            .unwrap_or_else(|| {
                Err(QuayError::GroupNotFound {
                    pipeline_id,
                    datanode: self.id,
                })
            })
    }

    /// Join a consensus group directly, bypassing the command channel.
    ///
    /// Returns `Ok(false)` if the group is already active or was destroyed here.
    pub fn add_group(&self, pipeline_id: PipelineId, members: &[DatanodeId]) -> QuayResult<bool> {
        let added = self.groups.add_group(pipeline_id, members)?;
        if added {
            self.report_now.notify_one();
        }
        Ok(added)
    }

    /// Build a report of the current local state.
    pub fn report(&self) -> DatanodeReport {
        DatanodeReport {
            datanode: self.id,
            replicas: self
                .containers
                .replicas()
                .into_iter()
                .map(|c| ReplicaReport {
                    container_id: c.container_id,
                    pipeline_id: c.pipeline_id,
                    state: c.state,
                })
                .collect(),
            closed_absent: self.containers.tombstones(),
            pipelines: self.groups.active(),
        }
    }

    fn apply(&self, command: DatanodeCommand) {
        let name = command.name();
        match command {
            DatanodeCommand::CreatePipeline {
                pipeline_id,
                members,
            } => {
                if !members.contains(&self.id) {
                    tracing::warn!(
                        datanode = %self.id,
                        pipeline_id = %pipeline_id,
                        "Not a member of pipeline, ignoring create"
                    );
                    return;
                }
                if let Err(e) = self.groups.add_group(pipeline_id, &members) {
                    tracing::warn!(datanode = %self.id, error = %e, "Failed to add group");
                }
            }
            DatanodeCommand::DestroyPipeline { pipeline_id } => {
                self.groups.remove_group(&pipeline_id);
            }
            DatanodeCommand::CloseContainer { container_id, .. } => {
                let outcome = self.containers.close(container_id);
                tracing::debug!(
                    datanode = %self.id,
                    container_id = %container_id,
                    ?outcome,
                    "Close applied"
                );
            }
        }
        self.commands_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(datanode = %self.id, command = name, "Command applied");
    }

    async fn command_delay(&self) {
        let (min, max) = self.config.command_latency_ms;
        if max == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(min..=max);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn run_commands(
        self: Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<DatanodeCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                command = inbox.recv() => {
                    let Some(command) = command else { break };
                    self.command_delay().await;
                    if !self.is_running() {
                        break;
                    }
                    self.apply(command);
                    self.report_now.notify_one();
                }
            }
        }
        tracing::debug!(datanode = %self.id, "Command loop exited");
    }

    async fn run_reports(
        self: Arc<Self>,
        reports: mpsc::UnboundedSender<DatanodeReport>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.report_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
                _ = self.report_now.notified() => {}
            }
            if !self.is_running() {
                break;
            }
            if reports.send(self.report()).is_err() {
                tracing::debug!(datanode = %self.id, "Report channel closed");
                break;
            }
        }
        tracing::debug!(datanode = %self.id, "Reporter exited");
    }
}

impl std::fmt::Debug for Datanode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datanode")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .field("containers", &self.containers.len())
            .field("pipelines", &self.groups.active().len())
            .finish()
    }
}
