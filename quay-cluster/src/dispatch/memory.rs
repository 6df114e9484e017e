//! In-process command transport.
//!
//! Each registered datanode owns the receiving half of an unbounded channel.
//! Faults from the [`ChaosEngine`] are applied on the sending side.

use super::CommandTransport;
use crate::command::DatanodeCommand;
use parking_lot::RwLock;
use quay_core::testing::{ChaosEngine, ChaosFault};
use quay_core::{DatanodeId, QuayError, QuayResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Counters for commands passing through the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Commands handed to a datanode channel.
    pub delivered: usize,
    /// Commands lost to injected faults.
    pub dropped: usize,
    /// Sends that failed.
    pub failed: usize,
}

/// Transport backed by tokio channels.
pub struct InProcessTransport {
    routes: RwLock<HashMap<DatanodeId, mpsc::UnboundedSender<DatanodeCommand>>>,
    chaos: ChaosEngine,
    delivered: AtomicUsize,
    dropped: AtomicUsize,
    failed: AtomicUsize,
}

impl InProcessTransport {
    /// Create a transport with the given fault injection.
    pub fn new(chaos: ChaosEngine) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            chaos,
            delivered: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Create a transport that never injects faults.
    pub fn reliable() -> Self {
        Self::new(ChaosEngine::disabled())
    }

    /// Register a datanode and return its command inbox.
    ///
    /// Registering the same datanode again replaces its inbox.
    pub fn register(&self, datanode: DatanodeId) -> mpsc::UnboundedReceiver<DatanodeCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.write().insert(datanode, tx);
        rx
    }

    /// Remove a datanode. Later sends to it fail.
    pub fn deregister(&self, datanode: &DatanodeId) -> bool {
        self.routes.write().remove(datanode).is_some()
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// The fault injector in use.
    pub fn chaos(&self) -> &ChaosEngine {
        &self.chaos
    }

    fn route(&self, datanode: &DatanodeId) -> Option<mpsc::UnboundedSender<DatanodeCommand>> {
        self.routes.read().get(datanode).cloned()
    }

    fn fail(&self, datanode: DatanodeId, command: &DatanodeCommand, cause: &str) -> QuayError {
        self.failed.fetch_add(1, Ordering::Relaxed);
        QuayError::CommandDelivery {
            command: command.name(),
            datanode,
            cause: cause.to_string(),
        }
    }
}

impl CommandTransport for InProcessTransport {
    fn send(&self, datanode: DatanodeId, command: DatanodeCommand) -> QuayResult<()> {
        let Some(tx) = self.route(&datanode) else {
            return Err(self.fail(datanode, &command, "datanode not registered"));
        };

        let delay = match self.chaos.maybe_fail() {
            Ok(()) => Duration::ZERO,
            Err(ChaosFault::DropCommand { .. }) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    datanode = %datanode,
                    command = command.name(),
                    pipeline_id = %command.pipeline_id(),
                    "Command dropped"
                );
                return Ok(());
            }
            Err(ChaosFault::Unreachable { .. }) => {
                return Err(self.fail(datanode, &command, "datanode unreachable"));
            }
            Err(ChaosFault::SlowDelivery { latency_ms, .. }) => {
                Duration::from_millis(latency_ms) + self.chaos.random_latency()
            }
        };

        if delay.is_zero() {
            if let Err(mpsc::error::SendError(command)) = tx.send(command) {
                return Err(self.fail(datanode, &command, "inbox closed"));
            }
            self.delivered.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return Err(self.fail(datanode, &command, "no runtime for delayed delivery"));
        };
        self.delivered.fetch_add(1, Ordering::Relaxed);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let name = command.name();
            if tx.send(command).is_err() {
                tracing::debug!(datanode = %datanode, command = name, "Delayed command lost, inbox closed");
            }
        });
        Ok(())
    }

    fn datanodes(&self) -> Vec<DatanodeId> {
        let mut ids: Vec<_> = self.routes.read().keys().copied().collect();
        ids.sort();
        ids
    }

    fn name(&self) -> &'static str {
        "in-process"
    }
}

impl std::fmt::Debug for InProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessTransport")
            .field("datanodes", &self.routes.read().len())
            .field("chaos", &self.chaos)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quay_core::PipelineId;
    use quay_core::testing::ChaosConfig;

    fn destroy() -> DatanodeCommand {
        DatanodeCommand::DestroyPipeline {
            pipeline_id: PipelineId::new(),
        }
    }

    #[tokio::test]
    async fn delivers_to_registered_datanode() {
        let transport = InProcessTransport::reliable();
        let datanode = DatanodeId::new();
        let mut inbox = transport.register(datanode);

        let command = destroy();
        transport.send(datanode, command.clone()).unwrap();

        assert_eq!(inbox.recv().await, Some(command));
        assert_eq!(transport.stats().delivered, 1);
        assert_eq!(transport.datanodes(), vec![datanode]);
    }

    #[tokio::test]
    async fn unknown_datanode_is_transient_failure() {
        let transport = InProcessTransport::reliable();
        let err = transport.send(DatanodeId::new(), destroy()).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(transport.stats().failed, 1);
    }

    #[tokio::test]
    async fn closed_inbox_fails_send() {
        let transport = InProcessTransport::reliable();
        let datanode = DatanodeId::new();
        drop(transport.register(datanode));

        assert!(transport.send(datanode, destroy()).is_err());
    }

    #[tokio::test]
    async fn deregistered_datanode_is_unreachable() {
        let transport = InProcessTransport::reliable();
        let datanode = DatanodeId::new();
        let _inbox = transport.register(datanode);

        assert!(transport.deregister(&datanode));
        assert!(!transport.deregister(&datanode));
        assert!(transport.datanodes().is_empty());

        let err = transport.send(datanode, destroy()).unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn debug_shows_route_count_and_stats() {
        let transport = InProcessTransport::reliable();
        let _inbox = transport.register(DatanodeId::new());

        let rendered = format!("{transport:?}");
        assert!(rendered.contains("InProcessTransport"));
        assert!(rendered.contains("datanodes: 1"));
        assert!(rendered.contains("delivered: 0"));
    }

    #[tokio::test]
    async fn dropped_commands_look_sent() {
        let transport = InProcessTransport::new(ChaosEngine::new(
            ChaosConfig::new()
                .with_fault_rate(1.0)
                .with_fault(ChaosFault::DropCommand { probability: 1.0 }),
        ));
        let datanode = DatanodeId::new();
        let mut inbox = transport.register(datanode);

        transport.send(datanode, destroy()).unwrap();

        assert!(inbox.try_recv().is_err());
        assert_eq!(transport.stats().dropped, 1);
        assert_eq!(transport.chaos().injection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_delivery_arrives_later() {
        let transport = InProcessTransport::new(ChaosEngine::new(
            ChaosConfig::new().with_fault_rate(1.0).with_fault(ChaosFault::SlowDelivery {
                probability: 1.0,
                latency_ms: 200,
            }),
        ));
        let datanode = DatanodeId::new();
        let mut inbox = transport.register(datanode);

        transport.send(datanode, destroy()).unwrap();
        assert!(inbox.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(inbox.try_recv().is_ok());
    }
}
