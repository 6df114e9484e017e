//! In-process cluster handle.

use crate::client::WriteClient;
use crate::config::ClusterConfig;
use crate::coordinator::LifecycleCoordinator;
use crate::datanode::Datanode;
use crate::dispatch::InProcessTransport;
use crate::scm::StorageContainerManager;
use quay_core::testing::ChaosEngine;
use quay_core::{DatanodeId, QuayError, QuayResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A control plane and its datanodes running inside one process.
///
/// Every handle is independent. Several clusters can run side by side in
/// the same runtime.
#[derive(Debug)]
pub struct MiniCluster {
    config: ClusterConfig,
    scm: Arc<StorageContainerManager>,
    transport: Arc<InProcessTransport>,
    datanodes: Arc<BTreeMap<DatanodeId, Arc<Datanode>>>,
    coordinator: LifecycleCoordinator,
    client: WriteClient,
}

impl MiniCluster {
    /// Validate the configuration and start every component.
    ///
    /// # Errors
    ///
    /// [`QuayError::Config`] if the configuration is invalid.
    pub async fn start(config: ClusterConfig) -> QuayResult<Self> {
        config.validate().map_err(QuayError::Config)?;

        let chaos = config
            .chaos
            .clone()
            .map(ChaosEngine::new)
            .unwrap_or_else(ChaosEngine::disabled);
        let transport = Arc::new(InProcessTransport::new(chaos));
        let scm = StorageContainerManager::new(config.scm.clone(), transport.clone());

        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let mut datanodes = BTreeMap::new();
        for _ in 0..config.datanodes {
            let id = DatanodeId::new();
            let inbox = transport.register(id);
            let dn = Datanode::start(id, config.datanode.clone(), inbox, reports_tx.clone());
            scm.register_datanode(id);
            datanodes.insert(id, dn);
        }
        drop(reports_tx);
        scm.start(reports_rx);

        let datanodes = Arc::new(datanodes);
        let coordinator =
            LifecycleCoordinator::new(Arc::clone(&scm), Arc::clone(&datanodes), config.wait.clone());
        let client = WriteClient::new(
            Arc::clone(&scm),
            Arc::clone(&datanodes),
            config.wait.pipeline_ready,
        );

        tracing::info!(
            datanodes = config.datanodes,
            replication_factor = config.scm.replication_factor,
            chaos = config.chaos.is_some(),
            "Mini cluster started"
        );

        Ok(Self {
            config,
            scm,
            transport,
            datanodes,
            coordinator,
            client,
        })
    }

    /// The configuration the cluster was started with.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The control plane.
    pub fn scm(&self) -> &Arc<StorageContainerManager> {
        &self.scm
    }

    /// The command transport.
    pub fn transport(&self) -> &Arc<InProcessTransport> {
        &self.transport
    }

    /// The lifecycle coordinator.
    pub fn coordinator(&self) -> &LifecycleCoordinator {
        &self.coordinator
    }

    /// The write client.
    pub fn client(&self) -> &WriteClient {
        &self.client
    }

    /// Every datanode, ordered by ID.
    pub fn datanodes(&self) -> impl Iterator<Item = &Arc<Datanode>> {
        self.datanodes.values()
    }

    /// Get one datanode.
    pub fn datanode(&self, id: &DatanodeId) -> QuayResult<&Arc<Datanode>> {
        self.datanodes
            .get(id)
            .ok_or(QuayError::DatanodeNotFound(*id))
    }

    /// Stop one datanode. It stays visible but no longer converges, and
    /// commands sent to it fail at the transport.
    pub fn stop_datanode(&self, id: &DatanodeId) -> QuayResult<()> {
        self.datanode(id)?.stop();
        self.transport.deregister(id);
        Ok(())
    }

    /// Stop every task and wait for them to exit.
    pub async fn shutdown(&self) {
        for dn in self.datanodes.values() {
            dn.shutdown().await;
        }
        self.scm.shutdown().await;
        tracing::info!("Mini cluster stopped");
    }
}
