//! Common test utilities for quay-cluster tests.

use quay_cluster::{ClusterConfig, MiniCluster, WaitConfig};
use quay_core::testing::ChaosConfig;
use quay_core::{ContainerId, PollSpec};
use std::ops::Deref;

/// Wait bounds short enough for tests, long enough for a loaded CI box.
#[allow(dead_code)]
pub fn fast_waits() -> WaitConfig {
    WaitConfig {
        pipeline_ready: PollSpec::new(10, 5_000),
        container_present: PollSpec::new(20, 5_000),
        container_closed: PollSpec::new(20, 5_000),
        pipeline_destroyed: PollSpec::new(20, 5_000),
        replica_count: PollSpec::new(20, 5_000),
        scm_state: PollSpec::new(20, 5_000),
        scm_state_strict: PollSpec::new(50, 2_000),
    }
}

/// Fast-ticking config for `datanodes` nodes at the given replication factor.
#[allow(dead_code)]
pub fn fast_config(datanodes: usize, replication_factor: usize) -> ClusterConfig {
    ClusterConfig::builder()
        .datanodes(datanodes)
        .replication_factor(replication_factor)
        .report_interval_ms(50)
        .command_resend_interval_ms(100)
        .wait(fast_waits())
        .build()
        .expect("Invalid test config")
}

/// Test context that owns a running mini cluster.
#[allow(dead_code)]
pub struct TestCluster {
    /// The cluster under test.
    pub cluster: MiniCluster,
}

#[allow(dead_code)]
impl TestCluster {
    /// Start a cluster with `datanodes` nodes and 3-way pipelines.
    pub async fn new(datanodes: usize) -> Self {
        Self::with_config(fast_config(datanodes, 3)).await
    }

    /// Start a cluster whose command channel drops and delays commands.
    pub async fn lossy(datanodes: usize, seed: u64) -> Self {
        let mut config = fast_config(datanodes, 3);
        config.chaos = Some(ChaosConfig::lossy().with_seed(seed));
        Self::with_config(config).await
    }

    /// Start a cluster from an explicit config.
    pub async fn with_config(config: ClusterConfig) -> Self {
        let cluster = MiniCluster::start(config)
            .await
            .expect("Failed to start mini cluster");
        Self { cluster }
    }

    /// Allocate a container and write one chunk to every replica.
    pub async fn write_container(&self) -> ContainerId {
        self.cluster
            .client()
            .create_and_write(b"chunk-0")
            .await
            .expect("Failed to write container")
    }

    /// Sleep for a number of milliseconds.
    pub async fn settle(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }

    /// Shutdown every task in the cluster.
    pub async fn shutdown(self) {
        self.cluster.shutdown().await;
    }
}

impl Deref for TestCluster {
    type Target = MiniCluster;

    fn deref(&self) -> &Self::Target {
        &self.cluster
    }
}
