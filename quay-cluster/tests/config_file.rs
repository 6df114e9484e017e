//! Configuration file tests.

use quay_cluster::{ClusterConfig, MiniCluster};
use quay_core::QuayError;
use quay_core::testing::{ChaosConfig, ChaosFault};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_config_file_round_trip() {
    let config = ClusterConfig::builder()
        .datanodes(5)
        .replication_factor(3)
        .report_interval_ms(250)
        .command_latency_ms(5, 20)
        .chaos(
            ChaosConfig::new()
                .with_seed(11)
                .with_fault_rate(0.1)
                .with_fault(ChaosFault::DropCommand { probability: 1.0 }),
        )
        .build()
        .unwrap();

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(config.to_yaml().unwrap().as_bytes()).unwrap();

    let loaded = ClusterConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_config_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ClusterConfig::from_yaml_file(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, QuayError::Io(_)));
}

#[tokio::test]
async fn test_invalid_config_refuses_to_start() {
    let config = ClusterConfig {
        datanodes: 2,
        ..ClusterConfig::default()
    };

    let err = MiniCluster::start(config).await.unwrap_err();
    assert!(matches!(err, QuayError::Config(_)));
}
