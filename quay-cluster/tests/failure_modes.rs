//! Failure mode tests.
//!
//! Missing records, timeouts, stopped datanodes and a lossy command channel.

mod common;

use common::{TestCluster, fast_config, fast_waits};
use quay_core::{ContainerId, LifeCycleState, PollSpec, QuayError};
use std::time::{Duration, Instant};

/// Unknown container IDs fail fast with NotFound, never with a timeout.
#[tokio::test]
async fn test_unknown_container_is_not_found() {
    let cluster = TestCluster::new(3).await;
    let unknown = ContainerId::new(9_999);

    let err = cluster.scm().get_container(&unknown).unwrap_err();
    assert!(matches!(err, QuayError::ContainerNotFound(id) if id == unknown));

    let started = Instant::now();
    let err = cluster
        .coordinator()
        .wait_for_container_close(&[unknown])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(1));

    let err = cluster
        .coordinator()
        .close_and_teardown(&[unknown], false)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(cluster.coordinator().count_replicas(&unknown), 0);

    cluster.shutdown().await;
}

/// The lenient SCM wait treats a missing record as "not yet" and times out.
#[tokio::test]
async fn test_lenient_scm_wait_times_out_on_missing_record() {
    let mut config = fast_config(3, 3);
    config.wait.scm_state = PollSpec::new(20, 200);
    let cluster = TestCluster::with_config(config).await;

    let err = cluster
        .coordinator()
        .wait_for_scm_container_state(&ContainerId::new(42), LifeCycleState::Closed)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "Expected timeout, got {err}");

    cluster.shutdown().await;
}

/// The strict SCM wait aborts on a missing record before its bound.
#[tokio::test]
async fn test_strict_scm_wait_aborts_on_missing_record() {
    let cluster = TestCluster::new(3).await;

    let started = Instant::now();
    let err = cluster
        .coordinator()
        .wait_for_container_state_strict(&ContainerId::new(42), LifeCycleState::Closed)
        .await
        .unwrap_err();
    assert!(matches!(err, QuayError::Aborted { .. }));
    assert!(err.is_not_found());
    assert!(started.elapsed() < Duration::from_millis(1_500));

    cluster.shutdown().await;
}

/// The strict wait succeeds for a known container once it converges.
#[tokio::test]
async fn test_strict_scm_wait_succeeds_for_known_container() {
    let cluster = TestCluster::new(3).await;
    let container = cluster.write_container().await;

    cluster
        .coordinator()
        .wait_for_container_close(&[container])
        .await
        .unwrap();
    cluster
        .coordinator()
        .wait_for_container_state_strict(&container, LifeCycleState::Closed)
        .await
        .expect("Strict wait should see CLOSED");

    cluster.shutdown().await;
}

/// A never-written container times out the presence check when creation
/// is required.
#[tokio::test]
async fn test_presence_check_times_out_for_unwritten_container() {
    let mut config = fast_config(3, 3);
    config.wait.container_present = PollSpec::new(20, 300);
    let cluster = TestCluster::with_config(config).await;

    let info = cluster.client().allocate(None).unwrap();
    let err = cluster
        .coordinator()
        .wait_for_container_close(&[info.container_id])
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "Expected timeout, got {err}");

    // Nothing was closed: the call failed before issuing commands.
    assert_eq!(
        cluster.scm().get_container(&info.container_id).unwrap().state,
        LifeCycleState::Open
    );

    cluster.shutdown().await;
}

/// A stopped member never reports CLOSED, so the close wait times out.
#[tokio::test]
async fn test_stopped_datanode_times_out_close() {
    let mut waits = fast_waits();
    waits.container_closed = PollSpec::new(20, 400);
    let mut config = fast_config(3, 3);
    config.wait = waits;
    let cluster = TestCluster::with_config(config).await;

    let container = cluster.write_container().await;
    let pipeline = cluster.coordinator().pipeline_of(&container).unwrap();
    let stopped = pipeline.members[2];
    cluster.stop_datanode(&stopped).unwrap();

    let err = cluster
        .coordinator()
        .wait_for_container_close(&[container])
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "Expected timeout, got {err}");

    let dn = cluster.datanode(&stopped).unwrap();
    assert!(!dn.is_running());
    assert!(!dn.containers().is_closed(&container));

    let err = dn
        .write_chunk(container, pipeline.pipeline_id, b"x")
        .await
        .unwrap_err();
    assert!(matches!(err, QuayError::ChannelClosed(_)));

    cluster.shutdown().await;
}

/// Pipelines need enough datanodes.
#[tokio::test]
async fn test_pipeline_needs_enough_datanodes() {
    let cluster = TestCluster::new(3).await;

    let err = cluster.scm().create_pipeline(4).unwrap_err();
    assert!(matches!(
        err,
        QuayError::InsufficientDatanodes {
            required: 4,
            available: 3
        }
    ));

    cluster.shutdown().await;
}

/// Member lookups reject datanodes outside the cluster.
#[tokio::test]
async fn test_datanodes_of_rejects_unknown_member() {
    let cluster = TestCluster::new(3).await;
    let container = cluster.write_container().await;

    let mut pipeline = cluster.coordinator().pipeline_of(&container).unwrap();
    let stranger = quay_core::DatanodeId::new();
    pipeline.members.push(stranger);

    let err = cluster.coordinator().datanodes_of(&pipeline).unwrap_err();
    assert!(matches!(err, QuayError::DatanodeNotFound(id) if id == stranger));

    cluster.shutdown().await;
}

/// Dropped and delayed commands are repaired by resends.
#[tokio::test]
async fn test_lossy_channel_converges() {
    let cluster = TestCluster::lossy(3, 7).await;

    let first = cluster.write_container().await;
    let second = cluster.write_container().await;
    let pipeline = cluster.coordinator().pipeline_of(&first).unwrap();

    cluster
        .coordinator()
        .close_and_teardown(&[first, second], true)
        .await
        .expect("Resends should repair lost commands");

    for dn in cluster.coordinator().datanodes_of(&pipeline).unwrap() {
        assert!(dn.containers().is_closed(&first));
        assert!(dn.containers().is_closed(&second));
        assert!(!dn.groups().is_exist(&pipeline.pipeline_id));
    }

    let stats = cluster.transport().stats();
    assert!(stats.delivered > 0);
    assert!(cluster.transport().chaos().is_enabled());

    cluster.shutdown().await;
}

/// Two clusters in one process do not see each other.
#[tokio::test]
async fn test_clusters_are_isolated() {
    let a = TestCluster::new(3).await;
    let b = TestCluster::new(3).await;

    let container = a.write_container().await;
    assert!(a.scm().get_container(&container).is_ok());

    // Container IDs restart per cluster, so check the pipeline instead.
    let pipeline = a.coordinator().pipeline_of(&container).unwrap();
    assert!(b.scm().get_pipeline(&pipeline.pipeline_id).is_err());
    assert_eq!(b.datanodes().filter(|dn| !dn.containers().is_empty()).count(), 0);

    a.shutdown().await;
    b.shutdown().await;
}
