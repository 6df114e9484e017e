//! Simulate command - run the close protocol against a mini cluster.

use anyhow::{Context, Result};
use quay_cluster::{ClusterConfig, MiniCluster};
use quay_core::testing::ChaosConfig;
use std::time::Instant;

/// Options for the simulate command.
#[derive(Debug)]
pub struct SimulateOptions<'a> {
    /// Config file; defaults apply when absent.
    pub config: Option<&'a str>,
    /// Containers to write before closing.
    pub containers: usize,
    /// Containers to allocate but leave empty.
    pub unwritten: usize,
    /// Seed for a lossy command channel.
    pub chaos_seed: Option<u64>,
}

/// Run the simulate command.
pub async fn run(options: SimulateOptions<'_>) -> Result<()> {
    let mut config = match options.config {
        Some(path) => ClusterConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => ClusterConfig::default(),
    };
    if let Some(seed) = options.chaos_seed {
        config.chaos = Some(ChaosConfig::lossy().with_seed(seed));
    }

    let cluster = MiniCluster::start(config)
        .await
        .context("Failed to start mini cluster")?;

    let result = drive(&cluster, &options).await;
    cluster.shutdown().await;
    result
}

async fn drive(cluster: &MiniCluster, options: &SimulateOptions<'_>) -> Result<()> {
    let started = Instant::now();
    let mut written = Vec::with_capacity(options.containers);
    for i in 0..options.containers {
        let payload = format!("chunk-{i}");
        let id = cluster
            .client()
            .create_and_write(payload.as_bytes())
            .await
            .context("Write failed")?;
        written.push(id);
    }

    let mut unwritten = Vec::with_capacity(options.unwritten);
    for _ in 0..options.unwritten {
        let info = cluster
            .client()
            .allocate(None)
            .context("Allocation failed")?;
        unwritten.push(info.container_id);
    }

    for id in &written {
        cluster
            .coordinator()
            .wait_for_replica_count(id, cluster.config().scm.replication_factor)
            .await
            .with_context(|| format!("Replicas of {id} did not settle"))?;
    }

    let all: Vec<_> = written.iter().chain(unwritten.iter()).copied().collect();
    let destroyed = cluster
        .coordinator()
        .close_and_teardown(&all, unwritten.is_empty())
        .await
        .context("Close protocol failed")?;

    println!("Simulation Summary:");
    println!("  Datanodes:            {}", cluster.config().datanodes);
    println!("  Containers written:   {}", written.len());
    println!("  Containers unwritten: {}", unwritten.len());
    println!("  Pipelines destroyed:  {}", destroyed.len());
    for pipeline in &destroyed {
        println!("    - {pipeline}");
    }
    for id in &all {
        let info = cluster.scm().get_container(id)?;
        println!(
            "  {id}: {} ({} replicas)",
            info.state,
            cluster.coordinator().count_local_replicas(id)
        );
    }

    let stats = cluster.transport().stats();
    println!(
        "  Commands:             {} delivered, {} dropped, {} failed",
        stats.delivered, stats.dropped, stats.failed
    );
    println!("  Elapsed:              {:.2?}", started.elapsed());

    Ok(())
}
