//! Config command - show or validate cluster configuration.

use anyhow::{Context, Result};
use quay_cluster::ClusterConfig;
use std::path::Path;

/// Print the default configuration.
pub fn show() -> Result<()> {
    let yaml = ClusterConfig::default()
        .to_yaml()
        .context("Failed to render default config")?;
    print!("{yaml}");
    Ok(())
}

/// Validate a configuration file and print a summary.
pub fn validate(file: &str) -> Result<()> {
    let path = Path::new(file);
    if !path.exists() {
        anyhow::bail!("Config file not found: {}", file);
    }

    tracing::info!(file = %file, "Validating config");

    let config = match ClusterConfig::from_yaml_file(path) {
        Ok(config) => config,
        Err(e) => {
            println!("✗ {file}");
            println!("  {e}");
            anyhow::bail!("Config validation failed");
        }
    };

    println!("✓ {file}");
    println!();
    println!("Cluster Summary:");
    println!("  Datanodes:          {}", config.datanodes);
    println!("  Replication factor: {}", config.scm.replication_factor);
    println!("  Report interval:    {}ms", config.datanode.report_interval_ms);
    println!("  Resend interval:    {}ms", config.scm.command_resend_interval_ms);
    println!(
        "  Close bound:        {}ms",
        config.wait.container_closed.timeout_ms
    );
    match &config.chaos {
        Some(chaos) => println!(
            "  Chaos:              {} faults at rate {} (seed {})",
            chaos.faults.len(),
            chaos.fault_rate,
            chaos.seed
        ),
        None => println!("  Chaos:              off"),
    }

    Ok(())
}
