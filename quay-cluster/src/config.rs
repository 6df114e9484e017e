//! Cluster configuration.

use quay_core::testing::ChaosConfig;
use quay_core::{PollSpec, QuayError, QuayResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for an in-process cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of datanodes to start.
    pub datanodes: usize,

    /// Datanode timing.
    pub datanode: DatanodeConfig,

    /// Control plane settings.
    pub scm: ScmConfig,

    /// Interval/timeout pairs for every coordinator wait.
    pub wait: WaitConfig,

    /// Fault injection on the command channel. Disabled when absent.
    pub chaos: Option<ChaosConfig>,
}

/// Datanode timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatanodeConfig {
    /// How often a datanode reports its containers and pipelines.
    /// A report is also sent right after each applied command.
    pub report_interval_ms: u64,

    /// Processing delay range (min, max) before a received command is applied.
    pub command_latency_ms: (u64, u64),

    /// Time a write spends in the consensus group before it is applied.
    pub write_latency_ms: u64,
}

/// Control plane configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScmConfig {
    /// Members per pipeline.
    pub replication_factor: usize,

    /// Housekeeping tick. Commands to members that have not converged are
    /// re-sent on every tick.
    pub command_resend_interval_ms: u64,
}

/// Bounds for each kind of convergence wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// New pipeline's group active on a member, before a write.
    pub pipeline_ready: PollSpec,
    /// Container materialized on a datanode.
    pub container_present: PollSpec,
    /// Container CLOSED on a datanode.
    pub container_closed: PollSpec,
    /// Pipeline group gone from a datanode.
    pub pipeline_destroyed: PollSpec,
    /// Control-plane replica count reached.
    pub replica_count: PollSpec,
    /// Control-plane container state reached.
    pub scm_state: PollSpec,
    /// Control-plane container state reached, missing record fails the wait.
    pub scm_state_strict: PollSpec,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            datanodes: 3,
            datanode: DatanodeConfig::default(),
            scm: ScmConfig::default(),
            wait: WaitConfig::default(),
            chaos: None,
        }
    }
}

impl Default for DatanodeConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: 1_000,
            command_latency_ms: (0, 0),
            write_latency_ms: 0,
        }
    }
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            command_resend_interval_ms: 1_000,
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            pipeline_ready: PollSpec::new(100, 30_000),
            container_present: PollSpec::new(500, 100_000),
            container_closed: PollSpec::new(500, 15_000),
            pipeline_destroyed: PollSpec::new(100, 30_000),
            replica_count: PollSpec::new(200, 30_000),
            scm_state: PollSpec::new(500, 100_000),
            scm_state_strict: PollSpec::new(2_000, 20_000),
        }
    }
}

impl DatanodeConfig {
    /// Report interval as a Duration.
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

impl ScmConfig {
    /// Resend interval as a Duration.
    pub fn command_resend_interval(&self) -> Duration {
        Duration::from_millis(self.command_resend_interval_ms)
    }
}

impl WaitConfig {
    fn validate(&self) -> Result<(), String> {
        self.pipeline_ready.validate("wait.pipeline_ready")?;
        self.container_present.validate("wait.container_present")?;
        self.container_closed.validate("wait.container_closed")?;
        self.pipeline_destroyed.validate("wait.pipeline_destroyed")?;
        self.replica_count.validate("wait.replica_count")?;
        self.scm_state.validate("wait.scm_state")?;
        self.scm_state_strict.validate("wait.scm_state_strict")?;
        Ok(())
    }
}

impl ClusterConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Parse a configuration from YAML and validate it.
    pub fn from_yaml_str(yaml: &str) -> QuayResult<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| QuayError::Serialization(e.to_string()))?;
        config.validate().map_err(QuayError::Config)?;
        Ok(config)
    }

    /// Read a configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> QuayResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Render this configuration as YAML.
    pub fn to_yaml(&self) -> QuayResult<String> {
        serde_yaml::to_string(self).map_err(|e| QuayError::Serialization(e.to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.datanodes == 0 {
            return Err("datanodes must be > 0".to_string());
        }

        if self.scm.replication_factor == 0 {
            return Err("scm.replication_factor must be > 0".to_string());
        }

        if self.scm.replication_factor > self.datanodes {
            return Err(format!(
                "scm.replication_factor ({}) exceeds datanodes ({})",
                self.scm.replication_factor, self.datanodes
            ));
        }

        if self.datanode.report_interval_ms == 0 {
            return Err("datanode.report_interval_ms must be > 0".to_string());
        }

        let (min_latency, max_latency) = self.datanode.command_latency_ms;
        if min_latency > max_latency {
            return Err(format!(
                "datanode.command_latency_ms min ({min_latency}) exceeds max ({max_latency})"
            ));
        }

        if self.scm.command_resend_interval_ms == 0 {
            return Err("scm.command_resend_interval_ms must be > 0".to_string());
        }

        self.wait.validate()?;

        if let Some(chaos) = &self.chaos {
            chaos.validate()?;
        }

        Ok(())
    }
}

/// Builder for ClusterConfig.
#[derive(Debug, Default)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    /// Set the number of datanodes.
    pub fn datanodes(mut self, count: usize) -> Self {
        self.config.datanodes = count;
        self
    }

    /// Set the pipeline replication factor.
    pub fn replication_factor(mut self, factor: usize) -> Self {
        self.config.scm.replication_factor = factor;
        self
    }

    /// Set the datanode report interval.
    pub fn report_interval_ms(mut self, ms: u64) -> Self {
        self.config.datanode.report_interval_ms = ms;
        self
    }

    /// Set the command processing delay range.
    pub fn command_latency_ms(mut self, min: u64, max: u64) -> Self {
        self.config.datanode.command_latency_ms = (min, max);
        self
    }

    /// Set the write latency inside a consensus group.
    pub fn write_latency_ms(mut self, ms: u64) -> Self {
        self.config.datanode.write_latency_ms = ms;
        self
    }

    /// Set the command resend interval.
    pub fn command_resend_interval_ms(mut self, ms: u64) -> Self {
        self.config.scm.command_resend_interval_ms = ms;
        self
    }

    /// Replace all wait bounds.
    pub fn wait(mut self, wait: WaitConfig) -> Self {
        self.config.wait = wait;
        self
    }

    /// Enable fault injection.
    pub fn chaos(mut self, chaos: ChaosConfig) -> Self {
        self.config.chaos = Some(chaos);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ClusterConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}
