//! Chaos testing utilities.
//!
//! Injects command loss, unreachable datanodes, and delivery latency into the
//! control plane's command channel.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Configuration for chaos testing.
///
/// # Example
///
/// ```
/// use quay_core::testing::{ChaosConfig, ChaosFault};
///
/// let config = ChaosConfig::new()
///     .with_seed(42)
///     .with_fault_rate(0.2)
///     .with_max_latency_ms(50)
///     .with_fault(ChaosFault::DropCommand { probability: 0.5 })
///     .with_fault(ChaosFault::Unreachable { probability: 0.1 });
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosConfig {
    /// Base probability of injecting any fault (0.0 - 1.0).
    pub fault_rate: f64,
    /// Maximum latency to inject in milliseconds.
    pub max_latency_ms: u64,
    /// Specific faults to inject.
    pub faults: Vec<ChaosFault>,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl ChaosConfig {
    /// Create a new chaos configuration with no faults.
    pub fn new() -> Self {
        Self {
            fault_rate: 0.0,
            max_latency_ms: 0,
            faults: Vec::new(),
            seed: 0,
        }
    }

    /// Lose roughly a third of all commands.
    pub fn lossy() -> Self {
        Self {
            fault_rate: 0.35,
            max_latency_ms: 20,
            faults: vec![
                ChaosFault::DropCommand { probability: 0.8 },
                ChaosFault::SlowDelivery {
                    probability: 0.2,
                    latency_ms: 20,
                },
            ],
            seed: 0,
        }
    }

    /// Set the random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the base fault rate.
    pub fn with_fault_rate(mut self, rate: f64) -> Self {
        self.fault_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the maximum latency in milliseconds.
    pub fn with_max_latency_ms(mut self, ms: u64) -> Self {
        self.max_latency_ms = ms;
        self
    }

    /// Add a fault type.
    pub fn with_fault(mut self, fault: ChaosFault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Check the configured probabilities.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.fault_rate) {
            return Err(format!("chaos fault_rate {} out of range", self.fault_rate));
        }
        for fault in &self.faults {
            if !(0.0..=1.0).contains(&fault.probability()) {
                return Err(format!(
                    "chaos fault {} has probability {} out of range",
                    fault.name(),
                    fault.probability()
                ));
            }
        }
        Ok(())
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Faults that can hit a command on its way to a datanode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChaosFault {
    /// The command is silently lost. The sender sees success.
    DropCommand {
        /// Probability of this fault (0.0 - 1.0).
        probability: f64,
    },

    /// The datanode cannot be reached. The sender sees an error.
    Unreachable {
        /// Probability of this fault (0.0 - 1.0).
        probability: f64,
    },

    /// The command arrives late.
    SlowDelivery {
        /// Probability of this fault (0.0 - 1.0).
        probability: f64,
        /// Latency to add in milliseconds.
        latency_ms: u64,
    },
}

impl ChaosFault {
    /// Get the probability of this fault.
    pub fn probability(&self) -> f64 {
        match self {
            Self::DropCommand { probability } => *probability,
            Self::Unreachable { probability } => *probability,
            Self::SlowDelivery { probability, .. } => *probability,
        }
    }

    /// Get the name of this fault type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DropCommand { .. } => "drop_command",
            Self::Unreachable { .. } => "unreachable",
            Self::SlowDelivery { .. } => "slow_delivery",
        }
    }
}

/// Engine for injecting chaos during tests.
///
/// Thread-safe and can be shared across async tasks.
///
/// # Example
///
/// ```
/// use quay_core::testing::{ChaosConfig, ChaosEngine, ChaosFault};
///
/// let engine = ChaosEngine::new(
///     ChaosConfig::new()
///         .with_seed(7)
///         .with_fault_rate(0.5)
///         .with_fault(ChaosFault::DropCommand { probability: 1.0 }),
/// );
///
/// match engine.maybe_fail() {
///     Ok(()) => { /* deliver */ }
///     Err(fault) => { /* apply fault */ let _ = fault.name(); }
/// }
/// ```
pub struct ChaosEngine {
    config: ChaosConfig,
    rng: parking_lot::Mutex<StdRng>,
    injection_count: AtomicU64,
}

impl ChaosEngine {
    /// Create a new chaos engine with the given configuration.
    pub fn new(config: ChaosConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng: parking_lot::Mutex::new(rng),
            injection_count: AtomicU64::new(0),
        }
    }

    /// An engine that never injects anything.
    pub fn disabled() -> Self {
        Self::new(ChaosConfig::new())
    }

    /// Check if a fault should be injected based on the base fault rate.
    pub fn should_inject(&self) -> bool {
        if self.config.fault_rate <= 0.0 {
            return false;
        }
        self.rng.lock().r#gen::<f64>() < self.config.fault_rate
    }

    /// Select a fault to inject based on individual probabilities.
    pub fn select_fault(&self) -> Option<ChaosFault> {
        if self.config.faults.is_empty() {
            return None;
        }

        let mut rng = self.rng.lock();
        for fault in &self.config.faults {
            if rng.r#gen::<f64>() < fault.probability() {
                self.injection_count.fetch_add(1, Ordering::SeqCst);
                return Some(fault.clone());
            }
        }

        None
    }

    /// Get a random latency between 0 and `max_latency_ms`.
    pub fn random_latency(&self) -> Duration {
        if self.config.max_latency_ms == 0 {
            return Duration::ZERO;
        }
        let ms = self.rng.lock().gen_range(0..=self.config.max_latency_ms);
        Duration::from_millis(ms)
    }

    /// Get the number of faults injected so far.
    pub fn injection_count(&self) -> u64 {
        self.injection_count.load(Ordering::SeqCst)
    }

    /// Reset the RNG to its initial state.
    pub fn reset(&self) {
        *self.rng.lock() = StdRng::seed_from_u64(self.config.seed);
        self.injection_count.store(0, Ordering::SeqCst);
    }

    /// Check if chaos injection is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.fault_rate > 0.0 && !self.config.faults.is_empty()
    }

    /// Get the configuration.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Maybe fail with a fault.
    ///
    /// Returns `Ok(())` if no fault, or the fault if one should be injected.
    pub fn maybe_fail(&self) -> Result<(), ChaosFault> {
        if !self.should_inject() {
            return Ok(());
        }
        match self.select_fault() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ChaosEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosEngine")
            .field("config", &self.config)
            .field("injection_count", &self.injection_count())
            .finish()
    }
}
