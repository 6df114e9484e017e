//! Bounded polling for eventually-consistent state.
//!
//! Every "wait until the cluster agrees" in quay goes through [`try_wait_for`]:
//! the check is evaluated at a fixed interval until it returns `true` or the
//! timeout elapses. Sleeping between checks uses the tokio timer, so a waiting
//! caller never spins and never blocks a runtime thread.
//!
//! A check that fails with a not-found error counts as "not yet satisfied".
//! Any other error ends the wait immediately. To make a missing record fatal,
//! the check maps it with [`QuayError::abort`].

use crate::error::{QuayError, QuayResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Interval and timeout of a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSpec {
    /// Delay between two evaluations of the check.
    pub interval_ms: u64,
    /// Total time allowed for the check to become true.
    pub timeout_ms: u64,
}

impl PollSpec {
    /// Create a poll spec from milliseconds.
    pub const fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
        }
    }

    /// The interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// The timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate the spec.
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err(format!("{name}: interval_ms must be > 0"));
        }
        if self.interval_ms >= self.timeout_ms {
            return Err(format!(
                "{name}: interval_ms ({}) must be < timeout_ms ({})",
                self.interval_ms, self.timeout_ms
            ));
        }
        Ok(())
    }
}

/// Wait until `check` returns `true`, polling every `spec.interval`.
///
/// # Errors
///
/// Returns [`QuayError::Timeout`] if the check is still false after
/// `spec.timeout`.
pub async fn wait_for<F>(what: &str, spec: PollSpec, mut check: F) -> QuayResult<()>
where
    F: FnMut() -> bool,
{
    try_wait_for(what, spec, || Ok(check())).await
}

/// Wait until a fallible `check` returns `Ok(true)`.
///
/// Not-found errors from the check are treated as `Ok(false)`.
///
/// # Errors
///
/// - [`QuayError::Timeout`] if the bound elapses
/// - any other error returned by `check`, unchanged
pub async fn try_wait_for<F>(what: &str, spec: PollSpec, mut check: F) -> QuayResult<()>
where
    F: FnMut() -> QuayResult<bool>,
{
    let started = Instant::now();
    let deadline = started + spec.timeout();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match check() {
            Ok(true) => {
                tracing::debug!(
                    what,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "condition satisfied"
                );
                return Ok(());
            }
            Ok(false) => {}
            Err(e) if e.is_not_found() && !matches!(e, QuayError::Aborted { .. }) => {
                tracing::trace!(what, error = %e, "record not visible yet");
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(what, attempts, timeout_ms = spec.timeout_ms, "wait timed out");
            return Err(QuayError::Timeout {
                what: what.to_string(),
                timeout_ms: spec.timeout_ms,
                attempts,
            });
        }

        tokio::time::sleep(spec.interval().min(deadline - now)).await;
    }
}
