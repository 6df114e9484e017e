//! Structured logging setup.
//!
//! Logging format is controlled via the `QUAY_LOG_FORMAT` env var:
//! - `json` - Structured JSON output
//! - `pretty` - Human-readable multi-line output (default for TTY)
//! - `compact` - Single-line output (default otherwise)
//!
//! # Example
//!
//! ```ignore
//! use quay_core::observability::{TracingConfig, init_tracing};
//!
//! let _guard = init_tracing(TracingConfig::from_env())?;
//! ```

mod config;
mod tracing_setup;

pub use config::{
    ENV_LOG_FORMAT, ENV_LOG_LEVEL, ENV_LOG_LOCATION, LogFormat, TracingConfig, TracingConfigBuilder,
};
pub use tracing_setup::{TracingGuard, init_tracing};
