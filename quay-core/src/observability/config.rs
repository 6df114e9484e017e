//! Logging configuration.

use std::str::FromStr;

/// Environment variable selecting the output format.
pub const ENV_LOG_FORMAT: &str = "QUAY_LOG_FORMAT";
/// Environment variable holding the filter. Takes precedence over `RUST_LOG`.
pub const ENV_LOG_LEVEL: &str = "QUAY_LOG_LEVEL";
/// Environment variable enabling file and line in output.
pub const ENV_LOG_LOCATION: &str = "QUAY_LOG_LOCATION";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line, colored.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        })
    }
}

/// Settings for the global subscriber installed by
/// [`init_tracing`](super::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    service_name: String,
    log_format: LogFormat,
    log_filter: String,
    include_location: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "quay".to_string(),
            log_format: LogFormat::Compact,
            log_filter: "info".to_string(),
            include_location: false,
        }
    }
}

impl TracingConfig {
    /// Create a new builder.
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }

    /// Read the process environment with an `info` fallback filter.
    pub fn from_env() -> Self {
        Self::from_env_or("info")
    }

    /// Read the process environment.
    ///
    /// `QUAY_LOG_LEVEL`, then `RUST_LOG`, then `default_filter` decide the
    /// filter. Without `QUAY_LOG_FORMAT` the format is pretty on a terminal
    /// and compact otherwise.
    pub fn from_env_or(default_filter: &str) -> Self {
        let tty = std::io::IsTerminal::is_terminal(&std::io::stdout());
        Self::from_lookup(default_filter, tty, |key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(default_filter: &str, tty: bool, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_format = match lookup(ENV_LOG_FORMAT) {
            Some(s) => s.parse().unwrap_or_default(),
            None if tty => LogFormat::Pretty,
            None => LogFormat::Compact,
        };

        let log_filter = lookup(ENV_LOG_LEVEL)
            .or_else(|| lookup("RUST_LOG"))
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default_filter.to_string());

        let include_location = lookup(ENV_LOG_LOCATION).is_some_and(|s| s == "true" || s == "1");

        Self {
            log_format,
            log_filter,
            include_location,
            ..Self::default()
        }
    }

    /// Service name attached to output.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Output format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Filter directive, e.g. `"debug,quay_cluster=trace"`.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Whether file and line are printed.
    pub fn include_location(&self) -> bool {
        self.include_location
    }
}

/// Builder for [`TracingConfig`].
#[derive(Debug, Clone, Default)]
pub struct TracingConfigBuilder {
    config: TracingConfig,
}

impl TracingConfigBuilder {
    /// Set the service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Set the output format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    /// Set the filter directive.
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    /// Print file and line.
    pub fn include_location(mut self, include: bool) -> Self {
        self.config.include_location = include;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TracingConfig {
        self.config
    }
}
