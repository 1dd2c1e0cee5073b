//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use conduit_core::PollingMetadata;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Root configuration structure.
///
/// ```toml
/// [logging]
/// level = "debug"
///
/// [[polling]]
/// endpoint_id = "orderConsumer"
/// fixed_rate_in_milliseconds = 100
/// handled_message_limit = 1000
///
/// [gateway]
/// reply_timeout_ms = 5000
///
/// [consumers]
/// run = ["orderConsumer"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConduitConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Polling metadata keyed by `endpoint_id`.
    #[serde(default)]
    pub polling: Vec<PollingMetadata>,

    #[serde(default)]
    pub gateway: GatewayDefaults,

    #[serde(default)]
    pub consumers: ConsumersConfig,
}

impl ConduitConfig {
    pub fn polling_for(&self, endpoint_id: &str) -> Option<&PollingMetadata> {
        self.polling.iter().find(|m| m.endpoint_id == endpoint_id)
    }
}

/// Defaults applied to gateways that leave a setting unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayDefaults {
    /// Reply timeout for gateways without their own.
    #[serde(default)]
    pub reply_timeout_ms: Option<i64>,
}

/// Which separately running consumers the runtime drives.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConsumersConfig {
    /// Consumer names to run. Empty runs every consumer.
    #[serde(default)]
    pub run: Vec<String>,
}

// =============================================================================
// Logging
// =============================================================================

/// Logging settings consumed by [`crate::logging::init_from_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Daily log files kept before the oldest is removed.
    #[serde(default = "default_max_files")]
    pub max_files: u32,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line number.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-target levels, e.g. `conduit_core::endpoint = "trace"`.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            max_files: default_max_files(),
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: BTreeMap::new(),
        }
    }
}

fn default_max_files() -> u32 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == lower)
            .ok_or_else(|| {
                ConfigError::validation(format!(
                    "Invalid log level: {s}. Valid values are: {:?}",
                    Self::ALL.map(|l| l.as_str())
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    #[cfg(feature = "json-log")]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!(matches!(
            "verbose".parse::<LogLevel>(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_polling_lookup() {
        let config = ConduitConfig {
            polling: vec![PollingMetadata::create("orders").with_handled_message_limit(3)],
            ..Default::default()
        };

        assert_eq!(
            config.polling_for("orders").map(|m| m.handled_message_limit),
            Some(3)
        );
        assert!(config.polling_for("payments").is_none());
    }
}
