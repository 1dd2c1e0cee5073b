//! Configuration validation utilities.

use std::collections::HashSet;

use conduit_core::PollingMetadata;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ConduitConfig, ConsumersConfig, LogLevel, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &ConduitConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_polling_config(&config.polling)?;
    validate_consumers_config(&config.consumers)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    for (target, level) in &logging.filters {
        if target.is_empty() {
            return Err(ConfigError::missing_field("logging.filters.<target>"));
        }
        level.parse::<LogLevel>()?;
    }
    if logging.max_files == 0 {
        return Err(ConfigError::validation("logging.max_files must be at least 1"));
    }
    Ok(())
}

fn validate_polling_config(polling: &[PollingMetadata]) -> ConfigResult<()> {
    let mut seen_ids = HashSet::new();

    for metadata in polling {
        if metadata.endpoint_id.is_empty() {
            return Err(ConfigError::missing_field("polling.endpoint_id"));
        }
        if !seen_ids.insert(metadata.endpoint_id.as_str()) {
            return Err(ConfigError::DuplicatePollingEndpoint(
                metadata.endpoint_id.clone(),
            ));
        }
        if metadata.memory_limit_in_megabytes < 0 {
            return Err(ConfigError::validation(format!(
                "Memory limit of '{}' cannot be negative",
                metadata.endpoint_id
            )));
        }
        if metadata.max_message_per_poll == 0 {
            return Err(ConfigError::validation(format!(
                "max_message_per_poll of '{}' must be at least 1",
                metadata.endpoint_id
            )));
        }
    }

    Ok(())
}

fn validate_consumers_config(consumers: &ConsumersConfig) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for name in &consumers.run {
        if name.is_empty() {
            return Err(ConfigError::missing_field("consumers.run[]"));
        }
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::DuplicateConsumer(name.clone()));
        }
    }
    Ok(())
}
