//! Configuration module for the Conduit runtime.
//!
//! Layered loading (files, environment, programmatic merges) and validation
//! of logging settings, per-endpoint polling metadata, gateway defaults and
//! the set of consumers to run.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ConduitConfig, ConsumersConfig, GatewayDefaults, LogFormat, LogLevel, LogOutput,
    LoggingConfig, SpanEventConfig,
};
pub use validation::validate_config;
