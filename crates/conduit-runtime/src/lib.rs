//! Conduit Runtime - orchestration layer for the Conduit messaging framework.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `ConduitConfig`)
//! - Logging configuration (`LoggingBuilder`, `init_from_config`)
//! - Runtime orchestration (`MessagingRuntime`) driving separately running
//!   consumers until shutdown
//!
//! ```rust,ignore
//! use conduit_runtime::MessagingRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = MessagingRuntime::builder()
//!         .build(configuration, references)
//!         .await?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{
    ConduitConfig, ConfigError, ConfigLoader, ConfigResult, ConsumersConfig, GatewayDefaults,
    LoggingConfig, Profile,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents, init_from_config};
pub use runtime::{MessagingRuntime, RuntimeBuilder};

pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the logging macros alongside the runtime entry points.
pub mod prelude {
    pub use super::{ConduitConfig, ConfigLoader, MessagingRuntime};
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
