//! Runtime error types.

use conduit_core::MessagingError;
use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Building or driving the messaging system failed.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Loading or validating configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A consumer task panicked or was cancelled.
    #[error("Consumer task '{consumer}' failed: {reason}")]
    ConsumerTask { consumer: String, reason: String },

    /// Registering a shutdown signal listener failed.
    #[error("Signal listener failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn consumer_task(consumer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConsumerTask {
            consumer: consumer.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
