//! Error types for the Conduit messaging core.

use thiserror::Error;

/// Errors raised while assembling or running a messaging system.
///
/// Configuration-time failures (`Configuration`, `ReferenceNotFound`,
/// `ChannelNotFound`) abort assembly before any message flows. The remaining
/// variants surface while messages are being dispatched.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// An argument violated a precondition (e.g. a null payload).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The wiring of channels, endpoints, gateways or interceptors is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A named reference could not be resolved.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// A named channel could not be resolved.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// A message could not be delivered through a channel.
    #[error("failed to send message to channel '{channel}': {reason}")]
    ChannelSend {
        /// Name of the channel.
        channel: String,
        /// Why the delivery failed.
        reason: String,
    },

    /// A message handler failed while processing a message.
    #[error("message handling failed: {0}")]
    Handler(String),

    /// A gateway did not receive a reply in time.
    #[error("gateway '{gateway}' received no reply within {timeout_ms}ms")]
    ReplyTimeout {
        /// Identity of the gateway (`reference::method`).
        gateway: String,
        /// The configured timeout.
        timeout_ms: i64,
    },

    /// No separately running consumer has the given name.
    #[error("consumer not found: {0}")]
    ConsumerNotFound(String),

    /// No gateway is registered under the given reference name.
    #[error("gateway not found: {0}")]
    GatewayNotFound(String),

    /// A required message header is absent.
    #[error("header not found: {0}")]
    HeaderNotFound(String),

    /// Payload or argument (de)serialization failed.
    #[error("conversion failed: {0}")]
    Conversion(#[from] serde_json::Error),

    /// Registering an OS signal listener failed.
    #[error("signal listener failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl MessagingError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Creates a channel send error.
    pub fn channel_send(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ChannelSend {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that can only be raised while assembling a system.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::ReferenceNotFound(_) | Self::ChannelNotFound(_)
        )
    }
}

/// Result type for messaging operations.
pub type MessagingResult<T> = Result<T, MessagingError>;
