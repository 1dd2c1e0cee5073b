//! Messages: an immutable payload plus headers.
//!
//! A [`Message`] is only ever created through a [`MessageBuilder`]; "mutating"
//! a message means deriving a new one with [`MessageBuilder::from_message`].

pub mod builder;
pub mod headers;
pub mod media_type;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

pub use builder::MessageBuilder;
pub use headers::{HeaderValue, MessageHeaders};
pub use media_type::MediaType;

use crate::error::{MessagingError, MessagingResult};

/// An immutable message envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    payload: Value,
    headers: MessageHeaders,
}

impl Message {
    pub(crate) fn new(payload: Value, headers: MessageHeaders) -> Self {
        Self { payload, headers }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Shortcut for `headers().id()`.
    pub fn id(&self) -> &str {
        self.headers.id()
    }

    /// Deserializes the payload into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> MessagingResult<T> {
        Ok(T::deserialize(&self.payload)?)
    }

    /// Returns `true` if this message reports a failure, see [`ErrorMessage`].
    pub fn is_error_message(&self) -> bool {
        self.headers.contains(headers::EXCEPTION_MESSAGE)
    }

    /// Converts an error message back into the error it describes.
    pub fn to_error(&self) -> Option<MessagingError> {
        self.headers
            .get_str(headers::EXCEPTION_MESSAGE)
            .map(MessagingError::handler)
    }
}

/// Builds messages describing a failed message handling.
pub struct ErrorMessage;

impl ErrorMessage {
    /// Creates an error message for `failed`.
    ///
    /// The payload keeps the failed payload next to the error text so the
    /// error channel can inspect or retry it.
    pub fn create(error: &MessagingError, failed: &Message) -> MessagingResult<Message> {
        let mut builder = MessageBuilder::with_payload(json!({
            "error": error.to_string(),
            "failedPayload": failed.payload(),
        }))
        .set_header(headers::EXCEPTION_MESSAGE, error.to_string())
        .set_header(headers::FAILED_MESSAGE_ID, failed.id());

        for name in [
            headers::CORRELATION_ID,
            headers::SEQUENCE_NUMBER,
            headers::SEQUENCE_SIZE,
        ] {
            if let Some(value) = failed.headers().get(name) {
                builder = builder.set_header_value(name, value.clone());
            }
        }

        builder.build()
    }
}
