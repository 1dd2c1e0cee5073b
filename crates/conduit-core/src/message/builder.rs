//! Fluent construction of immutable messages.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use uuid::Uuid;

use super::headers::{self, HeaderValue, MessageHeaders};
use super::media_type::MediaType;
use super::Message;
use crate::channel::ChannelRef;
use crate::error::{MessagingError, MessagingResult};

/// Builds a [`Message`].
///
/// Every call to [`build`](Self::build) stamps a fresh `id` and `timestamp`,
/// so a builder derived from an existing message never reuses its identity.
///
/// # Example
///
/// ```rust,ignore
/// let message = MessageBuilder::with_payload(json!({"order": 1}))
///     .set_header("type", "private")
///     .set_content_type(&MediaType::application_json())
///     .build()?;
/// ```
#[derive(Clone, Debug)]
pub struct MessageBuilder {
    payload: Value,
    headers: BTreeMap<String, HeaderValue>,
}

impl MessageBuilder {
    /// Starts a message with the given payload.
    pub fn with_payload(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Starts a message copying the payload and headers of `message`.
    pub fn from_message(message: &Message) -> Self {
        let mut headers = message.headers().clone().into_entries();
        for generated in headers::GENERATED {
            headers.remove(generated);
        }
        Self {
            payload: message.payload().clone(),
            headers,
        }
    }

    /// Replaces the payload.
    pub fn set_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets an already constructed header value.
    pub fn set_header_value(mut self, name: impl Into<String>, value: HeaderValue) -> Self {
        self.headers.insert(name.into(), value);
        self
    }

    pub fn set_header_if_absent(
        mut self,
        name: impl Into<String>,
        value: impl Into<HeaderValue>,
    ) -> Self {
        self.headers.entry(name.into()).or_insert_with(|| value.into());
        self
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    /// Sets every header from an iterator, overriding existing values.
    pub fn set_multiple_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<HeaderValue>,
    {
        for (name, value) in headers {
            self.headers.insert(name.into(), value.into());
        }
        self
    }

    pub fn set_reply_channel(self, channel: ChannelRef) -> Self {
        self.set_header(headers::REPLY_CHANNEL, channel)
    }

    /// Sets the reply channel by name; it is resolved when the reply is produced.
    pub fn set_reply_channel_name(self, channel: impl Into<String>) -> Self {
        self.set_header(headers::REPLY_CHANNEL, channel.into())
    }

    pub fn set_error_channel(self, channel: ChannelRef) -> Self {
        self.set_header(headers::ERROR_CHANNEL, channel)
    }

    pub fn set_error_channel_name(self, channel: impl Into<String>) -> Self {
        self.set_header(headers::ERROR_CHANNEL, channel.into())
    }

    pub fn set_content_type(self, media_type: &MediaType) -> Self {
        self.set_header(headers::CONTENT_TYPE, media_type.to_string())
    }

    /// Returns `true` if a header named `name` has been set.
    pub fn contains_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Builds the message.
    ///
    /// Fails with [`MessagingError::InvalidArgument`] when the payload is `null`.
    pub fn build(mut self) -> MessagingResult<Message> {
        if self.payload.is_null() {
            return Err(MessagingError::invalid_argument(
                "message payload cannot be null",
            ));
        }

        self.headers.insert(
            headers::ID.to_string(),
            HeaderValue::from(Uuid::new_v4().to_string()),
        );
        self.headers.insert(
            headers::TIMESTAMP.to_string(),
            HeaderValue::from(current_millis()),
        );

        Ok(Message::new(
            self.payload,
            MessageHeaders::from_entries(self.headers),
        ))
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelRef, QueueChannel};
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_build_keeps_payload_and_headers() {
        let message = MessageBuilder::with_payload(json!({"amount": 100}))
            .set_header("token", "abc")
            .set_header("retries", 3)
            .build()
            .unwrap();

        assert_eq!(message.payload(), &json!({"amount": 100}));
        assert_eq!(message.headers().get_str("token"), Some("abc"));
        assert_eq!(message.headers().get_value("retries"), Some(&json!(3)));
        assert!(!message.id().is_empty());
        assert!(message.headers().timestamp().is_some());
    }

    #[test]
    fn test_null_payload_is_rejected() {
        let result = MessageBuilder::with_payload(Value::Null).build();
        assert!(matches!(result, Err(MessagingError::InvalidArgument(_))));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let first = MessageBuilder::with_payload("a").build().unwrap();
        let mut ids = HashSet::new();
        ids.insert(first.id().to_string());
        for _ in 0..100 {
            let derived = MessageBuilder::from_message(&first).build().unwrap();
            assert!(ids.insert(derived.id().to_string()));
        }
    }

    #[test]
    fn test_from_message_copies_headers() {
        let original = MessageBuilder::with_payload("a")
            .set_header("type", "public")
            .build()
            .unwrap();
        let derived = MessageBuilder::from_message(&original)
            .set_payload("b")
            .build()
            .unwrap();

        assert_eq!(derived.payload(), &json!("b"));
        assert_eq!(derived.headers().get_str("type"), Some("public"));
        assert_ne!(derived.id(), original.id());
    }

    #[test]
    fn test_header_if_absent_and_remove() {
        let message = MessageBuilder::with_payload(1)
            .set_header("a", "first")
            .set_header_if_absent("a", "second")
            .set_header_if_absent("b", "second")
            .set_header("c", true)
            .remove_header("c")
            .build()
            .unwrap();

        assert_eq!(message.headers().get_str("a"), Some("first"));
        assert_eq!(message.headers().get_str("b"), Some("second"));
        assert!(!message.headers().contains("c"));
    }

    #[test]
    fn test_reply_channel_header_holds_channel() {
        let channel = ChannelRef::pollable(QueueChannel::create("replies"));
        let message = MessageBuilder::with_payload(1)
            .set_reply_channel(channel.clone())
            .build()
            .unwrap();

        let header = message.headers().reply_channel().and_then(HeaderValue::as_channel);
        assert!(header.is_some_and(|h| h.ptr_eq(&channel)));
    }
}
