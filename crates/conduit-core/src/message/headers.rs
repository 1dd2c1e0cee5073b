//! Message headers and the reserved header names.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::channel::ChannelRef;
use crate::endpoint::AcknowledgementCallback;

/// Unique message identifier, generated on every build.
pub const ID: &str = "id";
/// Creation time in milliseconds since the Unix epoch.
pub const TIMESTAMP: &str = "timestamp";
/// Media type of the payload.
pub const CONTENT_TYPE: &str = "content-type";
/// Channel (or channel name) a reply should be delivered to.
pub const REPLY_CHANNEL: &str = "reply-channel";
/// Channel (or channel name) failures should be redirected to.
pub const ERROR_CHANNEL: &str = "error-channel";
/// Correlates messages that belong together.
pub const CORRELATION_ID: &str = "correlation-id";
/// Position of a message within a sequence.
pub const SEQUENCE_NUMBER: &str = "sequence-number";
/// Size of the sequence a message belongs to.
pub const SEQUENCE_SIZE: &str = "sequence-size";
/// Name of another header holding the acknowledgement callback.
pub const CONSUMER_ACK_HEADER_LOCATION: &str = "consumer-ack-header-location";
/// Header used for the acknowledgement callback when none is specified.
pub const CONSUMER_ACK_CALLBACK: &str = "consumer-acknowledgement-callback";
/// Description of the failure carried by an error message.
pub const EXCEPTION_MESSAGE: &str = "exception-message";
/// Identifier of the message whose handling failed.
pub const FAILED_MESSAGE_ID: &str = "failed-message-id";

/// Headers that are managed by the builder and never copied between messages.
pub(crate) const GENERATED: [&str; 2] = [ID, TIMESTAMP];

/// A single header value.
///
/// Most headers are plain JSON values. Back-references to channels and
/// acknowledgement callbacks are kept as live objects so they survive
/// without a registry lookup.
#[derive(Clone)]
pub enum HeaderValue {
    /// A JSON value.
    Value(Value),
    /// A live channel reference.
    Channel(ChannelRef),
    /// An acknowledgement callback for the consumer that receives the message.
    Acknowledgement(Arc<dyn AcknowledgementCallback>),
}

impl HeaderValue {
    /// Returns the JSON value, if this header holds one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the string content, if this header holds a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    /// Returns the channel, if this header holds one.
    pub fn as_channel(&self) -> Option<&ChannelRef> {
        match self {
            Self::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    /// Returns the acknowledgement callback, if this header holds one.
    pub fn as_acknowledgement(&self) -> Option<&Arc<dyn AcknowledgementCallback>> {
        match self {
            Self::Acknowledgement(callback) => Some(callback),
            _ => None,
        }
    }
}

impl fmt::Debug for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value}"),
            Self::Channel(channel) => write!(f, "Channel({})", channel.name()),
            Self::Acknowledgement(_) => f.write_str("Acknowledgement"),
        }
    }
}

impl PartialEq for HeaderValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a == b,
            (Self::Channel(a), Self::Channel(b)) => a.ptr_eq(b),
            (Self::Acknowledgement(a), Self::Acknowledgement(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Value> for HeaderValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<i32> for HeaderValue {
    fn from(value: i32) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<u64> for HeaderValue {
    fn from(value: u64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<usize> for HeaderValue {
    fn from(value: usize) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<ChannelRef> for HeaderValue {
    fn from(channel: ChannelRef) -> Self {
        Self::Channel(channel)
    }
}

impl From<Arc<dyn AcknowledgementCallback>> for HeaderValue {
    fn from(callback: Arc<dyn AcknowledgementCallback>) -> Self {
        Self::Acknowledgement(callback)
    }
}

/// Ordered, immutable header map of a [`Message`](super::Message).
#[derive(Clone, Default, PartialEq)]
pub struct MessageHeaders {
    entries: BTreeMap<String, HeaderValue>,
}

impl MessageHeaders {
    pub(crate) fn from_entries(entries: BTreeMap<String, HeaderValue>) -> Self {
        Self { entries }
    }

    pub(crate) fn into_entries(self) -> BTreeMap<String, HeaderValue> {
        self.entries
    }

    /// Returns the header stored under `name`.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries.get(name)
    }

    /// Returns the JSON value stored under `name`.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(HeaderValue::as_value)
    }

    /// Returns the string stored under `name`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::as_str)
    }

    /// Returns `true` if a header named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all headers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The message id.
    pub fn id(&self) -> &str {
        self.get_str(ID).unwrap_or_default()
    }

    /// The creation timestamp in milliseconds.
    pub fn timestamp(&self) -> Option<i64> {
        self.get_value(TIMESTAMP).and_then(Value::as_i64)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_str(CONTENT_TYPE)
    }

    pub fn reply_channel(&self) -> Option<&HeaderValue> {
        self.get(REPLY_CHANNEL)
    }

    pub fn error_channel(&self) -> Option<&HeaderValue> {
        self.get(ERROR_CHANNEL)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.get_str(CORRELATION_ID)
    }

    /// Follows [`CONSUMER_ACK_HEADER_LOCATION`] to the acknowledgement callback.
    pub fn acknowledgement_callback(&self) -> Option<Arc<dyn AcknowledgementCallback>> {
        let location = self.get_str(CONSUMER_ACK_HEADER_LOCATION)?;
        self.get(location)
            .and_then(HeaderValue::as_acknowledgement)
            .cloned()
    }

    /// Returns all JSON-valued headers as an object.
    ///
    /// Channel and acknowledgement headers are not representable and are skipped.
    pub fn to_value_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_value().map(|value| (k.clone(), value.clone())))
            .collect()
    }
}

impl fmt::Debug for MessageHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::NullAcknowledgementCallback;
    use serde_json::json;

    #[test]
    fn test_value_map_skips_live_headers() {
        let callback: Arc<dyn AcknowledgementCallback> = NullAcknowledgementCallback::create();
        let mut entries = BTreeMap::new();
        entries.insert("type".to_string(), HeaderValue::from("private"));
        entries.insert("acker".to_string(), HeaderValue::from(callback));
        let headers = MessageHeaders::from_entries(entries);

        let map = headers.to_value_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map["type"], json!("private"));
    }

    #[test]
    fn test_acknowledgement_callback_follows_location() {
        let callback: Arc<dyn AcknowledgementCallback> = NullAcknowledgementCallback::create();
        let mut entries = BTreeMap::new();
        entries.insert(
            CONSUMER_ACK_HEADER_LOCATION.to_string(),
            HeaderValue::from("amqpAcker"),
        );
        entries.insert("amqpAcker".to_string(), HeaderValue::from(callback.clone()));
        let headers = MessageHeaders::from_entries(entries);

        let found = headers.acknowledgement_callback();
        assert!(found.is_some_and(|f| Arc::ptr_eq(&f, &callback)));
    }
}
