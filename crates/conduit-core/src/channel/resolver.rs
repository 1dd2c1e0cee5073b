use std::collections::HashMap;

use parking_lot::RwLock;

use super::ChannelRef;
use crate::error::{MessagingError, MessagingResult};
use crate::message::HeaderValue;

/// Looks up channels by name.
pub trait ChannelResolver: Send + Sync {
    /// Returns the channel registered under `name`, or `ChannelNotFound`.
    fn resolve(&self, name: &str) -> MessagingResult<ChannelRef>;

    fn has_channel(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }
}

/// Resolves a reply or error channel header, which holds either a live
/// channel or the name of a registered one.
pub fn resolve_channel_header(
    value: &HeaderValue,
    resolver: &dyn ChannelResolver,
) -> MessagingResult<ChannelRef> {
    match value {
        HeaderValue::Channel(channel) => Ok(channel.clone()),
        other => match other.as_str() {
            Some(name) => resolver.resolve(name),
            None => Err(MessagingError::invalid_argument(format!(
                "header value {other:?} is neither a channel nor a channel name"
            ))),
        },
    }
}

/// A [`ChannelResolver`] backed by a map, filled while the system is built.
#[derive(Default)]
pub struct InMemoryChannelResolver {
    channels: RwLock<HashMap<String, ChannelRef>>,
}

impl InMemoryChannelResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `channel` under `name`. A name can be registered only once.
    pub fn register(&self, name: impl Into<String>, channel: ChannelRef) -> MessagingResult<()> {
        let name = name.into();
        let mut channels = self.channels.write();
        if channels.contains_key(&name) {
            return Err(MessagingError::configuration(format!(
                "channel '{name}' is already registered"
            )));
        }
        channels.insert(name, channel);
        Ok(())
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ChannelResolver for InMemoryChannelResolver {
    fn resolve(&self, name: &str) -> MessagingResult<ChannelRef> {
        self.channels
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MessagingError::ChannelNotFound(name.to_string()))
    }

    fn has_channel(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }
}
