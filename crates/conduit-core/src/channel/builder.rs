use crate::error::MessagingResult;
use crate::reference::ReferenceSearchService;

use super::{ChannelRef, DirectChannel, PublishSubscribeChannel, QueueChannel, QueueDiscipline};

/// Describes a channel to be created when the messaging system is built.
pub trait MessageChannelBuilder: Send + Sync {
    fn channel_name(&self) -> &str;

    /// Whether the built channel is pollable. Decides the consumer strategy
    /// of the endpoints reading from it.
    fn is_pollable(&self) -> bool;

    fn required_reference_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn build(&self, references: &dyn ReferenceSearchService) -> MessagingResult<ChannelRef>;
}

#[derive(Clone)]
enum ChannelKind {
    Direct,
    Queue {
        discipline: QueueDiscipline,
        acknowledging: bool,
    },
    PublishSubscribe,
    Instance(ChannelRef),
}

/// Builder for the built-in channel types or an already created channel.
#[derive(Clone)]
pub struct SimpleMessageChannelBuilder {
    name: String,
    kind: ChannelKind,
}

impl SimpleMessageChannelBuilder {
    /// Wraps an existing channel. `name` overrides the channel's own name for lookups.
    pub fn create(name: impl Into<String>, channel: ChannelRef) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Instance(channel),
        }
    }

    pub fn create_direct_message_channel(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Direct,
        }
    }

    pub fn create_queue_channel(name: impl Into<String>) -> Self {
        Self::create_queue_channel_with_discipline(name, QueueDiscipline::Fifo)
    }

    pub fn create_queue_channel_with_discipline(
        name: impl Into<String>,
        discipline: QueueDiscipline,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Queue {
                discipline,
                acknowledging: false,
            },
        }
    }

    pub fn create_publish_subscribe_channel(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::PublishSubscribe,
        }
    }

    /// Makes a queue channel attach acknowledgement callbacks to received
    /// messages. No effect on other channel types.
    pub fn with_acknowledgement(mut self) -> Self {
        if let ChannelKind::Queue { acknowledging, .. } = &mut self.kind {
            *acknowledging = true;
        }
        self
    }
}

impl MessageChannelBuilder for SimpleMessageChannelBuilder {
    fn channel_name(&self) -> &str {
        &self.name
    }

    fn is_pollable(&self) -> bool {
        match &self.kind {
            ChannelKind::Queue { .. } => true,
            ChannelKind::Instance(channel) => channel.is_pollable(),
            ChannelKind::Direct | ChannelKind::PublishSubscribe => false,
        }
    }

    fn build(&self, _references: &dyn ReferenceSearchService) -> MessagingResult<ChannelRef> {
        let channel = match &self.kind {
            ChannelKind::Direct => ChannelRef::subscribable(DirectChannel::create(&self.name)),
            ChannelKind::Queue {
                discipline,
                acknowledging: true,
            } => ChannelRef::pollable(QueueChannel::acknowledging(&self.name, *discipline)),
            ChannelKind::Queue { discipline, .. } => {
                ChannelRef::pollable(QueueChannel::with_discipline(&self.name, *discipline))
            }
            ChannelKind::PublishSubscribe => {
                ChannelRef::subscribable(PublishSubscribeChannel::create(&self.name))
            }
            ChannelKind::Instance(channel) => channel.clone(),
        };
        Ok(channel)
    }
}
