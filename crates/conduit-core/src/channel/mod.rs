//! Message channels.
//!
//! A channel is a named transport with one of two natures:
//!
//! - **Subscribable** channels ([`DirectChannel`], [`PublishSubscribeChannel`])
//!   hand messages to their subscribers inside the caller's `send`.
//! - **Pollable** channels ([`QueueChannel`]) buffer messages until a consumer
//!   receives them.
//!
//! [`ChannelRef`] is the type-erased handle used everywhere else; it keeps
//! the nature explicit so exactly one of the two contracts applies.

pub mod builder;
pub mod direct;
pub mod interceptor;
pub mod publish_subscribe;
pub mod queue;
pub mod resolver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use builder::{MessageChannelBuilder, SimpleMessageChannelBuilder};
pub use direct::DirectChannel;
pub use interceptor::{
    ChannelInterceptor, ChannelInterceptorBuilder, InterceptedPollableChannel,
    InterceptedSubscribableChannel,
};
pub use publish_subscribe::PublishSubscribeChannel;
pub use queue::{QueueChannel, QueueDiscipline};
pub use resolver::{ChannelResolver, InMemoryChannelResolver, resolve_channel_header};

use crate::error::MessagingResult;
use crate::handler::MessageHandler;
use crate::message::Message;

/// A named transport accepting messages.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// The channel name.
    fn name(&self) -> &str;

    /// Sends a message through the channel.
    async fn send(&self, message: Message) -> MessagingResult<()>;
}

/// A channel that pushes messages to subscribed handlers.
pub trait SubscribableChannel: MessageChannel {
    /// Subscribes a handler.
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> MessagingResult<()>;

    /// Removes a previously subscribed handler. Returns `false` if it was not subscribed.
    fn unsubscribe(&self, handler: &Arc<dyn MessageHandler>) -> bool;
}

/// A channel buffering messages until they are received.
#[async_trait]
pub trait PollableChannel: MessageChannel {
    /// Receives a message without waiting.
    async fn receive(&self) -> MessagingResult<Option<Message>>;

    /// Receives a message, waiting at most `timeout` for one to arrive.
    async fn receive_with_timeout(&self, timeout: Duration) -> MessagingResult<Option<Message>>;
}

/// A shared handle to a channel of either nature.
#[derive(Clone)]
pub enum ChannelRef {
    Subscribable(Arc<dyn SubscribableChannel>),
    Pollable(Arc<dyn PollableChannel>),
}

impl ChannelRef {
    pub fn subscribable<C: SubscribableChannel + 'static>(channel: Arc<C>) -> Self {
        Self::Subscribable(channel)
    }

    pub fn pollable<C: PollableChannel + 'static>(channel: Arc<C>) -> Self {
        Self::Pollable(channel)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Subscribable(channel) => channel.name(),
            Self::Pollable(channel) => channel.name(),
        }
    }

    pub async fn send(&self, message: Message) -> MessagingResult<()> {
        match self {
            Self::Subscribable(channel) => channel.send(message).await,
            Self::Pollable(channel) => channel.send(message).await,
        }
    }

    pub fn is_pollable(&self) -> bool {
        matches!(self, Self::Pollable(_))
    }

    pub fn as_pollable(&self) -> Option<&Arc<dyn PollableChannel>> {
        match self {
            Self::Pollable(channel) => Some(channel),
            Self::Subscribable(_) => None,
        }
    }

    pub fn as_subscribable(&self) -> Option<&Arc<dyn SubscribableChannel>> {
        match self {
            Self::Subscribable(channel) => Some(channel),
            Self::Pollable(_) => None,
        }
    }

    /// Returns `true` if both handles point at the same channel instance.
    pub fn ptr_eq(&self, other: &ChannelRef) -> bool {
        match (self, other) {
            (Self::Subscribable(a), Self::Subscribable(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Self::Pollable(a), Self::Pollable(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_pollable() { "pollable" } else { "subscribable" };
        write!(f, "ChannelRef({}, {kind})", self.name())
    }
}
