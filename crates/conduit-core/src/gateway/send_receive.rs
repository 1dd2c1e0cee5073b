use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::channel::{ChannelRef, PollableChannel, QueueChannel};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::MessageProcessor;
use crate::message::{ErrorMessage, Message, MessageBuilder};

/// How a gateway obtains the reply to its request.
pub(crate) enum ReplyStrategy {
    /// The method returns nothing; the gateway returns right after sending.
    Void,
    /// A one-shot reply channel is attached to every request.
    Inline,
    /// The reply is received from a configured channel without waiting.
    Receive(Arc<dyn PollableChannel>),
    /// The reply is awaited on a configured channel for at most `timeout`.
    Timeout {
        channel: Arc<dyn PollableChannel>,
        timeout: Duration,
    },
}

impl ReplyStrategy {
    fn reply_channel(&self) -> Option<ChannelRef> {
        match self {
            Self::Void | Self::Inline => None,
            Self::Receive(channel) | Self::Timeout { channel, .. } => {
                Some(ChannelRef::Pollable(Arc::clone(channel)))
            }
        }
    }
}

/// Sends the request and collects the reply. Around interceptors of a
/// gateway wrap this processor.
pub(crate) struct SendAndReceiveProcessor {
    pub(crate) gateway: String,
    pub(crate) request_channel: ChannelRef,
    pub(crate) error_channel: Option<ChannelRef>,
    pub(crate) strategy: ReplyStrategy,
}

impl SendAndReceiveProcessor {
    /// Attaches the reply channel and the error channel, which defaults to
    /// the reply channel.
    fn prepare(&self, message: Message) -> MessagingResult<(Message, Option<Arc<QueueChannel>>)> {
        let mut builder = MessageBuilder::from_message(&message);
        let mut inline = None;
        let reply_channel = match &self.strategy {
            ReplyStrategy::Inline => {
                let channel = QueueChannel::create(format!("{}.reply", self.gateway));
                inline = Some(Arc::clone(&channel));
                builder = builder.set_reply_channel(ChannelRef::pollable(channel.clone()));
                Some(ChannelRef::pollable(channel))
            }
            strategy => strategy.reply_channel(),
        };
        if let Some(error_channel) = self.error_channel.clone().or(reply_channel) {
            builder = builder.set_error_channel(error_channel);
        }
        Ok((builder.build()?, inline))
    }

    async fn send(&self, message: Message) -> MessagingResult<bool> {
        let Err(failure) = self.request_channel.send(message.clone()).await else {
            return Ok(true);
        };
        let Some(error_channel) = &self.error_channel else {
            return Err(failure);
        };
        debug!(
            gateway = %self.gateway,
            error_channel = %error_channel.name(),
            error = %failure,
            "Redirecting gateway failure to error channel"
        );
        error_channel
            .send(ErrorMessage::create(&failure, &message)?)
            .await?;
        Ok(false)
    }

    async fn receive(&self, inline: Option<Arc<QueueChannel>>) -> MessagingResult<Option<Message>> {
        match &self.strategy {
            ReplyStrategy::Void => Ok(None),
            ReplyStrategy::Inline => match inline {
                Some(channel) => channel.receive().await,
                None => Ok(None),
            },
            ReplyStrategy::Receive(channel) => channel.receive().await,
            ReplyStrategy::Timeout { channel, timeout } => {
                match channel.receive_with_timeout(*timeout).await? {
                    Some(reply) => Ok(Some(reply)),
                    None => Err(MessagingError::ReplyTimeout {
                        gateway: self.gateway.clone(),
                        timeout_ms: i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX),
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl MessageProcessor for SendAndReceiveProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        let (message, inline) = self.prepare(message)?;
        trace!(
            gateway = %self.gateway,
            channel = %self.request_channel.name(),
            message_id = %message.id(),
            "Sending gateway request"
        );
        if !self.send(message).await? {
            return Ok(None);
        }

        match self.receive(inline).await? {
            Some(reply) if reply.is_error_message() => Err(reply
                .to_error()
                .unwrap_or_else(|| MessagingError::handler("error reply without description"))),
            reply => Ok(reply),
        }
    }
}
