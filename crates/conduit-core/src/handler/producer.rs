use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{MessageHandler, MessageProcessor};
use crate::channel::{ChannelResolver, resolve_channel_header};
use crate::error::{MessagingError, MessagingResult};
use crate::message::Message;

/// Runs a processor and forwards its reply.
///
/// The reply goes to the output channel when one is configured, otherwise to
/// the channel named by the reply-channel header. A reply with no destination
/// is dropped.
pub struct RequestReplyProducer {
    endpoint_id: String,
    processor: Arc<dyn MessageProcessor>,
    output_channel_name: Option<String>,
    channels: Arc<dyn ChannelResolver>,
    requires_reply: bool,
}

impl RequestReplyProducer {
    pub fn new(
        endpoint_id: impl Into<String>,
        processor: Arc<dyn MessageProcessor>,
        output_channel_name: Option<String>,
        channels: Arc<dyn ChannelResolver>,
        requires_reply: bool,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            processor,
            output_channel_name,
            channels,
            requires_reply,
        }
    }
}

#[async_trait]
impl MessageHandler for RequestReplyProducer {
    async fn handle(&self, message: Message) -> MessagingResult<()> {
        let reply_header = message.headers().reply_channel().cloned();
        let Some(reply) = self.processor.process(message).await? else {
            if self.requires_reply {
                return Err(MessagingError::handler(format!(
                    "endpoint '{}' requires a reply but produced none",
                    self.endpoint_id
                )));
            }
            trace!(endpoint = %self.endpoint_id, "No reply produced");
            return Ok(());
        };

        let destination = if let Some(name) = &self.output_channel_name {
            self.channels.resolve(name)?
        } else if let Some(header) = reply.headers().reply_channel().or(reply_header.as_ref()) {
            resolve_channel_header(header, self.channels.as_ref())?
        } else {
            debug!(
                endpoint = %self.endpoint_id,
                message_id = %reply.id(),
                "Reply has no destination, dropping it"
            );
            return Ok(());
        };

        trace!(
            endpoint = %self.endpoint_id,
            channel = %destination.name(),
            "Sending reply"
        );
        destination.send(reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelRef, InMemoryChannelResolver, PollableChannel, QueueChannel};
    use crate::message::MessageBuilder;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl MessageProcessor for Echo {
        async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
            if message.payload() == &json!("silent") {
                return Ok(None);
            }
            Ok(Some(message))
        }
    }

    fn producer(
        output: Option<&str>,
        requires_reply: bool,
        resolver: Arc<InMemoryChannelResolver>,
    ) -> RequestReplyProducer {
        RequestReplyProducer::new(
            "echo",
            Arc::new(Echo),
            output.map(str::to_string),
            resolver,
            requires_reply,
        )
    }

    #[tokio::test]
    async fn test_output_channel_wins_over_reply_header() {
        let resolver = Arc::new(InMemoryChannelResolver::new());
        let output = QueueChannel::create("output");
        resolver
            .register("output", ChannelRef::pollable(Arc::clone(&output)))
            .unwrap();
        let replies = QueueChannel::create("replies");

        producer(Some("output"), false, resolver)
            .handle(
                MessageBuilder::with_payload(1)
                    .set_reply_channel(ChannelRef::pollable(Arc::clone(&replies)))
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(output.len(), 1);
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_reply_header_by_name() {
        let resolver = Arc::new(InMemoryChannelResolver::new());
        let replies = QueueChannel::create("replies");
        resolver
            .register("replies", ChannelRef::pollable(Arc::clone(&replies)))
            .unwrap();

        producer(None, false, resolver)
            .handle(
                MessageBuilder::with_payload(1)
                    .set_reply_channel_name("replies")
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();

        let reply = replies.receive().await.unwrap().unwrap();
        assert_eq!(reply.payload(), &json!(1));
    }

    #[tokio::test]
    async fn test_missing_reply_is_error_only_when_required() {
        let resolver = Arc::new(InMemoryChannelResolver::new());
        let silent = || MessageBuilder::with_payload("silent").build().unwrap();

        assert!(
            producer(None, false, Arc::clone(&resolver))
                .handle(silent())
                .await
                .is_ok()
        );
        assert!(matches!(
            producer(None, true, resolver).handle(silent()).await,
            Err(MessagingError::Handler(_))
        ));
    }
}
