use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use super::{MessageChannel, SubscribableChannel};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::MessageHandler;
use crate::message::Message;

/// Point-to-point channel handing each message to its single subscriber
/// inside the sender's call.
pub struct DirectChannel {
    name: String,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
}

impl DirectChannel {
    pub fn create(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            handler: RwLock::new(None),
        })
    }
}

#[async_trait]
impl MessageChannel for DirectChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message) -> MessagingResult<()> {
        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            return Err(MessagingError::channel_send(
                &self.name,
                "direct channel has no subscribed handler",
            ));
        };
        trace!(channel = %self.name, message_id = %message.id(), "Dispatching message");
        handler.handle(message).await
    }
}

impl SubscribableChannel for DirectChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> MessagingResult<()> {
        let mut slot = self.handler.write();
        if slot.is_some() {
            return Err(MessagingError::configuration(format!(
                "direct channel '{}' already has a subscriber",
                self.name
            )));
        }
        *slot = Some(handler);
        Ok(())
    }

    fn unsubscribe(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        let mut slot = self.handler.write();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, handler) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::CallbackHandler;
    use crate::message::MessageBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_send_without_subscriber_fails() {
        let channel = DirectChannel::create("orders");
        let message = MessageBuilder::with_payload("a").build().unwrap();

        let result = channel.send(message).await;
        assert!(matches!(result, Err(MessagingError::ChannelSend { .. })));
    }

    #[tokio::test]
    async fn test_dispatches_to_single_subscriber() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let channel = DirectChannel::create("orders");
        let handler: Arc<dyn MessageHandler> = CallbackHandler::new(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        channel.subscribe(handler.clone()).unwrap();

        channel
            .send(MessageBuilder::with_payload("a").build().unwrap())
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(channel.subscribe(handler.clone()).is_err());
        assert!(channel.unsubscribe(&handler));
        assert!(!channel.unsubscribe(&handler));
    }
}
