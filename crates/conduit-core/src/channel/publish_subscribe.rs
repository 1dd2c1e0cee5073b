use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use super::{MessageChannel, SubscribableChannel};
use crate::error::MessagingResult;
use crate::handler::MessageHandler;
use crate::message::Message;

/// Broadcasts every message to all subscribers, in subscription order.
///
/// A failing subscriber aborts the broadcast and its error is returned to the
/// sender. Subscribers that already received the message are not rolled back.
pub struct PublishSubscribeChannel {
    name: String,
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
}

impl PublishSubscribeChannel {
    pub fn create(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            handlers: RwLock::new(Vec::new()),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

#[async_trait]
impl MessageChannel for PublishSubscribeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message) -> MessagingResult<()> {
        let handlers = self.handlers.read().clone();
        trace!(
            channel = %self.name,
            subscribers = handlers.len(),
            "Broadcasting message"
        );
        for handler in handlers {
            handler.handle(message.clone()).await?;
        }
        Ok(())
    }
}

impl SubscribableChannel for PublishSubscribeChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> MessagingResult<()> {
        self.handlers.write().push(handler);
        Ok(())
    }

    fn unsubscribe(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        handlers.len() != before
    }
}
