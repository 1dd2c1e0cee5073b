use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{ConsumerLifecycle, ConsumerState, MessageHandlerConsumerBuilder, PollingMetadata};
use crate::channel::{ChannelRef, SubscribableChannel};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::{BuildContext, MessageHandler, MessageHandlerBuilder};

/// A consumer whose handler is subscribed to a subscribable channel.
///
/// Running means being subscribed; messages are handled inside the sender's
/// `send` call.
pub struct EventDrivenConsumer {
    name: String,
    channel: Arc<dyn SubscribableChannel>,
    handler: Arc<dyn MessageHandler>,
    state: Mutex<ConsumerState>,
}

impl EventDrivenConsumer {
    pub fn new(
        name: impl Into<String>,
        channel: Arc<dyn SubscribableChannel>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            handler,
            state: Mutex::new(ConsumerState::Created),
        }
    }
}

#[async_trait]
impl ConsumerLifecycle for EventDrivenConsumer {
    fn consumer_name(&self) -> &str {
        &self.name
    }

    fn is_running_in_separate_thread(&self) -> bool {
        false
    }

    async fn run(&self) -> MessagingResult<()> {
        let mut state = self.state.lock();
        if *state == ConsumerState::Created {
            self.channel.subscribe(Arc::clone(&self.handler))?;
            *state = ConsumerState::Running;
            debug!(consumer = %self.name, channel = %self.channel.name(), "Subscribed");
        }
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if *state == ConsumerState::Running {
            self.channel.unsubscribe(&self.handler);
            debug!(consumer = %self.name, channel = %self.channel.name(), "Unsubscribed");
        }
        *state = ConsumerState::Stopped;
    }

    fn state(&self) -> ConsumerState {
        *self.state.lock()
    }
}

/// Builds [`EventDrivenConsumer`]s for subscribable input channels.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventDrivenConsumerBuilder;

impl MessageHandlerConsumerBuilder for EventDrivenConsumerBuilder {
    fn is_supporting(&self, _handler: &dyn MessageHandlerBuilder, channel: &ChannelRef) -> bool {
        !channel.is_pollable()
    }

    fn build(
        &self,
        context: &BuildContext,
        channel: &ChannelRef,
        handler: &dyn MessageHandlerBuilder,
        _metadata: &PollingMetadata,
    ) -> MessagingResult<Arc<dyn ConsumerLifecycle>> {
        let subscribable = channel.as_subscribable().ok_or_else(|| {
            MessagingError::configuration(format!(
                "event-driven consumer needs a subscribable channel, '{}' is pollable",
                channel.name()
            ))
        })?;
        Ok(Arc::new(EventDrivenConsumer::new(
            handler.endpoint_id().unwrap_or(channel.name()),
            Arc::clone(subscribable),
            handler.build(context)?,
        )))
    }
}
