use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, trace};

use super::interceptor::{InterceptedConsumer, Iteration, TaskExecutor};
use super::{ConsumerLifecycle, MessageHandlerConsumerBuilder, PollingMetadata};
use crate::channel::{ChannelRef, ChannelResolver, PollableChannel, resolve_channel_header};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::{BuildContext, MessageHandler, MessageHandlerBuilder};
use crate::message::{ErrorMessage, Message};

/// Builds polling consumers for pollable input channels.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollingConsumerBuilder;

impl MessageHandlerConsumerBuilder for PollingConsumerBuilder {
    fn is_supporting(&self, _handler: &dyn MessageHandlerBuilder, channel: &ChannelRef) -> bool {
        channel.is_pollable()
    }

    fn build(
        &self,
        context: &BuildContext,
        channel: &ChannelRef,
        handler: &dyn MessageHandlerBuilder,
        metadata: &PollingMetadata,
    ) -> MessagingResult<Arc<dyn ConsumerLifecycle>> {
        let pollable = channel.as_pollable().ok_or_else(|| {
            MessagingError::configuration(format!(
                "polling consumer needs a pollable channel, '{}' is subscribable",
                channel.name()
            ))
        })?;
        let endpoint_id = handler
            .endpoint_id()
            .unwrap_or(&metadata.endpoint_id)
            .to_string();
        let task = PollerTask {
            endpoint_id: endpoint_id.clone(),
            channel: Arc::clone(pollable),
            handler: handler.build(context)?,
            channels: Arc::clone(&context.channels),
            error_channel_name: metadata.error_channel_name.clone(),
            fixed_rate: metadata.fixed_rate(),
            max_message_per_poll: metadata.max_message_per_poll.max(1),
        };
        Ok(Arc::new(
            InterceptedConsumer::new(endpoint_id, Arc::new(task), metadata.consumer_interceptors()?)
                .with_initial_delay(metadata.initial_delay()),
        ))
    }
}

/// One poll: receive, handle, acknowledge.
pub(crate) struct PollerTask {
    endpoint_id: String,
    channel: Arc<dyn PollableChannel>,
    handler: Arc<dyn MessageHandler>,
    channels: Arc<dyn ChannelResolver>,
    error_channel_name: Option<String>,
    fixed_rate: Duration,
    max_message_per_poll: usize,
}

impl PollerTask {
    /// Handles one message. Returns whether handling succeeded.
    async fn handle(&self, message: Message) -> MessagingResult<bool> {
        let acknowledgement = message
            .headers()
            .acknowledgement_callback()
            .filter(|callback| callback.is_auto_ack());

        match self.handler.handle(message.clone()).await {
            Ok(()) => {
                if let Some(callback) = acknowledgement {
                    callback.accept()?;
                }
                Ok(true)
            }
            Err(error) => {
                if let Some(callback) = acknowledgement {
                    callback.requeue()?;
                }
                self.redirect_error(&error, &message).await;
                Ok(false)
            }
        }
    }

    /// Sends an error message to the error channel of the failed message, or
    /// of the poller, and logs the failure when there is none.
    async fn redirect_error(&self, failure: &MessagingError, message: &Message) {
        let error_channel = match message.headers().error_channel() {
            Some(header) => Some(resolve_channel_header(header, self.channels.as_ref())),
            None => self
                .error_channel_name
                .as_deref()
                .map(|name| self.channels.resolve(name)),
        };
        let Some(error_channel) = error_channel else {
            error!(
                endpoint = %self.endpoint_id,
                message_id = %message.id(),
                error = %failure,
                "Message handling failed"
            );
            return;
        };

        let sent = match error_channel {
            Ok(channel) => match ErrorMessage::create(failure, message) {
                Ok(error_message) => channel.send(error_message).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            error!(
                endpoint = %self.endpoint_id,
                message_id = %message.id(),
                error = %failure,
                redirect_error = %e,
                "Message handling failed and the error could not be redirected"
            );
        }
    }
}

#[async_trait]
impl TaskExecutor for PollerTask {
    async fn execute(&self, iteration: &Iteration<'_>) -> MessagingResult<()> {
        for index in 0..self.max_message_per_poll {
            let received = if index == 0 {
                tokio::select! {
                    _ = iteration.cancellation().cancelled() => return Ok(()),
                    received = self.channel.receive_with_timeout(self.fixed_rate) => received?,
                }
            } else if iteration.should_stop() {
                break;
            } else {
                self.channel.receive().await?
            };
            let Some(message) = received else {
                break;
            };
            trace!(endpoint = %self.endpoint_id, message_id = %message.id(), "Polled message");
            if self.handle(message).await? {
                iteration.message_handled().await?;
            }
        }
        Ok(())
    }
}
