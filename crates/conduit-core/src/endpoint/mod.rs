//! Consumers: the running entities delivering messages to handlers.
//!
//! An event-driven consumer subscribes its handler to a subscribable channel
//! and does nothing by itself. Polling consumers and inbound channel adapters
//! run a loop ([`InterceptedConsumer`]) that stops once `stop()` is called or
//! a [`ConsumerInterceptor`] reports a reached limit.
//!
//! Which consumer an endpoint gets is decided by the first
//! [`MessageHandlerConsumerBuilder`] supporting the endpoint's input channel.

pub mod acknowledgement;
pub mod event_driven;
pub mod inbound;
pub mod interceptor;
pub mod limits;
pub mod metadata;
pub mod polling;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use acknowledgement::{
    AcknowledgementCallback, AcknowledgementStatus, NullAcknowledgementCallback,
};
pub use event_driven::{EventDrivenConsumer, EventDrivenConsumerBuilder};
pub use inbound::InboundChannelAdapterBuilder;
pub use interceptor::{ConsumerInterceptor, InterceptedConsumer, Iteration, TaskExecutor};
pub use limits::{
    LimitConsumedMessagesInterceptor, LimitExecutionAmountInterceptor,
    LimitMemoryUsageInterceptor, SignalInterceptor,
};
pub use metadata::PollingMetadata;
pub use polling::PollingConsumerBuilder;

use crate::channel::ChannelRef;
use crate::error::MessagingResult;
use crate::handler::{BuildContext, MessageHandlerBuilder};

/// Lifecycle state of a consumer. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    #[default]
    Created,
    Running,
    Stopped,
}

/// A running entity delivering messages to a handler.
#[async_trait]
pub trait ConsumerLifecycle: Send + Sync {
    fn consumer_name(&self) -> &str;

    /// Whether [`run`](Self::run) blocks until the consumer stops.
    fn is_running_in_separate_thread(&self) -> bool;

    async fn run(&self) -> MessagingResult<()>;

    /// Stops the consumer. Idempotent; a running loop ends at its next
    /// iteration boundary.
    fn stop(&self);

    fn state(&self) -> ConsumerState;

    fn is_running(&self) -> bool {
        self.state() == ConsumerState::Running
    }
}

/// Creates consumers for the endpoints it supports.
pub trait MessageHandlerConsumerBuilder: Send + Sync {
    fn is_supporting(&self, handler: &dyn MessageHandlerBuilder, channel: &ChannelRef) -> bool;

    fn build(
        &self,
        context: &BuildContext,
        channel: &ChannelRef,
        handler: &dyn MessageHandlerBuilder,
        metadata: &PollingMetadata,
    ) -> MessagingResult<Arc<dyn ConsumerLifecycle>>;
}
