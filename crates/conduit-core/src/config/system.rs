use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::channel::{ChannelRef, ChannelResolver, InMemoryChannelResolver};
use crate::endpoint::ConsumerLifecycle;
use crate::error::{MessagingError, MessagingResult};
use crate::gateway::GatewayProxy;

/// A built messaging system: its channels, gateways and consumers.
///
/// Nothing is registered after construction. Event-driven consumers are
/// already subscribed; separately running consumers are started by name,
/// usually each on its own task.
pub struct ConfiguredMessagingSystem {
    channels: Arc<InMemoryChannelResolver>,
    gateways: BTreeMap<String, GatewayProxy>,
    event_driven: Vec<Arc<dyn ConsumerLifecycle>>,
    separately_running: BTreeMap<String, Arc<dyn ConsumerLifecycle>>,
}

impl ConfiguredMessagingSystem {
    pub(crate) fn new(
        channels: Arc<InMemoryChannelResolver>,
        gateways: BTreeMap<String, GatewayProxy>,
    ) -> Self {
        Self {
            channels,
            gateways,
            event_driven: Vec::new(),
            separately_running: BTreeMap::new(),
        }
    }

    /// Takes ownership of a built consumer. Consumers that do not run in a
    /// separate loop are started right away.
    pub(crate) async fn add_consumer(
        &mut self,
        consumer: Arc<dyn ConsumerLifecycle>,
    ) -> MessagingResult<()> {
        if !consumer.is_running_in_separate_thread() {
            consumer.run().await?;
            self.event_driven.push(consumer);
            return Ok(());
        }
        let name = consumer.consumer_name().to_string();
        if self.separately_running.contains_key(&name) {
            return Err(MessagingError::configuration(format!(
                "consumer '{name}' is registered twice"
            )));
        }
        self.separately_running.insert(name, consumer);
        Ok(())
    }

    pub fn get_message_channel_by_name(&self, name: &str) -> MessagingResult<ChannelRef> {
        self.channels.resolve(name)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.channel_names()
    }

    pub fn get_gateway_by_name(&self, reference_name: &str) -> MessagingResult<&GatewayProxy> {
        self.gateways
            .get(reference_name)
            .ok_or_else(|| MessagingError::GatewayNotFound(reference_name.to_string()))
    }

    /// Reference names of every gateway.
    pub fn gateway_list(&self) -> Vec<&str> {
        self.gateways.keys().map(String::as_str).collect()
    }

    pub fn list_of_separately_running_consumers(&self) -> Vec<String> {
        self.separately_running.keys().cloned().collect()
    }

    pub fn consumer(&self, name: &str) -> MessagingResult<Arc<dyn ConsumerLifecycle>> {
        self.separately_running
            .get(name)
            .cloned()
            .ok_or_else(|| MessagingError::ConsumerNotFound(name.to_string()))
    }

    /// Runs the consumer until it stops, by `stop()` or one of its limits.
    pub async fn run_separately_running_consumer_by(&self, name: &str) -> MessagingResult<()> {
        let consumer = self.consumer(name)?;
        info!(consumer = %name, "Running consumer");
        consumer.run().await
    }

    /// Asks the consumer to stop at its next loop iteration.
    pub fn stop_separately_running_consumer_by(&self, name: &str) -> MessagingResult<()> {
        self.consumer(name)?.stop();
        debug!(consumer = %name, "Stop requested");
        Ok(())
    }

    /// Stops every consumer, unsubscribing event-driven ones.
    pub fn shutdown(&self) {
        for consumer in self
            .separately_running
            .values()
            .chain(&self.event_driven)
        {
            consumer.stop();
        }
        info!(
            consumers = self.separately_running.len() + self.event_driven.len(),
            "Messaging system shut down"
        );
    }
}

impl std::fmt::Debug for ConfiguredMessagingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredMessagingSystem")
            .field("channels", &self.channels.channel_names())
            .field("gateways", &self.gateways.keys().collect::<Vec<_>>())
            .field("event_driven", &self.event_driven.len())
            .field(
                "separately_running",
                &self.separately_running.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}
