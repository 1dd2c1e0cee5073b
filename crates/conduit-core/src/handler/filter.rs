use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{BuildContext, EndpointSettings, MessageHandlerBuilder, MessageProcessor};
use crate::channel::ChannelResolver;
use crate::error::{MessagingError, MessagingResult};
use crate::introspection::{InterfaceParameter, InterfaceToCall, MethodSignatureResolver, ReturnType};
use crate::message::Message;

type SelectorFn = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Endpoint letting through only the messages its selector accepts.
///
/// A rejected message is discarded, sent to the discard channel, or turned
/// into an error, depending on configuration.
#[derive(Clone)]
pub struct MessageFilterBuilder {
    settings: EndpointSettings,
    selector: SelectorFn,
    discard_channel_name: Option<String>,
    throw_on_discard: bool,
}

impl MessageFilterBuilder {
    pub fn create_with_closure<F>(selector: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        Self {
            settings: EndpointSettings::default(),
            selector: Arc::new(selector),
            discard_channel_name: None,
            throw_on_discard: false,
        }
    }

    pub fn with_discard_channel_name(mut self, channel: impl Into<String>) -> Self {
        self.discard_channel_name = Some(channel.into());
        self
    }

    pub fn with_throw_exception_on_discard(mut self, throw: bool) -> Self {
        self.throw_on_discard = throw;
        self
    }
}

impl MessageHandlerBuilder for MessageFilterBuilder {
    fn settings(&self) -> &EndpointSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut EndpointSettings {
        &mut self.settings
    }

    fn intercepted_interface(
        &self,
        _signatures: &dyn MethodSignatureResolver,
    ) -> MessagingResult<InterfaceToCall> {
        Ok(InterfaceToCall::create("conduit::Filter", "accept")
            .with_parameter(InterfaceParameter::value("payload"))
            .with_return_type(ReturnType::Value))
    }

    fn build_processor(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        Ok(Arc::new(FilterProcessor {
            name: self.endpoint_id().unwrap_or("filter").to_string(),
            selector: Arc::clone(&self.selector),
            discard_channel_name: self.discard_channel_name.clone(),
            throw_on_discard: self.throw_on_discard,
            channels: Arc::clone(&context.channels),
        }))
    }
}

struct FilterProcessor {
    name: String,
    selector: SelectorFn,
    discard_channel_name: Option<String>,
    throw_on_discard: bool,
    channels: Arc<dyn ChannelResolver>,
}

#[async_trait]
impl MessageProcessor for FilterProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        if (self.selector)(&message) {
            return Ok(Some(message));
        }

        let message_id = message.id().to_string();
        if let Some(name) = &self.discard_channel_name {
            self.channels.resolve(name)?.send(message).await?;
        }
        if self.throw_on_discard {
            return Err(MessagingError::handler(format!(
                "filter '{}' rejected message {message_id}",
                self.name
            )));
        }
        debug!(filter = %self.name, message_id = %message_id, "Message discarded");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelRef, QueueChannel};
    use crate::handler::testing::{context_with, empty_context};
    use crate::message::MessageBuilder;
    use crate::reference::InMemoryReferenceSearchService;
    use serde_json::json;

    fn even() -> MessageFilterBuilder {
        MessageFilterBuilder::create_with_closure(|m| {
            m.payload().as_i64().is_some_and(|n| n % 2 == 0)
        })
    }

    fn message(n: i64) -> Message {
        MessageBuilder::with_payload(n).build().unwrap()
    }

    #[tokio::test]
    async fn test_accepts_and_discards() {
        let processor = even().build_processor(&empty_context()).unwrap();
        assert_eq!(
            processor.process(message(2)).await.unwrap().unwrap().payload(),
            &json!(2)
        );
        assert!(processor.process(message(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_discard_channel_receives_rejected() {
        let discarded = QueueChannel::create("discarded");
        let context = context_with(
            InMemoryReferenceSearchService::new(),
            vec![ChannelRef::pollable(Arc::clone(&discarded))],
        );
        let processor = even()
            .with_discard_channel_name("discarded")
            .build_processor(&context)
            .unwrap();

        assert!(processor.process(message(3)).await.unwrap().is_none());
        assert_eq!(discarded.len(), 1);
    }

    #[tokio::test]
    async fn test_throw_on_discard() {
        let processor = even()
            .with_throw_exception_on_discard(true)
            .build_processor(&empty_context())
            .unwrap();
        assert!(matches!(
            processor.process(message(3)).await,
            Err(MessagingError::Handler(_))
        ));
    }
}
