use std::sync::Arc;

use async_trait::async_trait;

use super::{BuildContext, EndpointSettings, MessageHandler, MessageHandlerBuilder, MessageProcessor};
use crate::error::{MessagingError, MessagingResult};
use crate::introspection::{InterfaceParameter, InterfaceToCall, MethodSignatureResolver, ReturnType};
use crate::message::Message;

/// Endpoint running a sequence of handlers, each one's reply feeding the next.
///
/// A stage producing no reply ends the chain. The last reply is either handed
/// to the output handler or becomes the reply of the chain itself.
#[derive(Clone, Default)]
pub struct ChainMessageHandlerBuilder {
    settings: EndpointSettings,
    stages: Vec<Arc<dyn MessageHandlerBuilder>>,
    output_handler: Option<Arc<dyn MessageHandlerBuilder>>,
}

impl ChainMessageHandlerBuilder {
    pub fn create() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn chain(self, builder: impl MessageHandlerBuilder + 'static) -> Self {
        self.chain_shared(Arc::new(builder))
    }

    pub fn chain_shared(mut self, builder: Arc<dyn MessageHandlerBuilder>) -> Self {
        self.stages.push(builder);
        self
    }

    /// Hands the final reply to `builder`, which then decides where it goes.
    pub fn with_output_message_handler(
        mut self,
        builder: impl MessageHandlerBuilder + 'static,
    ) -> Self {
        self.output_handler = Some(Arc::new(builder));
        self
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl MessageHandlerBuilder for ChainMessageHandlerBuilder {
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
        Ok(InterfaceToCall::create("conduit::Chain", "handle")
            .with_parameter(InterfaceParameter::value("payload"))
            .with_return_type(ReturnType::Message)
            .with_nullable_return())
    }

    fn required_reference_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stages
            .iter()
            .chain(&self.output_handler)
            .flat_map(|b| b.required_reference_names())
            .collect();
        names.extend(
            self.settings
                .around_interceptors
                .iter()
                .flat_map(|i| i.required_reference_names()),
        );
        names
    }

    fn build_processor(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        if self.output_handler.is_some() && self.settings.output_channel_name.is_some() {
            return Err(MessagingError::invalid_argument(format!(
                "chain '{}' can have either an output channel or an output handler, not both",
                self.endpoint_id().unwrap_or("anonymous")
            )));
        }
        let stages = self
            .stages
            .iter()
            .map(|stage| stage.build_intercepted_processor(context))
            .collect::<MessagingResult<Vec<_>>>()?;
        let output_handler = self
            .output_handler
            .as_ref()
            .map(|builder| builder.build(context))
            .transpose()?;
        Ok(Arc::new(ChainProcessor {
            stages,
            output_handler,
        }))
    }
}

struct ChainProcessor {
    stages: Vec<Arc<dyn MessageProcessor>>,
    output_handler: Option<Arc<dyn MessageHandler>>,
}

#[async_trait]
impl MessageProcessor for ChainProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        let mut current = message;
        for stage in &self.stages {
            match stage.process(current).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        match &self.output_handler {
            Some(handler) => {
                handler.handle(current).await?;
                Ok(None)
            }
            None => Ok(Some(current)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelRef, PollableChannel, QueueChannel};
    use crate::handler::service::tests::Calculator;
    use crate::handler::testing::{context_with, empty_context};
    use crate::handler::{
        EndpointSettingsExt, MessageFilterBuilder, ServiceActivatorBuilder, TransformerBuilder,
    };
    use crate::message::MessageBuilder;
    use crate::reference::InMemoryReferenceSearchService;
    use serde_json::json;

    fn sum(operand: i64) -> ServiceActivatorBuilder {
        ServiceActivatorBuilder::create_with_direct_reference(Calculator::create(operand), "sum")
    }

    fn multiply(operand: i64) -> ServiceActivatorBuilder {
        ServiceActivatorBuilder::create_with_direct_reference(
            Calculator::create(operand),
            "multiply",
        )
    }

    async fn run(chain: ChainMessageHandlerBuilder, payload: i64) -> Option<Message> {
        chain
            .build_processor(&empty_context())
            .unwrap()
            .process(MessageBuilder::with_payload(payload).build().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_arithmetic_chain() {
        // ((1 + 1) * 2 + 1) ... : 2, 4, 5, 6, 12, 13
        let chain = ChainMessageHandlerBuilder::create()
            .chain(sum(1))
            .chain(multiply(2))
            .chain(sum(1))
            .chain(sum(1))
            .chain(multiply(2))
            .chain(sum(1));
        assert_eq!(run(chain, 1).await.unwrap().payload(), &json!(13));
    }

    #[tokio::test]
    async fn test_nested_chains() {
        // 1 -> 2 -> 4 -> 5 -> 50 -> 52 -> 260 -> 261
        let inner = ChainMessageHandlerBuilder::create()
            .chain(multiply(10))
            .chain(sum(2));
        let chain = ChainMessageHandlerBuilder::create()
            .chain(sum(1))
            .chain(multiply(2))
            .chain(sum(1))
            .chain(inner)
            .chain(multiply(5))
            .chain(sum(1));
        assert_eq!(run(chain, 1).await.unwrap().payload(), &json!(261));
    }

    #[tokio::test]
    async fn test_identity_transformers_leave_payload_unchanged() {
        let identity = || TransformerBuilder::create_with_closure(|m| Ok(m.payload().clone()));
        let chain = ChainMessageHandlerBuilder::create()
            .chain(identity())
            .chain(identity())
            .chain(identity());
        assert_eq!(run(chain, 42).await.unwrap().payload(), &json!(42));
    }

    #[tokio::test]
    async fn test_stage_without_reply_stops_chain() {
        let chain = ChainMessageHandlerBuilder::create()
            .chain(MessageFilterBuilder::create_with_closure(|_| false))
            .chain(sum(1));
        assert!(run(chain, 1).await.is_none());
    }

    #[tokio::test]
    async fn test_output_handler_receives_final_message() {
        let results = QueueChannel::create("results");
        let context = context_with(
            InMemoryReferenceSearchService::new(),
            vec![ChannelRef::pollable(Arc::clone(&results))],
        );
        let chain = ChainMessageHandlerBuilder::create()
            .chain(sum(1))
            .with_output_message_handler(multiply(3).with_output_channel_name("results"));

        let reply = chain
            .build_processor(&context)
            .unwrap()
            .process(MessageBuilder::with_payload(1).build().unwrap())
            .await
            .unwrap();

        assert!(reply.is_none());
        let result = results.receive().await.unwrap().unwrap();
        assert_eq!(result.payload(), &json!(6));
    }

    #[test]
    fn test_output_channel_and_output_handler_conflict() {
        let chain = ChainMessageHandlerBuilder::create()
            .chain(sum(1))
            .with_output_message_handler(sum(2))
            .with_output_channel_name("results");
        assert!(matches!(
            chain.build_processor(&empty_context()),
            Err(MessagingError::InvalidArgument(_))
        ));
    }
}
