use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error};
use uuid::Uuid;

use super::interceptor::{InterceptedConsumer, Iteration, TaskExecutor};
use super::{ConsumerLifecycle, PollingMetadata};
use crate::channel::{ChannelRef, ChannelResolver};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::service::{BoundMethod, MethodCall, ServiceEndpoint, ServiceReference};
use crate::handler::{
    BuildContext, ChainMessageHandlerBuilder, EndpointSettings, MessageHandlerBuilder,
    MessageProcessor, MethodReturn,
};
use crate::interceptor::{AroundInterceptorReference, MethodInterceptor};
use crate::introspection::{Annotation, InterfaceToCall, MethodSignatureResolver, ReturnType};
use crate::message::{ErrorMessage, Message, MessageBuilder};

/// A separately running consumer that calls a service method at a fixed
/// rate and sends every non-null result to a request channel.
///
/// # Example
///
/// ```rust,ignore
/// let adapter = InboundChannelAdapterBuilder::create("orders", "orderSource", "next")
///     .with_endpoint_id("order-poller");
/// configuration.register_consumer(adapter)?;
/// ```
#[derive(Clone)]
pub struct InboundChannelAdapterBuilder {
    endpoint_id: String,
    request_channel_name: String,
    method: MethodCall,
    required_interceptor_names: Vec<String>,
    endpoint_annotations: Vec<Annotation>,
    before: Vec<MethodInterceptor>,
    around: Vec<AroundInterceptorReference>,
    after: Vec<MethodInterceptor>,
}

impl InboundChannelAdapterBuilder {
    pub fn create(
        request_channel_name: impl Into<String>,
        reference_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self::with_reference(
            request_channel_name,
            ServiceReference::Name(reference_name.into()),
            method_name,
        )
    }

    pub fn create_with_direct_object(
        request_channel_name: impl Into<String>,
        service: Arc<dyn ServiceEndpoint>,
        method_name: impl Into<String>,
    ) -> Self {
        Self::with_reference(
            request_channel_name,
            ServiceReference::Instance(service),
            method_name,
        )
    }

    fn with_reference(
        request_channel_name: impl Into<String>,
        service: ServiceReference,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_id: Uuid::new_v4().to_string(),
            request_channel_name: request_channel_name.into(),
            method: MethodCall::new(service, method_name),
            required_interceptor_names: Vec::new(),
            endpoint_annotations: Vec::new(),
            before: Vec::new(),
            around: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn with_endpoint_id(mut self, endpoint_id: impl Into<String>) -> Self {
        self.endpoint_id = endpoint_id.into();
        self
    }

    pub fn with_interface_name(mut self, interface_name: impl Into<String>) -> Self {
        self.method.interface_name = interface_name.into();
        self
    }

    pub fn with_required_interceptor_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_interceptor_names
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_endpoint_annotation(mut self, annotation: Annotation) -> Self {
        self.endpoint_annotations.push(annotation);
        self
    }

    pub fn add_before_interceptor(&mut self, interceptor: MethodInterceptor) {
        self.before.push(interceptor);
    }

    pub fn add_around_interceptor(&mut self, interceptor: AroundInterceptorReference) {
        self.around.push(interceptor);
    }

    pub fn add_after_interceptor(&mut self, interceptor: MethodInterceptor) {
        self.after.push(interceptor);
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn request_channel_name(&self) -> &str {
        &self.request_channel_name
    }

    pub fn required_interceptor_names(&self) -> &[String] {
        &self.required_interceptor_names
    }

    pub fn endpoint_annotations(&self) -> &[Annotation] {
        &self.endpoint_annotations
    }

    /// The registered signature, or a method without parameters returning a
    /// value when nothing is registered.
    pub fn intercepted_interface(&self, signatures: &dyn MethodSignatureResolver) -> InterfaceToCall {
        signatures
            .resolve(&self.method.interface_name, &self.method.method_name)
            .unwrap_or_else(|_| {
                InterfaceToCall::create(&self.method.interface_name, &self.method.method_name)
                    .with_return_type(ReturnType::Value)
                    .with_nullable_return()
            })
    }

    pub fn required_reference_names(&self) -> Vec<String> {
        let mut names = self.method.service.required_reference_names();
        names.extend(
            self.before
                .iter()
                .chain(&self.after)
                .flat_map(MethodInterceptor::required_reference_names),
        );
        names.extend(
            self.around
                .iter()
                .flat_map(AroundInterceptorReference::required_reference_names),
        );
        names
    }

    /// Builds the running adapter. Interceptors must have been added before.
    pub fn build(
        &self,
        context: &BuildContext,
        metadata: &PollingMetadata,
    ) -> MessagingResult<Arc<dyn ConsumerLifecycle>> {
        let signature = self.intercepted_interface(context.signatures.as_ref());
        let invocation = InvocationStage {
            settings: EndpointSettings {
                endpoint_annotations: self.endpoint_annotations.clone(),
                around_interceptors: self.around.clone(),
                ..EndpointSettings::default()
            },
            method: self.method.bind_to(context, signature)?,
        };

        let mut pipeline = ChainMessageHandlerBuilder::create();
        for interceptor in &self.before {
            pipeline = pipeline.chain_shared(interceptor.stage());
        }
        pipeline = pipeline.chain(invocation);
        for interceptor in &self.after {
            pipeline = pipeline.chain_shared(interceptor.stage());
        }

        let task = InboundTask {
            endpoint_id: self.endpoint_id.clone(),
            processor: pipeline.build_processor(context)?,
            request_channel: context.channels.resolve(&self.request_channel_name)?,
            channels: Arc::clone(&context.channels),
            error_channel_name: metadata.error_channel_name.clone(),
            fixed_rate: metadata.fixed_rate(),
        };
        Ok(Arc::new(
            InterceptedConsumer::new(
                self.endpoint_id.clone(),
                Arc::new(task),
                metadata.consumer_interceptors()?,
            )
            .with_initial_delay(metadata.initial_delay()),
        ))
    }
}

impl std::fmt::Debug for InboundChannelAdapterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundChannelAdapterBuilder")
            .field("endpoint_id", &self.endpoint_id)
            .field("request_channel_name", &self.request_channel_name)
            .field("method", &self.method)
            .finish()
    }
}

/// The service call at the heart of the adapter pipeline. It is the stage
/// around interceptors wrap.
struct InvocationStage {
    settings: EndpointSettings,
    method: BoundMethod,
}

impl MessageHandlerBuilder for InvocationStage {
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
        Ok(self.method.signature().clone())
    }

    fn build_processor(&self, _context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        Ok(Arc::new(InvocationProcessor {
            method: self.method.clone(),
        }))
    }
}

struct InvocationProcessor {
    method: BoundMethod,
}

#[async_trait]
impl MessageProcessor for InvocationProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        match self.method.call(&message).await? {
            MethodReturn::Nothing => Ok(None),
            MethodReturn::Value(value) => MessageBuilder::with_payload(value).build().map(Some),
            MethodReturn::Message(message) => Ok(Some(message)),
        }
    }
}

struct InboundTask {
    endpoint_id: String,
    processor: Arc<dyn MessageProcessor>,
    request_channel: ChannelRef,
    channels: Arc<dyn ChannelResolver>,
    error_channel_name: Option<String>,
    fixed_rate: Duration,
}

impl InboundTask {
    async fn poll_once(&self, trigger: &Message) -> MessagingResult<bool> {
        match self.processor.process(trigger.clone()).await? {
            Some(message) => {
                debug!(
                    endpoint = %self.endpoint_id,
                    channel = %self.request_channel.name(),
                    message_id = %message.id(),
                    "Inbound adapter produced message"
                );
                self.request_channel.send(message).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn report(&self, failure: &MessagingError, trigger: &Message) {
        let redirected = match &self.error_channel_name {
            Some(name) => match (self.channels.resolve(name), ErrorMessage::create(failure, trigger)) {
                (Ok(channel), Ok(error_message)) => channel.send(error_message).await.is_ok(),
                _ => false,
            },
            None => false,
        };
        if !redirected {
            error!(endpoint = %self.endpoint_id, error = %failure, "Inbound adapter failed");
        }
    }
}

#[async_trait]
impl TaskExecutor for InboundTask {
    async fn execute(&self, iteration: &Iteration<'_>) -> MessagingResult<()> {
        let trigger = MessageBuilder::with_payload(Value::Object(Map::new())).build()?;
        match self.poll_once(&trigger).await {
            Ok(true) => iteration.message_handled().await?,
            Ok(false) => {}
            Err(failure) => self.report(&failure, &trigger).await,
        }
        tokio::select! {
            _ = iteration.cancellation().cancelled() => {}
            _ = tokio::time::sleep(self.fixed_rate) => {}
        }
        Ok(())
    }
}
