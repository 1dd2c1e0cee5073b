//! Message handlers and their builders.
//!
//! A [`MessageProcessor`] turns a message into an optional reply. A
//! [`MessageHandler`] consumes a message completely; the usual handler is a
//! [`RequestReplyProducer`] that runs a processor and forwards its reply.
//!
//! Endpoints are registered as [`MessageHandlerBuilder`]s and only turned
//! into live handlers once every channel and reference is known:
//!
//! ```rust,ignore
//! let activator = ServiceActivatorBuilder::create("calculator", "sum")
//!     .with_input_channel_name("numbers")
//!     .with_output_channel_name("results");
//! configuration.register_message_handler(activator)?;
//! ```

pub mod chain;
pub mod enricher;
pub mod filter;
pub mod logging;
pub mod parameter;
pub mod producer;
pub mod router;
pub mod service;
pub mod transformer;

use std::sync::Arc;

use async_trait::async_trait;

pub use chain::ChainMessageHandlerBuilder;
pub use enricher::{EnricherBuilder, PropertyEditor};
pub use filter::MessageFilterBuilder;
pub use logging::LoggingHandlerBuilder;
pub use parameter::ParameterConverterBuilder;
pub use producer::RequestReplyProducer;
pub use router::RouterBuilder;
pub use service::{
    MethodArgument, MethodReturn, ServiceActivatorBuilder, ServiceEndpoint, ServiceReference,
};
pub use transformer::TransformerBuilder;

use crate::channel::ChannelResolver;
use crate::error::MessagingResult;
use crate::interceptor::around::{AroundInterceptorReference, intercept_processor};
use crate::introspection::{Annotation, InterfaceToCall, MethodSignatureResolver};
use crate::message::Message;
use crate::reference::ReferenceSearchService;

/// Consumes a message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> MessagingResult<()>;
}

/// Processes a message into an optional reply.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>>;
}

/// A [`MessageHandler`] running a synchronous closure.
pub struct CallbackHandler<F> {
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(Message) -> MessagingResult<()> + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Arc<Self> {
        Arc::new(Self { callback })
    }
}

#[async_trait]
impl<F> MessageHandler for CallbackHandler<F>
where
    F: Fn(Message) -> MessagingResult<()> + Send + Sync + 'static,
{
    async fn handle(&self, message: Message) -> MessagingResult<()> {
        (self.callback)(message)
    }
}

/// Everything a builder may need while being built.
#[derive(Clone)]
pub struct BuildContext {
    pub references: Arc<dyn ReferenceSearchService>,
    pub channels: Arc<dyn ChannelResolver>,
    pub signatures: Arc<dyn MethodSignatureResolver>,
}

impl BuildContext {
    pub fn new(
        references: Arc<dyn ReferenceSearchService>,
        channels: Arc<dyn ChannelResolver>,
        signatures: Arc<dyn MethodSignatureResolver>,
    ) -> Self {
        Self {
            references,
            channels,
            signatures,
        }
    }
}

/// Identity and wiring shared by every endpoint builder.
#[derive(Clone, Default)]
pub struct EndpointSettings {
    pub endpoint_id: Option<String>,
    pub input_channel_name: Option<String>,
    pub output_channel_name: Option<String>,
    pub required_interceptor_names: Vec<String>,
    pub endpoint_annotations: Vec<Annotation>,
    pub around_interceptors: Vec<AroundInterceptorReference>,
}

/// Builder of a message handling endpoint.
///
/// Implementors provide the settings accessors, the intercepted interface and
/// [`build_processor`](Self::build_processor); everything else has defaults.
pub trait MessageHandlerBuilder: Send + Sync {
    fn settings(&self) -> &EndpointSettings;

    fn settings_mut(&mut self) -> &mut EndpointSettings;

    /// The method pointcuts and around interceptors see for this endpoint.
    fn intercepted_interface(
        &self,
        signatures: &dyn MethodSignatureResolver,
    ) -> MessagingResult<InterfaceToCall>;

    /// Builds the bare processor, without around interceptors.
    fn build_processor(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>>;

    fn required_reference_names(&self) -> Vec<String> {
        self.settings()
            .around_interceptors
            .iter()
            .flat_map(AroundInterceptorReference::required_reference_names)
            .collect()
    }

    /// Whether producing no reply is an error.
    fn requires_reply(&self) -> bool {
        false
    }

    fn endpoint_id(&self) -> Option<&str> {
        self.settings().endpoint_id.as_deref()
    }

    fn input_channel_name(&self) -> Option<&str> {
        self.settings().input_channel_name.as_deref()
    }

    fn output_channel_name(&self) -> Option<&str> {
        self.settings().output_channel_name.as_deref()
    }

    fn required_interceptor_names(&self) -> &[String] {
        &self.settings().required_interceptor_names
    }

    fn endpoint_annotations(&self) -> &[Annotation] {
        &self.settings().endpoint_annotations
    }

    fn add_around_interceptor(&mut self, interceptor: AroundInterceptorReference) {
        self.settings_mut().around_interceptors.push(interceptor);
    }

    /// Builds the processor wrapped in its around interceptors.
    fn build_intercepted_processor(
        &self,
        context: &BuildContext,
    ) -> MessagingResult<Arc<dyn MessageProcessor>> {
        let processor = self.build_processor(context)?;
        let settings = self.settings();
        if settings.around_interceptors.is_empty() {
            return Ok(processor);
        }
        let interface = self.intercepted_interface(context.signatures.as_ref())?;
        intercept_processor(
            processor,
            &settings.around_interceptors,
            interface,
            settings.endpoint_annotations.clone(),
            context.references.as_ref(),
        )
    }

    /// Builds the handler subscribed to, or polling, the input channel.
    fn build(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageHandler>> {
        let processor = self.build_intercepted_processor(context)?;
        Ok(Arc::new(RequestReplyProducer::new(
            self.endpoint_id().unwrap_or("anonymous"),
            processor,
            self.output_channel_name().map(str::to_string),
            Arc::clone(&context.channels),
            self.requires_reply(),
        )))
    }
}

/// Fluent setters for the [`EndpointSettings`] of any builder.
pub trait EndpointSettingsExt: MessageHandlerBuilder + Sized {
    fn with_endpoint_id(mut self, endpoint_id: impl Into<String>) -> Self {
        self.settings_mut().endpoint_id = Some(endpoint_id.into());
        self
    }

    fn with_input_channel_name(mut self, channel: impl Into<String>) -> Self {
        self.settings_mut().input_channel_name = Some(channel.into());
        self
    }

    fn with_output_channel_name(mut self, channel: impl Into<String>) -> Self {
        self.settings_mut().output_channel_name = Some(channel.into());
        self
    }

    fn with_required_interceptor_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings_mut()
            .required_interceptor_names
            .extend(names.into_iter().map(Into::into));
        self
    }

    fn with_endpoint_annotation(mut self, annotation: Annotation) -> Self {
        self.settings_mut().endpoint_annotations.push(annotation);
        self
    }
}

impl<B: MessageHandlerBuilder + Sized> EndpointSettingsExt for B {}

/// Derives the reply to `request` carrying `payload`, keeping the request headers.
pub(crate) fn reply_with_payload(
    request: &Message,
    payload: serde_json::Value,
) -> MessagingResult<Message> {
    crate::message::MessageBuilder::from_message(request)
        .set_payload(payload)
        .build()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers shared by handler tests.

    use super::*;
    use crate::channel::{ChannelRef, InMemoryChannelResolver};
    use crate::introspection::InMemoryMethodSignatureResolver;
    use crate::reference::InMemoryReferenceSearchService;

    pub fn context_with(
        references: InMemoryReferenceSearchService,
        channels: Vec<ChannelRef>,
    ) -> BuildContext {
        let resolver = InMemoryChannelResolver::new();
        for channel in channels {
            resolver
                .register(channel.name().to_string(), channel)
                .unwrap();
        }
        BuildContext::new(
            Arc::new(references),
            Arc::new(resolver),
            Arc::new(InMemoryMethodSignatureResolver::new()),
        )
    }

    pub fn empty_context() -> BuildContext {
        context_with(InMemoryReferenceSearchService::new(), Vec::new())
    }
}
