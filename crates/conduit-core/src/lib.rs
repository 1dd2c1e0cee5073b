//! # Conduit Core
//!
//! The messaging engine of Conduit: channels, endpoints, gateways and the
//! interceptor resolution wiring them together.
//!
//! ## Building Blocks
//!
//! - **Messages**: immutable payload plus headers ([`Message`], [`MessageBuilder`])
//! - **Channels**: direct, queue and publish-subscribe channels, optionally
//!   wrapped in [`ChannelInterceptor`]s
//! - **Handlers**: service activators, transformers, routers, filters and
//!   chains, described by [`MessageHandlerBuilder`]s
//! - **Endpoints**: event-driven and polling consumers, inbound channel
//!   adapters and the limits stopping them
//! - **Interceptors**: before, around and after advice selected per endpoint
//!   by [`Pointcut`] and precedence
//! - **Gateways**: method calls turned into request/reply exchanges
//! - **Configuration**: [`MessagingSystemConfiguration`] assembles all of it
//!   into a [`ConfiguredMessagingSystem`]
//!
//! ## Message Flow
//!
//! ```text
//! ┌─────────┐    ┌─────────┐    ┌──────────┐    ┌─────────┐
//! │ Gateway │───▶│ Channel │───▶│ Consumer │───▶│ Handler │
//! └─────────┘    └─────────┘    └──────────┘    └─────────┘
//!      ▲                                             │
//!      └──────────────── reply channel ◀─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use conduit_core::prelude::*;
//! use std::sync::Arc;
//!
//! let mut configuration = MessagingSystemConfiguration::new();
//! configuration
//!     .register_message_handler(
//!         ServiceActivatorBuilder::create("calculator", "multiply")
//!             .with_input_channel_name("calculate"),
//!     )?
//!     .register_gateway(GatewayBuilder::create(
//!         "calculatorGateway",
//!         "CalculatorGateway",
//!         "calculate",
//!         "calculate",
//!     ))?;
//!
//! let references = InMemoryReferenceSearchService::new()
//!     .with::<dyn ServiceEndpoint>("calculator", Arc::new(Calculator));
//! let system = configuration.build_messaging_system(Arc::new(references)).await?;
//!
//! let reply = system
//!     .get_gateway_by_name("calculatorGateway")?
//!     .invoke("calculate", vec![json!(21)])
//!     .await?;
//! ```

pub mod channel;
pub mod config;
pub mod conversion;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod interceptor;
pub mod introspection;
pub mod message;
pub mod reference;

pub use channel::{
    ChannelInterceptor, ChannelInterceptorBuilder, ChannelRef, ChannelResolver, DirectChannel,
    InMemoryChannelResolver, MessageChannel, MessageChannelBuilder, PollableChannel,
    PublishSubscribeChannel, QueueChannel, QueueDiscipline, SimpleMessageChannelBuilder,
    SubscribableChannel,
};
pub use config::{
    AnnotationModuleRetrievingService, AnnotationRegistrationService, ConfiguredMessagingSystem,
    InMemoryAnnotationRegistrationService, InMemoryModuleMessaging, MessagingSystemConfiguration,
    Module, ModuleRetrievingService,
};
pub use endpoint::{
    AcknowledgementCallback, ConsumerLifecycle, ConsumerState, InboundChannelAdapterBuilder,
    MessageHandlerConsumerBuilder, PollingMetadata,
};
pub use conversion::{ConversionService, Converter};
pub use error::{MessagingError, MessagingResult};
pub use gateway::{GatewayBuilder, GatewayParameterConverter, GatewayProxy, TransactionFactory};
pub use handler::{
    ChainMessageHandlerBuilder, EndpointSettingsExt, EnricherBuilder, LoggingHandlerBuilder,
    MessageFilterBuilder, MessageHandler, MessageHandlerBuilder, MessageProcessor,
    PropertyEditor, RouterBuilder, ServiceActivatorBuilder, ServiceEndpoint, TransformerBuilder,
};
pub use interceptor::{AroundInterceptor, AroundInterceptorReference, MethodInterceptor, Pointcut};
pub use introspection::{Annotation, InMemoryMethodSignatureResolver, InterfaceToCall};
pub use message::{Message, MessageBuilder};
pub use reference::{InMemoryReferenceSearchService, ReferenceSearchService};

/// Prelude for common imports.
pub mod prelude {
    pub use super::channel::{
        ChannelInterceptor, ChannelInterceptorBuilder, ChannelRef, MessageChannel,
        PollableChannel, SimpleMessageChannelBuilder, SubscribableChannel,
    };
    pub use super::config::{ConfiguredMessagingSystem, MessagingSystemConfiguration, Module};
    pub use super::endpoint::{InboundChannelAdapterBuilder, PollingMetadata};
    pub use super::error::{MessagingError, MessagingResult};
    pub use super::gateway::{GatewayBuilder, GatewayParameterConverter};
    pub use super::handler::{
        ChainMessageHandlerBuilder, EndpointSettingsExt, EnricherBuilder, MessageHandlerBuilder,
        MethodArgument, MethodReturn, PropertyEditor, RouterBuilder, ServiceActivatorBuilder,
        ServiceEndpoint, TransformerBuilder,
    };
    pub use super::interceptor::{
        AroundInterceptor, AroundInterceptorReference, MethodInterceptor, MethodInvocation,
        Pointcut,
    };
    pub use super::introspection::{Annotation, InterfaceToCall};
    pub use super::message::{Message, MessageBuilder};
    pub use super::reference::{InMemoryReferenceSearchService, ReferenceSearchService};
}
