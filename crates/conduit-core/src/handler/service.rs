//! Service activators: endpoints invoking a method of a referenced service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use super::parameter::{ParameterConverterBuilder, resolve_arguments, validate_converters};
use super::{BuildContext, EndpointSettings, MessageHandlerBuilder, MessageProcessor};
use crate::conversion::ConversionService;
use crate::error::{MessagingError, MessagingResult};
use crate::introspection::{
    InterfaceParameter, InterfaceToCall, MethodSignatureResolver, ReturnType,
};
use crate::message::Message;
use crate::reference::{ReferenceSearchService, ReferenceSearchServiceExt};

/// An argument handed to a [`ServiceEndpoint`] method.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodArgument {
    Value(Value),
    Message(Message),
}

impl MethodArgument {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Message(_) => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::Value(_) => None,
        }
    }

    /// The value, or the payload for a message argument.
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Message(message) => message.payload().clone(),
        }
    }
}

/// What a [`ServiceEndpoint`] method produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MethodReturn {
    /// No result; the flow stops here.
    #[default]
    Nothing,
    /// A value, sent on as the payload of the reply.
    Value(Value),
    /// A complete reply message.
    Message(Message),
}

impl From<Value> for MethodReturn {
    fn from(value: Value) -> Self {
        if value.is_null() {
            Self::Nothing
        } else {
            Self::Value(value)
        }
    }
}

impl From<Message> for MethodReturn {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

/// A service whose methods endpoints invoke by name.
///
/// # Example
///
/// ```rust,ignore
/// struct Calculator;
///
/// #[async_trait]
/// impl ServiceEndpoint for Calculator {
///     async fn invoke(&self, method: &str, args: Vec<MethodArgument>) -> MessagingResult<MethodReturn> {
///         let value = args[0].as_value().and_then(Value::as_i64).unwrap_or_default();
///         match method {
///             "double" => Ok(json!(value * 2).into()),
///             other => Err(MessagingError::handler(format!("unknown method {other}"))),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ServiceEndpoint: Send + Sync {
    async fn invoke(
        &self,
        method: &str,
        arguments: Vec<MethodArgument>,
    ) -> MessagingResult<MethodReturn>;
}

/// Where an endpoint finds its service.
#[derive(Clone)]
pub enum ServiceReference {
    /// Looked up in the reference search service when built.
    Name(String),
    /// Given directly.
    Instance(Arc<dyn ServiceEndpoint>),
}

impl ServiceReference {
    pub fn required_reference_names(&self) -> Vec<String> {
        match self {
            Self::Name(name) => vec![name.clone()],
            Self::Instance(_) => Vec::new(),
        }
    }

    pub fn resolve(
        &self,
        references: &dyn ReferenceSearchService,
    ) -> MessagingResult<Arc<dyn ServiceEndpoint>> {
        match self {
            Self::Name(name) => references.get_typed::<dyn ServiceEndpoint>(name),
            Self::Instance(service) => Ok(Arc::clone(service)),
        }
    }

    /// Name used as the interface when none is given.
    fn default_interface_name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Instance(_) => "anonymous",
        }
    }
}

impl std::fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => write!(f, "ServiceReference({name})"),
            Self::Instance(_) => f.write_str("ServiceReference(<instance>)"),
        }
    }
}

/// A method of a referenced service plus its argument mapping.
#[derive(Clone, Debug)]
pub(crate) struct MethodCall {
    pub(crate) service: ServiceReference,
    pub(crate) interface_name: String,
    pub(crate) method_name: String,
    pub(crate) converters: Vec<ParameterConverterBuilder>,
}

impl MethodCall {
    pub(crate) fn new(service: ServiceReference, method_name: impl Into<String>) -> Self {
        Self {
            interface_name: service.default_interface_name().to_string(),
            service,
            method_name: method_name.into(),
            converters: Vec::new(),
        }
    }

    /// The registered signature, or one taking the payload and returning a
    /// value when nothing is registered.
    pub(crate) fn signature(&self, signatures: &dyn MethodSignatureResolver) -> InterfaceToCall {
        signatures
            .resolve(&self.interface_name, &self.method_name)
            .unwrap_or_else(|_| {
                InterfaceToCall::create(&self.interface_name, &self.method_name)
                    .with_parameter(InterfaceParameter::value("payload"))
                    .with_return_type(ReturnType::Value)
                    .with_nullable_return()
            })
    }

    pub(crate) fn bind(&self, context: &BuildContext) -> MessagingResult<BoundMethod> {
        self.bind_to(context, self.signature(context.signatures.as_ref()))
    }

    pub(crate) fn bind_to(
        &self,
        context: &BuildContext,
        signature: InterfaceToCall,
    ) -> MessagingResult<BoundMethod> {
        validate_converters(&signature, &self.converters)?;
        Ok(BoundMethod {
            service: self.service.resolve(context.references.as_ref())?,
            signature,
            converters: self.converters.clone(),
            conversions: ConversionService::lookup(context.references.as_ref())?,
        })
    }
}

/// A [`MethodCall`] with its service resolved.
#[derive(Clone)]
pub(crate) struct BoundMethod {
    service: Arc<dyn ServiceEndpoint>,
    signature: InterfaceToCall,
    converters: Vec<ParameterConverterBuilder>,
    conversions: Arc<ConversionService>,
}

impl BoundMethod {
    pub(crate) async fn call(&self, message: &Message) -> MessagingResult<MethodReturn> {
        let arguments =
            resolve_arguments(&self.signature, &self.converters, &self.conversions, message)
                .await?;
        trace!(method = %self.signature, "Invoking service method");
        let result = self
            .service
            .invoke(&self.signature.method_name, arguments)
            .await?;
        if self.signature.is_void() {
            return Ok(MethodReturn::Nothing);
        }
        Ok(result)
    }

    pub(crate) fn signature(&self) -> &InterfaceToCall {
        &self.signature
    }
}

/// Turns a method result into the reply to `request`.
pub(crate) fn reply_from(request: &Message, result: MethodReturn) -> MessagingResult<Option<Message>> {
    match result {
        MethodReturn::Nothing => Ok(None),
        MethodReturn::Value(value) => super::reply_with_payload(request, value).map(Some),
        MethodReturn::Message(message) => Ok(Some(message)),
    }
}

// ============================================================================
// ServiceActivatorBuilder
// ============================================================================

/// Endpoint invoking a service method with arguments taken from the message.
///
/// The method result becomes the reply; a void method or a `null` result
/// ends the flow.
#[derive(Clone)]
pub struct ServiceActivatorBuilder {
    settings: EndpointSettings,
    method: MethodCall,
    requires_reply: bool,
}

impl ServiceActivatorBuilder {
    /// Invokes `method_name` of the service registered under `reference_name`.
    pub fn create(reference_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self::with_reference(ServiceReference::Name(reference_name.into()), method_name)
    }

    /// Invokes `method_name` of `service`.
    pub fn create_with_direct_reference(
        service: Arc<dyn ServiceEndpoint>,
        method_name: impl Into<String>,
    ) -> Self {
        Self::with_reference(ServiceReference::Instance(service), method_name)
    }

    fn with_reference(service: ServiceReference, method_name: impl Into<String>) -> Self {
        Self {
            settings: EndpointSettings::default(),
            method: MethodCall::new(service, method_name),
            requires_reply: false,
        }
    }

    /// Interface under which the method signature is registered. Defaults to
    /// the reference name.
    pub fn with_interface_name(mut self, interface_name: impl Into<String>) -> Self {
        self.method.interface_name = interface_name.into();
        self
    }

    pub fn with_method_parameter_converters(
        mut self,
        converters: Vec<ParameterConverterBuilder>,
    ) -> Self {
        self.method.converters = converters;
        self
    }

    /// Makes a missing reply an error instead of ending the flow.
    pub fn with_requires_reply(mut self, requires_reply: bool) -> Self {
        self.requires_reply = requires_reply;
        self
    }

    pub fn reference(&self) -> &ServiceReference {
        &self.method.service
    }

    pub fn method_name(&self) -> &str {
        &self.method.method_name
    }
}

impl MessageHandlerBuilder for ServiceActivatorBuilder {
    fn settings(&self) -> &EndpointSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut EndpointSettings {
        &mut self.settings
    }

    fn intercepted_interface(
        &self,
        signatures: &dyn MethodSignatureResolver,
    ) -> MessagingResult<InterfaceToCall> {
        Ok(self.method.signature(signatures))
    }

    fn required_reference_names(&self) -> Vec<String> {
        let mut names = self.method.service.required_reference_names();
        names.extend(
            self.settings
                .around_interceptors
                .iter()
                .flat_map(|i| i.required_reference_names()),
        );
        names
    }

    fn requires_reply(&self) -> bool {
        self.requires_reply
    }

    fn build_processor(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        let method = self.method.bind(context)?;
        if self.requires_reply && method.signature().is_void() {
            return Err(MessagingError::configuration(format!(
                "{} requires a reply but {} returns nothing",
                self.endpoint_id().unwrap_or("service activator"),
                method.signature()
            )));
        }
        Ok(Arc::new(ServiceActivatorProcessor { method }))
    }
}

struct ServiceActivatorProcessor {
    method: BoundMethod,
}

#[async_trait]
impl MessageProcessor for ServiceActivatorProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        let result = self.method.call(&message).await?;
        reply_from(&message, result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::handler::EndpointSettingsExt;
    use crate::handler::testing::{context_with, empty_context};
    use crate::message::MessageBuilder;
    use crate::reference::InMemoryReferenceSearchService;
    use serde_json::json;

    /// Integer arithmetic on the payload, `sum` adds and `multiply` multiplies
    /// by the operand.
    pub(crate) struct Calculator {
        pub(crate) operand: i64,
    }

    impl Calculator {
        pub(crate) fn create(operand: i64) -> Arc<dyn ServiceEndpoint> {
            Arc::new(Self { operand })
        }
    }

    #[async_trait]
    impl ServiceEndpoint for Calculator {
        async fn invoke(
            &self,
            method: &str,
            arguments: Vec<MethodArgument>,
        ) -> MessagingResult<MethodReturn> {
            let value = arguments
                .into_iter()
                .next()
                .map(MethodArgument::into_value)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| MessagingError::invalid_argument("expected an integer"))?;
            match method {
                "sum" => Ok(json!(value + self.operand).into()),
                "multiply" => Ok(json!(value * self.operand).into()),
                "nothing" => Ok(MethodReturn::Nothing),
                other => Err(MessagingError::handler(format!("unknown method {other}"))),
            }
        }
    }

    #[tokio::test]
    async fn test_reply_carries_result_and_request_headers() {
        let activator = ServiceActivatorBuilder::create_with_direct_reference(
            Calculator::create(2),
            "multiply",
        );
        let processor = activator.build_processor(&empty_context()).unwrap();

        let request = MessageBuilder::with_payload(21)
            .set_header("trace", "abc")
            .build()
            .unwrap();
        let reply = processor.process(request.clone()).await.unwrap().unwrap();

        assert_eq!(reply.payload(), &json!(42));
        assert_eq!(reply.headers().get_str("trace"), Some("abc"));
        assert_ne!(reply.id(), request.id());
    }

    #[tokio::test]
    async fn test_reference_is_resolved_by_name() {
        let references = InMemoryReferenceSearchService::new()
            .with::<dyn ServiceEndpoint>("calculator", Calculator::create(1));
        let activator =
            ServiceActivatorBuilder::create("calculator", "sum").with_endpoint_id("adder");

        assert_eq!(activator.required_reference_names(), vec!["calculator"]);
        let processor = activator
            .build_processor(&context_with(references, Vec::new()))
            .unwrap();
        let reply = processor
            .process(MessageBuilder::with_payload(1).build().unwrap())
            .await
            .unwrap();
        assert_eq!(reply.unwrap().payload(), &json!(2));
    }

    #[test]
    fn test_missing_reference_fails_build() {
        let activator = ServiceActivatorBuilder::create("calculator", "sum");
        assert!(matches!(
            activator.build_processor(&empty_context()),
            Err(MessagingError::ReferenceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_text_payload_converted_for_parameter() {
        use crate::handler::ParameterConverterBuilder;
        use crate::message::MediaType;

        let processor = ServiceActivatorBuilder::create_with_direct_reference(
            Calculator::create(2),
            "multiply",
        )
        .with_method_parameter_converters(vec![ParameterConverterBuilder::payload_as(
            "payload",
            MediaType::application_json(),
        )])
        .build_processor(&empty_context())
        .unwrap();

        let request = MessageBuilder::with_payload("21")
            .set_content_type(&MediaType::text_plain())
            .build()
            .unwrap();
        let reply = processor.process(request).await.unwrap().unwrap();
        assert_eq!(reply.payload(), &json!(42));
    }

    #[tokio::test]
    async fn test_nothing_ends_the_flow() {
        let processor =
            ServiceActivatorBuilder::create_with_direct_reference(Calculator::create(1), "nothing")
                .build_processor(&empty_context())
                .unwrap();
        let reply = processor
            .process(MessageBuilder::with_payload(1).build().unwrap())
            .await
            .unwrap();
        assert!(reply.is_none());
    }
}
