//! Modules registering endpoints from annotated methods.
//!
//! Annotations are not discovered here. An [`AnnotationRegistrationService`]
//! hands out the annotated methods it knows of, and each module turns the
//! registrations of its annotation pair into builders:
//!
//! | Module | Class annotation | Method annotation |
//! |--------|------------------|-------------------|
//! | [`ServiceActivatorModule`] | `MessageEndpoint` | `ServiceActivator` |
//! | [`GatewayModule`] | `MessageGateway` | `Gateway` |
//! | [`PollerModule`] | `MessageEndpoint` | `ServiceActivator` with a `poller` attribute |
//!
//! The service the endpoint calls is looked up by class name, unless a
//! `referenceName` attribute names it.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::configuration::MessagingSystemConfiguration;
use super::module::{ExtensionObject, Module, ModuleRetrievingService};
use crate::endpoint::PollingMetadata;
use crate::error::{MessagingError, MessagingResult};
use crate::gateway::{GatewayBuilder, GatewayParameterConverter};
use crate::handler::{EndpointSettingsExt, ServiceActivatorBuilder};
use crate::introspection::Annotation;

pub const MESSAGE_ENDPOINT: &str = "MessageEndpoint";
pub const SERVICE_ACTIVATOR: &str = "ServiceActivator";
pub const MESSAGE_GATEWAY: &str = "MessageGateway";
pub const GATEWAY: &str = "Gateway";

/// One annotated method of an annotated class.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRegistration {
    pub class_name: String,
    pub class_annotation: Annotation,
    pub method_name: String,
    pub method_annotation: Annotation,
}

impl AnnotationRegistration {
    /// Reference the endpoint's service is registered under.
    pub fn reference_name(&self) -> &str {
        self.method_annotation
            .str_attribute("referenceName")
            .or_else(|| self.class_annotation.str_attribute("referenceName"))
            .unwrap_or(&self.class_name)
    }

    fn required_str(&self, attribute: &str) -> MessagingResult<&str> {
        self.method_annotation.str_attribute(attribute).ok_or_else(|| {
            MessagingError::configuration(format!(
                "{} on {}::{} needs a '{attribute}'",
                self.method_annotation.kind, self.class_name, self.method_name
            ))
        })
    }

    fn optional_str(&self, attribute: &str) -> Option<&str> {
        self.method_annotation.str_attribute(attribute)
    }

    fn string_list(&self, attribute: &str) -> MessagingResult<Vec<String>> {
        self.method_annotation
            .attribute(attribute)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map(Option::unwrap_or_default)
            .map_err(Into::into)
    }
}

/// Yields annotated methods by their annotation pair.
pub trait AnnotationRegistrationService: Send + Sync {
    fn find_registrations_for(
        &self,
        class_annotation: &str,
        method_annotation: &str,
    ) -> Vec<AnnotationRegistration>;
}

/// An [`AnnotationRegistrationService`] fed with explicit registrations.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAnnotationRegistrationService {
    registrations: Vec<AnnotationRegistration>,
}

impl InMemoryAnnotationRegistrationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_annotated_method(
        mut self,
        class_name: impl Into<String>,
        class_annotation: Annotation,
        method_name: impl Into<String>,
        method_annotation: Annotation,
    ) -> Self {
        self.registrations.push(AnnotationRegistration {
            class_name: class_name.into(),
            class_annotation,
            method_name: method_name.into(),
            method_annotation,
        });
        self
    }
}

impl AnnotationRegistrationService for InMemoryAnnotationRegistrationService {
    fn find_registrations_for(
        &self,
        class_annotation: &str,
        method_annotation: &str,
    ) -> Vec<AnnotationRegistration> {
        self.registrations
            .iter()
            .filter(|r| {
                r.class_annotation.kind == class_annotation
                    && r.method_annotation.kind == method_annotation
            })
            .cloned()
            .collect()
    }
}

// =============================================================================
// Modules
// =============================================================================

/// Registers a service activator per `ServiceActivator` method.
///
/// Attributes: `inputChannelName` (required), `outputChannelName`,
/// `endpointId`, `requiresReply`, `requiredInterceptorNames`.
#[derive(Debug, Clone)]
pub struct ServiceActivatorModule {
    registrations: Vec<AnnotationRegistration>,
}

impl ServiceActivatorModule {
    pub fn create(service: &dyn AnnotationRegistrationService) -> Self {
        Self {
            registrations: service.find_registrations_for(MESSAGE_ENDPOINT, SERVICE_ACTIVATOR),
        }
    }

    fn builder_for(registration: &AnnotationRegistration) -> MessagingResult<ServiceActivatorBuilder> {
        let mut builder = ServiceActivatorBuilder::create(
            registration.reference_name(),
            &registration.method_name,
        )
        .with_interface_name(&registration.class_name)
        .with_input_channel_name(registration.required_str("inputChannelName")?)
        .with_required_interceptor_names(registration.string_list("requiredInterceptorNames")?)
        .with_endpoint_annotation(registration.method_annotation.clone());

        if let Some(endpoint_id) = registration.optional_str("endpointId") {
            builder = builder.with_endpoint_id(endpoint_id);
        }
        if let Some(output) = registration.optional_str("outputChannelName") {
            builder = builder.with_output_channel_name(output);
        }
        if let Some(requires_reply) = registration
            .method_annotation
            .attribute("requiresReply")
            .and_then(Value::as_bool)
        {
            builder = builder.with_requires_reply(requires_reply);
        }
        Ok(builder)
    }
}

impl Module for ServiceActivatorModule {
    fn name(&self) -> &str {
        "serviceActivatorModule"
    }

    fn required_reference_names(&self) -> Vec<String> {
        self.registrations
            .iter()
            .map(|r| r.reference_name().to_string())
            .collect()
    }

    fn prepare(
        &self,
        configuration: &mut MessagingSystemConfiguration,
        _extension_objects: &[ExtensionObject],
    ) -> MessagingResult<()> {
        for registration in &self.registrations {
            configuration.register_message_handler(Self::builder_for(registration)?)?;
        }
        Ok(())
    }
}

/// Argument mapping declared in a `parameterConverters` attribute.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum ConverterAttribute {
    Payload { parameter_name: String },
    Header { parameter_name: String, header_name: String },
    HeaderMap { parameter_name: String },
    StaticHeader { header_name: String, value: Value },
}

impl From<ConverterAttribute> for GatewayParameterConverter {
    fn from(attribute: ConverterAttribute) -> Self {
        match attribute {
            ConverterAttribute::Payload { parameter_name } => Self::payload(parameter_name),
            ConverterAttribute::Header {
                parameter_name,
                header_name,
            } => Self::header(parameter_name, header_name),
            ConverterAttribute::HeaderMap { parameter_name } => Self::header_map(parameter_name),
            ConverterAttribute::StaticHeader { header_name, value } => {
                Self::static_header(header_name, value)
            }
        }
    }
}

/// Registers a gateway per `Gateway` method; methods of one class share
/// a gateway reference.
///
/// Attributes: `requestChannel` (required), `replyChannel`, `errorChannel`,
/// `replyTimeoutInMilliseconds`, `parameterConverters`,
/// `transactionFactories`, `requiredInterceptorNames`.
#[derive(Debug, Clone)]
pub struct GatewayModule {
    registrations: Vec<AnnotationRegistration>,
}

impl GatewayModule {
    pub fn create(service: &dyn AnnotationRegistrationService) -> Self {
        Self {
            registrations: service.find_registrations_for(MESSAGE_GATEWAY, GATEWAY),
        }
    }

    fn builder_for(registration: &AnnotationRegistration) -> MessagingResult<GatewayBuilder> {
        let annotation = &registration.method_annotation;
        let converters: Vec<ConverterAttribute> = annotation
            .attribute("parameterConverters")
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()?
            .unwrap_or_default();

        let mut builder = GatewayBuilder::create(
            registration.reference_name(),
            &registration.class_name,
            &registration.method_name,
            registration.required_str("requestChannel")?,
        )
        .with_parameter_converters(converters.into_iter().map(Into::into).collect())
        .with_transaction_factories(registration.string_list("transactionFactories")?)
        .with_required_interceptor_names(registration.string_list("requiredInterceptorNames")?)
        .with_endpoint_annotation(annotation.clone());

        if let Some(reply) = registration.optional_str("replyChannel") {
            builder = builder.with_reply_channel(reply);
        }
        if let Some(error) = registration.optional_str("errorChannel") {
            builder = builder.with_error_channel(error);
        }
        if let Some(timeout) = annotation
            .attribute("replyTimeoutInMilliseconds")
            .and_then(Value::as_i64)
        {
            builder = builder.with_reply_millisecond_timeout(timeout);
        }
        Ok(builder)
    }
}

impl Module for GatewayModule {
    fn name(&self) -> &str {
        "gatewayModule"
    }

    fn prepare(
        &self,
        configuration: &mut MessagingSystemConfiguration,
        _extension_objects: &[ExtensionObject],
    ) -> MessagingResult<()> {
        for registration in &self.registrations {
            configuration.register_gateway(Self::builder_for(registration)?)?;
        }
        Ok(())
    }
}

/// Registers the polling metadata found in the `poller` attribute of
/// service activators. Such an activator needs an `endpointId`.
#[derive(Debug, Clone)]
pub struct PollerModule {
    registrations: Vec<AnnotationRegistration>,
}

impl PollerModule {
    pub fn create(service: &dyn AnnotationRegistrationService) -> Self {
        Self {
            registrations: service
                .find_registrations_for(MESSAGE_ENDPOINT, SERVICE_ACTIVATOR)
                .into_iter()
                .filter(|r| r.method_annotation.attribute("poller").is_some())
                .collect(),
        }
    }
}

impl Module for PollerModule {
    fn name(&self) -> &str {
        "pollerModule"
    }

    fn prepare(
        &self,
        configuration: &mut MessagingSystemConfiguration,
        _extension_objects: &[ExtensionObject],
    ) -> MessagingResult<()> {
        for registration in &self.registrations {
            let endpoint_id = registration.required_str("endpointId")?;
            let poller = registration
                .method_annotation
                .attribute("poller")
                .cloned()
                .unwrap_or(Value::Null);
            let mut metadata: PollingMetadata = serde_json::from_value(poller)?;
            metadata.endpoint_id = endpoint_id.to_string();
            configuration.register_polling_metadata(metadata)?;
        }
        Ok(())
    }
}

/// A [`ModuleRetrievingService`] providing the annotation modules, all fed
/// by one registration service.
#[derive(Clone)]
pub struct AnnotationModuleRetrievingService {
    registrations: Arc<dyn AnnotationRegistrationService>,
    extension_objects: Vec<ExtensionObject>,
}

impl AnnotationModuleRetrievingService {
    pub fn create(registrations: Arc<dyn AnnotationRegistrationService>) -> Self {
        Self {
            registrations,
            extension_objects: Vec::new(),
        }
    }

    pub fn with_extension_object<T: std::any::Any + Send + Sync>(mut self, extension: T) -> Self {
        self.extension_objects.push(Arc::new(extension));
        self
    }
}

impl ModuleRetrievingService for AnnotationModuleRetrievingService {
    fn find_all_modules(&self) -> Vec<Arc<dyn Module>> {
        let service = self.registrations.as_ref();
        vec![
            Arc::new(ServiceActivatorModule::create(service)),
            Arc::new(GatewayModule::create(service)),
            Arc::new(PollerModule::create(service)),
        ]
    }

    fn find_all_extension_objects(&self) -> Vec<ExtensionObject> {
        self.extension_objects.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{PollableChannel, SimpleMessageChannelBuilder};
    use crate::handler::ServiceEndpoint;
    use crate::handler::service::tests::Calculator;
    use crate::introspection::InMemoryMethodSignatureResolver;
    use crate::message::MessageBuilder;
    use crate::reference::InMemoryReferenceSearchService;
    use serde_json::json;

    fn registrations() -> InMemoryAnnotationRegistrationService {
        InMemoryAnnotationRegistrationService::new()
            .add_annotated_method(
                "CalculatorService",
                Annotation::new(MESSAGE_ENDPOINT).with_attribute("referenceName", "calculator"),
                "multiply",
                Annotation::new(SERVICE_ACTIVATOR)
                    .with_attribute("inputChannelName", "calculate")
                    .with_attribute("endpointId", "multiplier"),
            )
            .add_annotated_method(
                "CalculatorGateway",
                Annotation::new(MESSAGE_GATEWAY),
                "calculate",
                Annotation::new(GATEWAY)
                    .with_attribute("requestChannel", "calculate")
                    .with_attribute(
                        "parameterConverters",
                        json!([
                            { "type": "payload", "parameterName": "payload" },
                            { "type": "staticHeader", "headerName": "source", "value": "gateway" }
                        ]),
                    ),
            )
    }

    fn prepare(service: InMemoryAnnotationRegistrationService) -> MessagingResult<MessagingSystemConfiguration> {
        MessagingSystemConfiguration::prepare(
            &AnnotationModuleRetrievingService::create(Arc::new(service)),
            Arc::new(InMemoryMethodSignatureResolver::new()),
        )
    }

    #[test]
    fn test_reference_name_attribute_overrides_class_name() {
        let registrations = registrations();
        let found = registrations.find_registrations_for(MESSAGE_ENDPOINT, SERVICE_ACTIVATOR);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reference_name(), "calculator");

        let gateways = registrations.find_registrations_for(MESSAGE_GATEWAY, GATEWAY);
        assert_eq!(gateways[0].reference_name(), "CalculatorGateway");
    }

    #[tokio::test]
    async fn test_annotated_methods_build_working_system() {
        let configuration = prepare(registrations()).unwrap();
        assert_eq!(
            configuration.required_reference_names().collect::<Vec<_>>(),
            vec!["calculator"]
        );

        let references = InMemoryReferenceSearchService::new()
            .with::<dyn ServiceEndpoint>("calculator", Calculator::create(3));
        let system = configuration
            .build_messaging_system(Arc::new(references))
            .await
            .unwrap();

        let reply = system
            .get_gateway_by_name("CalculatorGateway")
            .unwrap()
            .invoke("calculate", vec![json!(5)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload(), &json!(15));
        assert_eq!(reply.headers().get_str("source"), Some("gateway"));
    }

    #[test]
    fn test_missing_input_channel_is_configuration_error() {
        let service = InMemoryAnnotationRegistrationService::new().add_annotated_method(
            "CalculatorService",
            Annotation::new(MESSAGE_ENDPOINT),
            "multiply",
            Annotation::new(SERVICE_ACTIVATOR),
        );
        assert!(matches!(prepare(service), Err(MessagingError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_poller_attribute_registers_polling_metadata() {
        let service = InMemoryAnnotationRegistrationService::new().add_annotated_method(
            "CalculatorService",
            Annotation::new(MESSAGE_ENDPOINT).with_attribute("referenceName", "calculator"),
            "multiply",
            Annotation::new(SERVICE_ACTIVATOR)
                .with_attribute("inputChannelName", "numbers")
                .with_attribute("outputChannelName", "results")
                .with_attribute("endpointId", "multiplier")
                .with_attribute(
                    "poller",
                    json!({ "fixed_rate_in_milliseconds": 1, "handled_message_limit": 1 }),
                ),
        );
        let mut configuration = prepare(service).unwrap();
        let metadata = configuration.polling_metadata("multiplier").unwrap();
        assert_eq!(metadata.fixed_rate_in_milliseconds, 1);
        assert_eq!(metadata.handled_message_limit, 1);

        configuration
            .register_message_channel(SimpleMessageChannelBuilder::create_queue_channel("numbers"))
            .unwrap()
            .register_message_channel(SimpleMessageChannelBuilder::create_queue_channel("results"))
            .unwrap();
        let references = InMemoryReferenceSearchService::new()
            .with::<dyn ServiceEndpoint>("calculator", Calculator::create(2));
        let system = configuration
            .build_messaging_system(Arc::new(references))
            .await
            .unwrap();

        system
            .get_message_channel_by_name("numbers")
            .unwrap()
            .send(MessageBuilder::with_payload(4).build().unwrap())
            .await
            .unwrap();
        system
            .run_separately_running_consumer_by("multiplier")
            .await
            .unwrap();

        let results = system.get_message_channel_by_name("results").unwrap();
        let result = results.as_pollable().unwrap().receive().await.unwrap().unwrap();
        assert_eq!(result.payload(), &json!(8));
    }
}
