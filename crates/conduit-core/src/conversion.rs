//! Payload conversion between media types.
//!
//! A message payload is described by its `content-type` header; a payload
//! without one is structured JSON (`application/json`). Parameters bound with
//! [`ParameterConverterBuilder::payload_as`](crate::handler::ParameterConverterBuilder::payload_as)
//! ask the [`ConversionService`] for the payload in another media type.
//!
//! The service is looked up under [`ConversionService::REFERENCE_NAME`] when
//! endpoints are built; without a registration the default converters apply.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::error::{MessagingError, MessagingResult};
use crate::handler::{MethodArgument, MethodReturn, ServiceEndpoint};
use crate::message::{MediaType, Message};
use crate::reference::{ReferenceSearchService, ReferenceSearchServiceExt};

/// Converts payloads from one media type to another.
#[async_trait]
pub trait Converter: Send + Sync {
    fn matches(&self, source: &MediaType, target: &MediaType) -> bool;

    async fn convert(
        &self,
        payload: &Value,
        source: &MediaType,
        target: &MediaType,
    ) -> MessagingResult<Value>;
}

/// Parses `text/plain` strings as `application/json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextToJsonConverter;

#[async_trait]
impl Converter for TextToJsonConverter {
    fn matches(&self, source: &MediaType, target: &MediaType) -> bool {
        source.is_compatible_with(&MediaType::text_plain())
            && target.is_compatible_with(&MediaType::application_json())
    }

    async fn convert(
        &self,
        payload: &Value,
        _source: &MediaType,
        _target: &MediaType,
    ) -> MessagingResult<Value> {
        match payload {
            Value::String(text) => Ok(serde_json::from_str(text)?),
            other => Ok(other.clone()),
        }
    }
}

/// Serializes `application/json` payloads to `text/plain`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonToTextConverter;

#[async_trait]
impl Converter for JsonToTextConverter {
    fn matches(&self, source: &MediaType, target: &MediaType) -> bool {
        source.is_compatible_with(&MediaType::application_json())
            && target.is_compatible_with(&MediaType::text_plain())
    }

    async fn convert(
        &self,
        payload: &Value,
        _source: &MediaType,
        _target: &MediaType,
    ) -> MessagingResult<Value> {
        match payload {
            Value::String(_) => Ok(payload.clone()),
            other => Ok(Value::String(serde_json::to_string(other)?)),
        }
    }
}

/// A converter backed by a method of a [`ServiceEndpoint`] taking the payload.
pub struct ServiceConverter {
    service: Arc<dyn ServiceEndpoint>,
    method_name: String,
    source: MediaType,
    target: MediaType,
}

impl ServiceConverter {
    pub fn create(
        service: Arc<dyn ServiceEndpoint>,
        method_name: impl Into<String>,
        source: MediaType,
        target: MediaType,
    ) -> Arc<Self> {
        Arc::new(Self {
            service,
            method_name: method_name.into(),
            source,
            target,
        })
    }
}

#[async_trait]
impl Converter for ServiceConverter {
    fn matches(&self, source: &MediaType, target: &MediaType) -> bool {
        source.is_compatible_with(&self.source) && target.is_compatible_with(&self.target)
    }

    async fn convert(
        &self,
        payload: &Value,
        source: &MediaType,
        target: &MediaType,
    ) -> MessagingResult<Value> {
        let result = self
            .service
            .invoke(&self.method_name, vec![MethodArgument::Value(payload.clone())])
            .await?;
        match result {
            MethodReturn::Value(value) => Ok(value),
            MethodReturn::Message(message) => Ok(message.payload().clone()),
            MethodReturn::Nothing => Err(MessagingError::invalid_argument(format!(
                "converter '{}' returned nothing converting {source} to {target}",
                self.method_name
            ))),
        }
    }
}

/// Ordered converters; the first match wins.
#[derive(Clone)]
pub struct ConversionService {
    converters: Vec<Arc<dyn Converter>>,
}

impl Default for ConversionService {
    fn default() -> Self {
        Self::empty()
            .with_converter(Arc::new(TextToJsonConverter))
            .with_converter(Arc::new(JsonToTextConverter))
    }
}

impl ConversionService {
    pub const REFERENCE_NAME: &'static str = "conversionService";

    pub fn empty() -> Self {
        Self {
            converters: Vec::new(),
        }
    }

    /// Adds a converter, tried after those added before it.
    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converters.push(converter);
        self
    }

    /// The registered service, or the default one.
    pub fn lookup(references: &dyn ReferenceSearchService) -> MessagingResult<Arc<Self>> {
        if references.has(Self::REFERENCE_NAME) {
            return references.get_typed::<Self>(Self::REFERENCE_NAME);
        }
        Ok(Arc::new(Self::default()))
    }

    pub fn can_convert(&self, source: &MediaType, target: &MediaType) -> bool {
        source.is_compatible_with(target) || self.converters.iter().any(|c| c.matches(source, target))
    }

    pub async fn convert(
        &self,
        payload: &Value,
        source: &MediaType,
        target: &MediaType,
    ) -> MessagingResult<Value> {
        if source.is_compatible_with(target) {
            return Ok(payload.clone());
        }
        let converter = self
            .converters
            .iter()
            .find(|c| c.matches(source, target))
            .ok_or_else(|| {
                MessagingError::invalid_argument(format!("no converter from {source} to {target}"))
            })?;
        trace!(%source, %target, "Converting payload");
        converter.convert(payload, source, target).await
    }

    /// Converts the payload of `message`, as described by its content type,
    /// to `target`.
    pub async fn convert_payload(
        &self,
        message: &Message,
        target: &MediaType,
    ) -> MessagingResult<Value> {
        let source = match message.headers().content_type() {
            Some(content_type) => MediaType::parse(content_type)?,
            None => MediaType::application_json(),
        };
        self.convert(message.payload(), &source, target).await
    }
}

impl std::fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionService")
            .field("converters", &self.converters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuilder;
    use crate::reference::InMemoryReferenceSearchService;
    use serde_json::json;

    struct Shouting;

    #[async_trait]
    impl ServiceEndpoint for Shouting {
        async fn invoke(
            &self,
            _method: &str,
            arguments: Vec<MethodArgument>,
        ) -> MessagingResult<MethodReturn> {
            let text = arguments
                .into_iter()
                .next()
                .map(MethodArgument::into_value)
                .and_then(|v| v.as_str().map(str::to_uppercase))
                .unwrap_or_default();
            Ok(json!(text).into())
        }
    }

    #[tokio::test]
    async fn test_text_payload_parsed_as_json() {
        let message = MessageBuilder::with_payload(r#"{"id": 7}"#)
            .set_content_type(&MediaType::text_plain())
            .build()
            .unwrap();

        let converted = ConversionService::default()
            .convert_payload(&message, &MediaType::application_json())
            .await
            .unwrap();
        assert_eq!(converted, json!({"id": 7}));
    }

    #[tokio::test]
    async fn test_payload_without_content_type_is_json() {
        let message = MessageBuilder::with_payload(json!({"id": 7})).build().unwrap();
        let service = ConversionService::default();

        assert_eq!(
            service
                .convert_payload(&message, &MediaType::text_plain())
                .await
                .unwrap(),
            json!(r#"{"id":7}"#)
        );
        assert_eq!(
            service
                .convert_payload(&message, &MediaType::application_json())
                .await
                .unwrap(),
            json!({"id": 7})
        );
    }

    #[tokio::test]
    async fn test_unknown_conversion_is_rejected() {
        let xml = MediaType::create("application", "xml");
        let service = ConversionService::default();

        assert!(!service.can_convert(&xml, &MediaType::application_json()));
        assert!(matches!(
            service.convert(&json!("<a/>"), &xml, &MediaType::application_json()).await,
            Err(MessagingError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_service_converter_registered_by_reference() {
        let shout = MediaType::create("text", "x-shout");
        let service = ConversionService::empty().with_converter(ServiceConverter::create(
            Arc::new(Shouting),
            "shout",
            MediaType::text_plain(),
            shout.clone(),
        ));
        let references = InMemoryReferenceSearchService::new()
            .with(ConversionService::REFERENCE_NAME, Arc::new(service));

        let found = ConversionService::lookup(&references).unwrap();
        let converted = found
            .convert(&json!("hello"), &MediaType::text_plain(), &shout)
            .await
            .unwrap();
        assert_eq!(converted, json!("HELLO"));
        assert!(ConversionService::lookup(&InMemoryReferenceSearchService::new()).is_ok());
    }
}
