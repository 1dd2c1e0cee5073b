use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::parameter::ParameterConverterBuilder;
use super::service::{BoundMethod, MethodCall, MethodReturn, ServiceEndpoint, ServiceReference};
use super::{BuildContext, EndpointSettings, MessageHandlerBuilder, MessageProcessor};
use crate::error::{MessagingError, MessagingResult};
use crate::introspection::{InterfaceParameter, InterfaceToCall, MethodSignatureResolver, ReturnType};
use crate::message::{Message, MessageBuilder};

type TransformFn = Arc<dyn Fn(&Message) -> MessagingResult<Value> + Send + Sync>;

#[derive(Clone)]
enum Transformation {
    Method(MethodCall),
    Closure(TransformFn),
    HeaderEnricher(Map<String, Value>),
}

/// Endpoint replacing the payload, or enriching the headers, of a message.
#[derive(Clone)]
pub struct TransformerBuilder {
    settings: EndpointSettings,
    transformation: Transformation,
}

impl TransformerBuilder {
    /// Transforms through `method_name` of the referenced service. The result
    /// becomes the new payload.
    pub fn create(reference_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self::from(Transformation::Method(MethodCall::new(
            ServiceReference::Name(reference_name.into()),
            method_name,
        )))
    }

    pub fn create_with_direct_object(
        service: Arc<dyn ServiceEndpoint>,
        method_name: impl Into<String>,
    ) -> Self {
        Self::from(Transformation::Method(MethodCall::new(
            ServiceReference::Instance(service),
            method_name,
        )))
    }

    /// Transforms with a closure computing the new payload.
    pub fn create_with_closure<F>(transform: F) -> Self
    where
        F: Fn(&Message) -> MessagingResult<Value> + Send + Sync + 'static,
    {
        Self::from(Transformation::Closure(Arc::new(transform)))
    }

    /// Adds fixed headers, leaving the payload untouched.
    pub fn create_header_enricher<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::from(Transformation::HeaderEnricher(
            headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    fn from(transformation: Transformation) -> Self {
        Self {
            settings: EndpointSettings::default(),
            transformation,
        }
    }

    pub fn with_interface_name(mut self, interface_name: impl Into<String>) -> Self {
        if let Transformation::Method(method) = &mut self.transformation {
            method.interface_name = interface_name.into();
        }
        self
    }

    pub fn with_method_parameter_converters(
        mut self,
        converters: Vec<ParameterConverterBuilder>,
    ) -> Self {
        if let Transformation::Method(method) = &mut self.transformation {
            method.converters = converters;
        }
        self
    }
}

impl MessageHandlerBuilder for TransformerBuilder {
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
        Ok(match &self.transformation {
            Transformation::Method(method) => method.signature(signatures),
            Transformation::Closure(_) | Transformation::HeaderEnricher(_) => {
                InterfaceToCall::create("conduit::Transformer", "transform")
                    .with_parameter(InterfaceParameter::value("payload"))
                    .with_return_type(ReturnType::Value)
            }
        })
    }

    fn required_reference_names(&self) -> Vec<String> {
        let mut names = match &self.transformation {
            Transformation::Method(method) => method.service.required_reference_names(),
            _ => Vec::new(),
        };
        names.extend(
            self.settings
                .around_interceptors
                .iter()
                .flat_map(|i| i.required_reference_names()),
        );
        names
    }

    fn build_processor(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        let transform = match &self.transformation {
            Transformation::Method(method) => BoundTransformation::Method(method.bind(context)?),
            Transformation::Closure(closure) => BoundTransformation::Closure(Arc::clone(closure)),
            Transformation::HeaderEnricher(headers) => {
                BoundTransformation::HeaderEnricher(headers.clone())
            }
        };
        Ok(Arc::new(TransformerProcessor { transform }))
    }
}

enum BoundTransformation {
    Method(BoundMethod),
    Closure(TransformFn),
    HeaderEnricher(Map<String, Value>),
}

struct TransformerProcessor {
    transform: BoundTransformation,
}

#[async_trait]
impl MessageProcessor for TransformerProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        let result = match &self.transform {
            BoundTransformation::Method(method) => method.call(&message).await?,
            BoundTransformation::Closure(closure) => MethodReturn::from(closure(&message)?),
            BoundTransformation::HeaderEnricher(headers) => {
                let enriched = MessageBuilder::from_message(&message)
                    .set_multiple_headers(headers.clone())
                    .build()?;
                return Ok(Some(enriched));
            }
        };
        match result {
            MethodReturn::Nothing => Err(MessagingError::handler(format!(
                "transformer produced no result for message {}",
                message.id()
            ))),
            other => super::service::reply_from(&message, other),
        }
    }
}
