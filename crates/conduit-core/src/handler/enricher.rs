//! Content enricher: writes computed values into the payload or headers.
//!
//! Payload properties are addressed by JSON pointer (`/customer/name`).
//! Missing object members along the path are created; array elements are
//! addressed by index and `-` appends.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::parameter::ParameterConverterBuilder;
use super::service::{BoundMethod, MethodCall, MethodReturn, ServiceEndpoint, ServiceReference};
use super::{BuildContext, EndpointSettings, MessageHandlerBuilder, MessageProcessor};
use crate::error::{MessagingError, MessagingResult};
use crate::introspection::{InterfaceParameter, InterfaceToCall, MethodSignatureResolver, ReturnType};
use crate::message::{HeaderValue, Message, MessageBuilder};

/// Computes an enrichment value from the request and the service result, if
/// the enricher calls a service.
type EnrichFn = Arc<dyn Fn(&Message, Option<&Value>) -> MessagingResult<Value> + Send + Sync>;

#[derive(Clone)]
enum EditorTarget {
    Payload(String),
    Header(String),
}

#[derive(Clone)]
enum EditorValue {
    Static(Value),
    Computed(EnrichFn),
}

/// One property written by an [`EnricherBuilder`].
#[derive(Clone)]
pub struct PropertyEditor {
    target: EditorTarget,
    value: EditorValue,
}

impl PropertyEditor {
    /// Sets the payload property at `pointer` to a computed value.
    pub fn payload<F>(pointer: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Message, Option<&Value>) -> MessagingResult<Value> + Send + Sync + 'static,
    {
        Self {
            target: EditorTarget::Payload(pointer.into()),
            value: EditorValue::Computed(Arc::new(compute)),
        }
    }

    pub fn payload_value(pointer: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            target: EditorTarget::Payload(pointer.into()),
            value: EditorValue::Static(value.into()),
        }
    }

    /// Sets header `name` to a computed value.
    pub fn header<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Message, Option<&Value>) -> MessagingResult<Value> + Send + Sync + 'static,
    {
        Self {
            target: EditorTarget::Header(name.into()),
            value: EditorValue::Computed(Arc::new(compute)),
        }
    }

    pub fn header_value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            target: EditorTarget::Header(name.into()),
            value: EditorValue::Static(value.into()),
        }
    }

    fn evaluate(&self, request: &Message, result: Option<&Value>) -> MessagingResult<Value> {
        match &self.value {
            EditorValue::Static(value) => Ok(value.clone()),
            EditorValue::Computed(compute) => compute(request, result),
        }
    }
}

/// Endpoint enriching a message with values computed from the message itself
/// or from the result of a service method called with it.
#[derive(Clone)]
pub struct EnricherBuilder {
    settings: EndpointSettings,
    method: Option<MethodCall>,
    editors: Vec<PropertyEditor>,
}

impl EnricherBuilder {
    /// Enriches from the request message alone.
    pub fn create(editors: Vec<PropertyEditor>) -> Self {
        Self {
            settings: EndpointSettings::default(),
            method: None,
            editors,
        }
    }

    /// Calls `method_name` of the referenced service first; editors receive
    /// its result.
    pub fn create_with_service(
        reference_name: impl Into<String>,
        method_name: impl Into<String>,
        editors: Vec<PropertyEditor>,
    ) -> Self {
        Self {
            method: Some(MethodCall::new(
                ServiceReference::Name(reference_name.into()),
                method_name,
            )),
            ..Self::create(editors)
        }
    }

    pub fn create_with_direct_object(
        service: Arc<dyn ServiceEndpoint>,
        method_name: impl Into<String>,
        editors: Vec<PropertyEditor>,
    ) -> Self {
        Self {
            method: Some(MethodCall::new(ServiceReference::Instance(service), method_name)),
            ..Self::create(editors)
        }
    }

    pub fn with_property_editor(mut self, editor: PropertyEditor) -> Self {
        self.editors.push(editor);
        self
    }

    pub fn with_method_parameter_converters(
        mut self,
        converters: Vec<ParameterConverterBuilder>,
    ) -> Self {
        if let Some(method) = &mut self.method {
            method.converters = converters;
        }
        self
    }
}

impl MessageHandlerBuilder for EnricherBuilder {
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
        Ok(match &self.method {
            Some(method) => method.signature(signatures),
            None => InterfaceToCall::create("conduit::Enricher", "enrich")
                .with_parameter(InterfaceParameter::value("payload"))
                .with_return_type(ReturnType::Value),
        })
    }

    fn required_reference_names(&self) -> Vec<String> {
        let mut names = self
            .method
            .as_ref()
            .map(|method| method.service.required_reference_names())
            .unwrap_or_default();
        names.extend(
            self.settings
                .around_interceptors
                .iter()
                .flat_map(|i| i.required_reference_names()),
        );
        names
    }

    fn build_processor(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        if self.editors.is_empty() {
            return Err(MessagingError::configuration(format!(
                "enricher '{}' has no property editors",
                self.endpoint_id().unwrap_or("anonymous")
            )));
        }
        let method = self
            .method
            .as_ref()
            .map(|method| method.bind(context))
            .transpose()?;
        Ok(Arc::new(EnricherProcessor {
            method,
            editors: self.editors.clone(),
        }))
    }
}

struct EnricherProcessor {
    method: Option<BoundMethod>,
    editors: Vec<PropertyEditor>,
}

#[async_trait]
impl MessageProcessor for EnricherProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        let result = match &self.method {
            Some(method) => match method.call(&message).await? {
                MethodReturn::Nothing => None,
                MethodReturn::Value(value) => Some(value),
                MethodReturn::Message(reply) => Some(reply.payload().clone()),
            },
            None => None,
        };

        let mut payload = message.payload().clone();
        let mut headers = Vec::new();
        for editor in &self.editors {
            let value = editor.evaluate(&message, result.as_ref())?;
            match &editor.target {
                EditorTarget::Payload(pointer) => write_at_pointer(&mut payload, pointer, value)?,
                EditorTarget::Header(name) => headers.push((name.clone(), HeaderValue::from(value))),
            }
        }

        MessageBuilder::from_message(&message)
            .set_payload(payload)
            .set_multiple_headers(headers)
            .build()
            .map(Some)
    }
}

/// Writes `value` at the JSON pointer `pointer` inside `target`.
pub(crate) fn write_at_pointer(target: &mut Value, pointer: &str, value: Value) -> MessagingResult<()> {
    if pointer.is_empty() {
        *target = value;
        return Ok(());
    }
    let path = pointer.strip_prefix('/').ok_or_else(|| {
        MessagingError::invalid_argument(format!("property path '{pointer}' must start with '/'"))
    })?;
    let tokens: Vec<String> = path
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect();
    let Some((last, parents)) = tokens.split_last() else {
        return Ok(());
    };

    let mut current = target;
    for token in parents {
        current = match current {
            Value::Object(map) => map
                .entry(token.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = array_index(token, items.len(), pointer)?;
                items.get_mut(index).ok_or_else(|| out_of_bounds(pointer))?
            }
            _ => return Err(not_a_container(pointer, token)),
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
        }
        Value::Array(items) if last == "-" => items.push(value),
        Value::Array(items) => {
            let index = array_index(last, items.len(), pointer)?;
            match index.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[index] = value,
                std::cmp::Ordering::Equal => items.push(value),
                std::cmp::Ordering::Greater => return Err(out_of_bounds(pointer)),
            }
        }
        _ => return Err(not_a_container(pointer, last)),
    }
    Ok(())
}

fn array_index(token: &str, len: usize, pointer: &str) -> MessagingResult<usize> {
    if token == "-" {
        return Ok(len);
    }
    token.parse().map_err(|_| {
        MessagingError::invalid_argument(format!(
            "'{token}' in property path '{pointer}' is not an array index"
        ))
    })
}

fn out_of_bounds(pointer: &str) -> MessagingError {
    MessagingError::invalid_argument(format!("property path '{pointer}' is out of bounds"))
}

fn not_a_container(pointer: &str, token: &str) -> MessagingError {
    MessagingError::invalid_argument(format!(
        "cannot set '{token}' of property path '{pointer}' on a scalar value"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::service::tests::Calculator;
    use crate::handler::testing::{context_with, empty_context};
    use crate::reference::InMemoryReferenceSearchService;
    use serde_json::json;

    async fn enrich(builder: EnricherBuilder, message: Message) -> MessagingResult<Message> {
        let processor = builder.build_processor(&empty_context())?;
        Ok(processor.process(message).await?.unwrap())
    }

    #[tokio::test]
    async fn test_payload_property_from_request() {
        let message = MessageBuilder::with_payload(json!({"order": {"quantity": 3, "tags": []}}))
            .set_header("customer", "acme")
            .build()
            .unwrap();
        let builder = EnricherBuilder::create(vec![
            PropertyEditor::payload("/order/customer", |request, _| {
                Ok(json!(request.headers().get_str("customer")))
            }),
            PropertyEditor::payload_value("/order/tags/-", "priority"),
        ]);

        let enriched = enrich(builder, message).await.unwrap();

        assert_eq!(
            enriched.payload(),
            &json!({"order": {"quantity": 3, "customer": "acme", "tags": ["priority"]}})
        );
        assert_eq!(enriched.headers().get_str("customer"), Some("acme"));
    }

    #[tokio::test]
    async fn test_service_result_written_to_payload_and_header() {
        let references = InMemoryReferenceSearchService::new()
            .with::<dyn ServiceEndpoint>("calculator", Calculator::create(10));
        let builder = EnricherBuilder::create_with_service(
            "calculator",
            "sum",
            vec![PropertyEditor::header("total", |_, result| {
                Ok(result.cloned().unwrap_or(Value::Null))
            })],
        )
        .with_property_editor(PropertyEditor::payload("", |_, result| {
            Ok(json!({"total": result}))
        }));
        assert_eq!(builder.required_reference_names(), vec!["calculator"]);

        let processor = builder
            .build_processor(&context_with(references, Vec::new()))
            .unwrap();
        let enriched = processor
            .process(MessageBuilder::with_payload(5).build().unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(enriched.payload(), &json!({"total": 15}));
        assert_eq!(enriched.headers().get_value("total"), Some(&json!(15)));
    }

    #[tokio::test]
    async fn test_array_index_and_scalar_errors() {
        let message = MessageBuilder::with_payload(json!({"lines": [{"sku": "a"}], "note": "x"}))
            .build()
            .unwrap();

        let enriched = enrich(
            EnricherBuilder::create(vec![PropertyEditor::payload_value("/lines/0/price", 9)]),
            message.clone(),
        )
        .await
        .unwrap();
        assert_eq!(enriched.payload()["lines"][0], json!({"sku": "a", "price": 9}));

        for pointer in ["/lines/5/price", "/note/length", "lines"] {
            let result = enrich(
                EnricherBuilder::create(vec![PropertyEditor::payload_value(pointer, 1)]),
                message.clone(),
            )
            .await;
            assert!(
                matches!(result, Err(MessagingError::InvalidArgument(_))),
                "{pointer}"
            );
        }
    }

    #[test]
    fn test_enricher_without_editors_is_rejected() {
        assert!(matches!(
            EnricherBuilder::create(Vec::new()).build_processor(&empty_context()),
            Err(MessagingError::Configuration(_))
        ));
    }
}
