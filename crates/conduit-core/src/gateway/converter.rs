use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{MessagingError, MessagingResult};
use crate::introspection::InterfaceToCall;
use crate::message::MessageBuilder;

/// Computes a header value from a gateway argument.
pub type HeaderExpression = Arc<dyn Fn(&Value) -> MessagingResult<Value> + Send + Sync>;

/// Maps gateway method arguments onto the request message.
#[derive(Clone)]
pub enum GatewayParameterConverter {
    /// The argument becomes the payload.
    Payload { parameter_name: String },
    /// The argument becomes the value of a header.
    Header {
        parameter_name: String,
        header_name: String,
    },
    /// Every entry of an object argument becomes a header.
    HeaderMap { parameter_name: String },
    /// A fixed header, independent of the arguments.
    StaticHeader { header_name: String, value: Value },
    /// A header computed from the argument.
    Expression {
        parameter_name: String,
        header_name: String,
        expression: HeaderExpression,
    },
}

impl GatewayParameterConverter {
    pub fn payload(parameter_name: impl Into<String>) -> Self {
        Self::Payload {
            parameter_name: parameter_name.into(),
        }
    }

    pub fn header(parameter_name: impl Into<String>, header_name: impl Into<String>) -> Self {
        Self::Header {
            parameter_name: parameter_name.into(),
            header_name: header_name.into(),
        }
    }

    pub fn header_map(parameter_name: impl Into<String>) -> Self {
        Self::HeaderMap {
            parameter_name: parameter_name.into(),
        }
    }

    pub fn static_header(header_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::StaticHeader {
            header_name: header_name.into(),
            value: value.into(),
        }
    }

    /// # Example
    ///
    /// ```rust,ignore
    /// GatewayParameterConverter::expression("order", "priority", |order| {
    ///     Ok(json!(order["total"].as_f64().unwrap_or_default() > 1000.0))
    /// })
    /// ```
    pub fn expression<F>(
        parameter_name: impl Into<String>,
        header_name: impl Into<String>,
        expression: F,
    ) -> Self
    where
        F: Fn(&Value) -> MessagingResult<Value> + Send + Sync + 'static,
    {
        Self::Expression {
            parameter_name: parameter_name.into(),
            header_name: header_name.into(),
            expression: Arc::new(expression),
        }
    }

    /// The parameter this converter reads, `None` for static headers.
    pub fn parameter_name(&self) -> Option<&str> {
        match self {
            Self::Payload { parameter_name }
            | Self::Header { parameter_name, .. }
            | Self::HeaderMap { parameter_name }
            | Self::Expression { parameter_name, .. } => Some(parameter_name),
            Self::StaticHeader { .. } => None,
        }
    }

    fn is_payload(&self) -> bool {
        matches!(self, Self::Payload { .. })
    }

    fn apply(&self, argument: &Value, builder: MessageBuilder) -> MessagingResult<MessageBuilder> {
        match self {
            Self::Payload { .. } => Ok(builder.set_payload(argument.clone())),
            Self::Header { header_name, .. } => {
                Ok(builder.set_header(header_name.as_str(), argument.clone()))
            }
            Self::HeaderMap { parameter_name } => {
                let entries = argument.as_object().ok_or_else(|| {
                    MessagingError::invalid_argument(format!(
                        "header map parameter '{parameter_name}' expects an object, got {argument}"
                    ))
                })?;
                Ok(builder.set_multiple_headers(entries.clone()))
            }
            Self::StaticHeader { header_name, value } => {
                Ok(builder.set_header(header_name.as_str(), value.clone()))
            }
            Self::Expression {
                header_name,
                expression,
                ..
            } => Ok(builder.set_header(header_name.as_str(), expression(argument)?)),
        }
    }
}

impl std::fmt::Debug for GatewayParameterConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Payload { parameter_name } => write!(f, "Payload({parameter_name})"),
            Self::Header {
                parameter_name,
                header_name,
            } => write!(f, "Header({parameter_name} -> {header_name})"),
            Self::HeaderMap { parameter_name } => write!(f, "HeaderMap({parameter_name})"),
            Self::StaticHeader { header_name, value } => {
                write!(f, "StaticHeader({header_name} = {value})")
            }
            Self::Expression {
                parameter_name,
                header_name,
                ..
            } => write!(f, "Expression({parameter_name} -> {header_name})"),
        }
    }
}

/// Turns the arguments of a gateway call into a request message.
#[derive(Debug, Clone)]
pub(crate) struct MethodCallToMessageConverter {
    interface: InterfaceToCall,
    converters: Vec<GatewayParameterConverter>,
}

impl MethodCallToMessageConverter {
    /// Validates `converters` against the method. A single unconverted
    /// parameter becomes the payload; several need explicit converters.
    pub(crate) fn new(
        interface: InterfaceToCall,
        mut converters: Vec<GatewayParameterConverter>,
    ) -> MessagingResult<Self> {
        if let Some(unknown) = converters
            .iter()
            .filter_map(GatewayParameterConverter::parameter_name)
            .find(|name| interface.parameter(name).is_none())
        {
            return Err(MessagingError::configuration(format!(
                "gateway {interface} has no parameter '{unknown}'"
            )));
        }

        let unconverted: Vec<&str> = interface
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .filter(|name| !converters.iter().any(|c| c.parameter_name() == Some(*name)))
            .collect();
        let has_payload = converters.iter().any(GatewayParameterConverter::is_payload);
        match unconverted.as_slice() {
            [] => {}
            [single] if !has_payload => {
                converters.push(GatewayParameterConverter::payload(*single));
            }
            _ => {
                return Err(MessagingError::configuration(format!(
                    "gateway {interface} needs parameter converters for {}",
                    unconverted.join(", ")
                )));
            }
        }

        Ok(Self {
            interface,
            converters,
        })
    }

    pub(crate) fn convert(&self, arguments: &[Value]) -> MessagingResult<MessageBuilder> {
        if arguments.len() != self.interface.parameters.len() {
            return Err(MessagingError::invalid_argument(format!(
                "gateway {} takes {} arguments, got {}",
                self.interface,
                self.interface.parameters.len(),
                arguments.len()
            )));
        }

        // Placeholder for methods without a payload parameter.
        let mut builder = MessageBuilder::with_payload(Value::Object(Map::new()));
        for (parameter, argument) in self.interface.parameters.iter().zip(arguments) {
            for converter in self
                .converters
                .iter()
                .filter(|c| c.parameter_name() == Some(parameter.name.as_str()))
            {
                builder = converter.apply(argument, builder)?;
            }
        }
        for converter in self
            .converters
            .iter()
            .filter(|c| c.parameter_name().is_none())
        {
            builder = converter.apply(&Value::Null, builder)?;
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::{InterfaceParameter, ReturnType};
    use serde_json::json;

    fn place_order() -> InterfaceToCall {
        InterfaceToCall::create("OrderGateway", "place")
            .with_parameter(InterfaceParameter::value("order"))
            .with_parameter(InterfaceParameter::value("customer"))
            .with_parameter(InterfaceParameter::value("meta"))
            .with_return_type(ReturnType::Value)
    }

    #[test]
    fn test_single_parameter_defaults_to_payload() {
        let interface = InterfaceToCall::create("OrderGateway", "cancel")
            .with_parameter(InterfaceParameter::value("id"));
        let converter = MethodCallToMessageConverter::new(interface, Vec::new()).unwrap();

        let message = converter.convert(&[json!(42)]).unwrap().build().unwrap();
        assert_eq!(message.payload(), &json!(42));
    }

    #[test]
    fn test_every_converter_kind() {
        let converter = MethodCallToMessageConverter::new(
            place_order(),
            vec![
                GatewayParameterConverter::payload("order"),
                GatewayParameterConverter::header("customer", "customerId"),
                GatewayParameterConverter::expression("order", "large", |order| {
                    Ok(json!(order["total"].as_i64().unwrap_or_default() > 100))
                }),
                GatewayParameterConverter::header_map("meta"),
                GatewayParameterConverter::static_header("source", "web"),
            ],
        )
        .unwrap();

        let message = converter
            .convert(&[
                json!({"total": 150}),
                json!("c-7"),
                json!({"trace": "t-1", "attempt": 2}),
            ])
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(message.payload(), &json!({"total": 150}));
        let headers = message.headers();
        assert_eq!(headers.get_str("customerId"), Some("c-7"));
        assert_eq!(headers.get_value("large"), Some(&json!(true)));
        assert_eq!(headers.get_str("trace"), Some("t-1"));
        assert_eq!(headers.get_value("attempt"), Some(&json!(2)));
        assert_eq!(headers.get_str("source"), Some("web"));
    }

    #[test]
    fn test_several_unconverted_parameters_are_rejected() {
        let result = MethodCallToMessageConverter::new(
            place_order(),
            vec![GatewayParameterConverter::header("customer", "customerId")],
        );
        assert!(matches!(result, Err(MessagingError::Configuration(_))));
    }

    #[test]
    fn test_converter_for_unknown_parameter_is_rejected() {
        let result = MethodCallToMessageConverter::new(
            place_order(),
            vec![GatewayParameterConverter::payload("missing")],
        );
        assert!(matches!(result, Err(MessagingError::Configuration(_))));
    }

    #[test]
    fn test_argument_count_and_header_map_shape_are_checked() {
        let converter = MethodCallToMessageConverter::new(
            place_order(),
            vec![
                GatewayParameterConverter::payload("order"),
                GatewayParameterConverter::header("customer", "customerId"),
                GatewayParameterConverter::header_map("meta"),
            ],
        )
        .unwrap();

        assert!(matches!(
            converter.convert(&[json!(1)]),
            Err(MessagingError::InvalidArgument(_))
        ));
        assert!(matches!(
            converter.convert(&[json!(1), json!("c"), json!("not a map")]),
            Err(MessagingError::InvalidArgument(_))
        ));
    }
}
