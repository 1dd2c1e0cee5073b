//! Mapping of message fields to method arguments.

use serde_json::Value;

use super::service::MethodArgument;
use crate::conversion::ConversionService;
use crate::error::{MessagingError, MessagingResult};
use crate::introspection::{InterfaceToCall, ParameterType};
use crate::message::{MediaType, Message};

/// Binds one method parameter to a part of the incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterConverterBuilder {
    /// The message payload.
    Payload { parameter: String },
    /// The message payload converted from its content type to `media_type`.
    PayloadAs {
        parameter: String,
        media_type: MediaType,
    },
    /// A single header. Absent optional headers become `null`.
    Header {
        parameter: String,
        header_name: String,
        required: bool,
    },
    /// Every header, as a JSON object.
    AllHeaders { parameter: String },
    /// The whole message.
    Message { parameter: String },
    /// A fixed value.
    Value { parameter: String, value: Value },
}

impl ParameterConverterBuilder {
    pub fn payload(parameter: impl Into<String>) -> Self {
        Self::Payload {
            parameter: parameter.into(),
        }
    }

    pub fn payload_as(parameter: impl Into<String>, media_type: MediaType) -> Self {
        Self::PayloadAs {
            parameter: parameter.into(),
            media_type,
        }
    }

    pub fn header(parameter: impl Into<String>, header_name: impl Into<String>) -> Self {
        Self::Header {
            parameter: parameter.into(),
            header_name: header_name.into(),
            required: true,
        }
    }

    pub fn optional_header(parameter: impl Into<String>, header_name: impl Into<String>) -> Self {
        Self::Header {
            parameter: parameter.into(),
            header_name: header_name.into(),
            required: false,
        }
    }

    pub fn all_headers(parameter: impl Into<String>) -> Self {
        Self::AllHeaders {
            parameter: parameter.into(),
        }
    }

    pub fn message(parameter: impl Into<String>) -> Self {
        Self::Message {
            parameter: parameter.into(),
        }
    }

    pub fn value(parameter: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Value {
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    pub fn parameter_name(&self) -> &str {
        match self {
            Self::Payload { parameter }
            | Self::PayloadAs { parameter, .. }
            | Self::Header { parameter, .. }
            | Self::AllHeaders { parameter }
            | Self::Message { parameter }
            | Self::Value { parameter, .. } => parameter,
        }
    }

    fn binds_payload(&self) -> bool {
        matches!(self, Self::Payload { .. } | Self::PayloadAs { .. })
    }

    async fn convert(
        &self,
        message: &Message,
        conversions: &ConversionService,
    ) -> MessagingResult<MethodArgument> {
        let argument = match self {
            Self::Payload { .. } => MethodArgument::Value(message.payload().clone()),
            Self::PayloadAs { media_type, .. } => {
                MethodArgument::Value(conversions.convert_payload(message, media_type).await?)
            }
            Self::Header {
                header_name,
                required,
                ..
            } => match message.headers().get_value(header_name) {
                Some(value) => MethodArgument::Value(value.clone()),
                None if *required => {
                    return Err(MessagingError::HeaderNotFound(header_name.clone()));
                }
                None => MethodArgument::Value(Value::Null),
            },
            Self::AllHeaders { .. } => {
                MethodArgument::Value(Value::Object(message.headers().to_value_map()))
            }
            Self::Message { .. } => MethodArgument::Message(message.clone()),
            Self::Value { value, .. } => MethodArgument::Value(value.clone()),
        };
        Ok(argument)
    }
}

/// Checks that every converter targets a parameter of `signature`.
pub(crate) fn validate_converters(
    signature: &InterfaceToCall,
    converters: &[ParameterConverterBuilder],
) -> MessagingResult<()> {
    for converter in converters {
        if signature.parameter(converter.parameter_name()).is_none() {
            return Err(MessagingError::configuration(format!(
                "{signature} has no parameter named '{}'",
                converter.parameter_name()
            )));
        }
    }
    Ok(())
}

/// Builds the argument list for `signature` from `message`.
///
/// Parameters without a converter get a default by type: the first plain
/// value parameter receives the payload (unless a payload converter exists),
/// further ones the header of the same name.
pub(crate) async fn resolve_arguments(
    signature: &InterfaceToCall,
    converters: &[ParameterConverterBuilder],
    conversions: &ConversionService,
    message: &Message,
) -> MessagingResult<Vec<MethodArgument>> {
    let mut payload_bound = converters.iter().any(ParameterConverterBuilder::binds_payload);
    let mut arguments = Vec::with_capacity(signature.parameters.len());

    for parameter in &signature.parameters {
        if let Some(converter) = converters
            .iter()
            .find(|c| c.parameter_name() == parameter.name)
        {
            arguments.push(converter.convert(message, conversions).await?);
            continue;
        }
        let argument = match parameter.parameter_type {
            ParameterType::Message => MethodArgument::Message(message.clone()),
            ParameterType::Headers => {
                MethodArgument::Value(Value::Object(message.headers().to_value_map()))
            }
            ParameterType::MethodInvocation => {
                return Err(MessagingError::configuration(format!(
                    "{signature} takes a method invocation, which only around interceptors receive"
                )));
            }
            ParameterType::Value if !payload_bound => {
                payload_bound = true;
                MethodArgument::Value(message.payload().clone())
            }
            ParameterType::Value => match message.headers().get_value(&parameter.name) {
                Some(value) => MethodArgument::Value(value.clone()),
                None if parameter.nullable => MethodArgument::Value(Value::Null),
                None => return Err(MessagingError::HeaderNotFound(parameter.name.clone())),
            },
        };
        arguments.push(argument);
    }
    Ok(arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::InterfaceParameter;
    use crate::message::MessageBuilder;
    use serde_json::json;

    fn conversions() -> ConversionService {
        ConversionService::default()
    }

    fn signature() -> InterfaceToCall {
        InterfaceToCall::create("Orders", "place")
            .with_parameter(InterfaceParameter::value("order"))
            .with_parameter(InterfaceParameter::value("customer"))
            .with_parameter(InterfaceParameter::value("note").nullable())
            .with_parameter(InterfaceParameter::new("headers", ParameterType::Headers))
    }

    #[tokio::test]
    async fn test_defaults_bind_payload_then_headers_by_name() {
        let message = MessageBuilder::with_payload(json!({"id": 1}))
            .set_header("customer", "acme")
            .build()
            .unwrap();

        let arguments = resolve_arguments(&signature(), &[], &conversions(), &message)
            .await
            .unwrap();

        assert_eq!(arguments[0].as_value(), Some(&json!({"id": 1})));
        assert_eq!(arguments[1].as_value(), Some(&json!("acme")));
        assert_eq!(arguments[2].as_value(), Some(&Value::Null));
        let headers = arguments[3].as_value().unwrap();
        assert_eq!(headers["customer"], json!("acme"));
    }

    #[tokio::test]
    async fn test_converters_override_defaults() {
        let message = MessageBuilder::with_payload("payload")
            .set_header("who", "globex")
            .build()
            .unwrap();
        let converters = vec![
            ParameterConverterBuilder::header("order", "who"),
            ParameterConverterBuilder::payload("customer"),
            ParameterConverterBuilder::value("note", "fixed"),
        ];

        let arguments = resolve_arguments(&signature(), &converters, &conversions(), &message)
            .await
            .unwrap();

        assert_eq!(arguments[0].as_value(), Some(&json!("globex")));
        assert_eq!(arguments[1].as_value(), Some(&json!("payload")));
        assert_eq!(arguments[2].as_value(), Some(&json!("fixed")));
    }

    #[tokio::test]
    async fn test_missing_required_header_fails() {
        let message = MessageBuilder::with_payload(1).build().unwrap();
        assert!(matches!(
            resolve_arguments(&signature(), &[], &conversions(), &message).await,
            Err(MessagingError::HeaderNotFound(name)) if name == "customer"
        ));
    }

    #[tokio::test]
    async fn test_payload_converted_by_content_type() {
        let message = MessageBuilder::with_payload(r#"{"id": 1}"#)
            .set_content_type(&MediaType::text_plain())
            .set_header("customer", "acme")
            .build()
            .unwrap();
        let converters = vec![ParameterConverterBuilder::payload_as(
            "order",
            MediaType::application_json(),
        )];

        let arguments = resolve_arguments(&signature(), &converters, &conversions(), &message)
            .await
            .unwrap();

        assert_eq!(arguments[0].as_value(), Some(&json!({"id": 1})));
        assert_eq!(arguments[1].as_value(), Some(&json!("acme")));
    }

    #[test]
    fn test_converter_for_unknown_parameter_is_rejected() {
        let converters = vec![ParameterConverterBuilder::payload("missing")];
        assert!(matches!(
            validate_converters(&signature(), &converters),
            Err(MessagingError::Configuration(_))
        ));
    }
}
