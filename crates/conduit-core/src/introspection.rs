//! Method signature descriptors.
//!
//! Endpoints, gateways and interceptors are described by an
//! [`InterfaceToCall`]: the interface and method they target, the parameters
//! and return type of that method, and the annotations attached to it.
//! Descriptors are registered explicitly and looked up through a
//! [`MethodSignatureResolver`]; nothing is discovered at runtime.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MessagingError, MessagingResult};

/// A metadata record attached to a class, method or endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation type name, e.g. `ServiceActivator`.
    pub kind: String,
    /// Annotation attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Annotation {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns a non-empty string attribute.
    pub fn str_attribute(&self, name: &str) -> Option<&str> {
        self.attribute(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Semantic type of a method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// Any JSON value.
    #[default]
    Value,
    /// The whole message.
    Message,
    /// All message headers as an object.
    Headers,
    /// The continuation handed to around interceptors.
    MethodInvocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceParameter {
    pub name: String,
    #[serde(default)]
    pub parameter_type: ParameterType,
    #[serde(default)]
    pub nullable: bool,
}

impl InterfaceParameter {
    pub fn new(name: impl Into<String>, parameter_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            parameter_type,
            nullable: false,
        }
    }

    /// A parameter accepting any value.
    pub fn value(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Value)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// What a method returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnType {
    /// Nothing; callers never wait for a reply.
    #[default]
    Void,
    /// A value.
    Value,
    /// A whole message.
    Message,
}

/// Descriptor of a method on an interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceToCall {
    pub interface_name: String,
    pub method_name: String,
    #[serde(default)]
    pub parameters: Vec<InterfaceParameter>,
    #[serde(default)]
    pub return_type: ReturnType,
    #[serde(default)]
    pub nullable_return: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub class_annotations: Vec<Annotation>,
    #[serde(default)]
    pub method_annotations: Vec<Annotation>,
}

impl InterfaceToCall {
    pub fn create(interface_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            parameters: Vec::new(),
            return_type: ReturnType::Void,
            nullable_return: false,
            is_static: false,
            class_annotations: Vec::new(),
            method_annotations: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: InterfaceParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_return_type(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn with_nullable_return(mut self) -> Self {
        self.nullable_return = true;
        self
    }

    pub fn with_class_annotation(mut self, annotation: Annotation) -> Self {
        self.class_annotations.push(annotation);
        self
    }

    pub fn with_method_annotation(mut self, annotation: Annotation) -> Self {
        self.method_annotations.push(annotation);
        self
    }

    pub fn is_void(&self) -> bool {
        self.return_type == ReturnType::Void
    }

    pub fn has_single_parameter(&self) -> bool {
        self.parameters.len() == 1
    }

    pub fn has_parameter_of_type(&self, parameter_type: ParameterType) -> bool {
        self.parameters
            .iter()
            .any(|p| p.parameter_type == parameter_type)
    }

    pub fn parameter(&self, name: &str) -> Option<&InterfaceParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// `interface::method`, the string pointcuts match against.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.interface_name, self.method_name)
    }

    /// Returns `true` if the class or the method carries an annotation of `kind`.
    pub fn has_annotation(&self, kind: &str) -> bool {
        self.class_annotations
            .iter()
            .chain(&self.method_annotations)
            .any(|a| a.kind == kind)
    }
}

impl fmt::Display for InterfaceToCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.interface_name, self.method_name)
    }
}

/// Looks up method descriptors.
pub trait MethodSignatureResolver: Send + Sync {
    fn resolve(&self, interface_name: &str, method_name: &str) -> MessagingResult<InterfaceToCall>;
}

/// A [`MethodSignatureResolver`] fed with explicit registrations.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMethodSignatureResolver {
    signatures: HashMap<(String, String), InterfaceToCall>,
}

impl InMemoryMethodSignatureResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, signature: InterfaceToCall) -> &mut Self {
        self.signatures.insert(
            (
                signature.interface_name.clone(),
                signature.method_name.clone(),
            ),
            signature,
        );
        self
    }

    pub fn with(mut self, signature: InterfaceToCall) -> Self {
        self.register(signature);
        self
    }
}

impl MethodSignatureResolver for InMemoryMethodSignatureResolver {
    fn resolve(&self, interface_name: &str, method_name: &str) -> MessagingResult<InterfaceToCall> {
        self.signatures
            .get(&(interface_name.to_string(), method_name.to_string()))
            .cloned()
            .ok_or_else(|| {
                MessagingError::configuration(format!(
                    "no signature registered for {interface_name}::{method_name}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_registered_signature() {
        let resolver = InMemoryMethodSignatureResolver::new().with(
            InterfaceToCall::create("OrderService", "place")
                .with_parameter(InterfaceParameter::value("order"))
                .with_return_type(ReturnType::Value)
                .with_method_annotation(Annotation::new("Transactional")),
        );

        let signature = resolver.resolve("OrderService", "place").unwrap();
        assert_eq!(signature.qualified_name(), "OrderService::place");
        assert!(signature.has_single_parameter());
        assert!(!signature.is_void());
        assert!(signature.has_annotation("Transactional"));
        assert!(resolver.resolve("OrderService", "cancel").is_err());
    }

    #[test]
    fn test_annotation_string_attributes() {
        let annotation = Annotation::new("ServiceActivator")
            .with_attribute("inputChannelName", "orders")
            .with_attribute("outputChannelName", "")
            .with_attribute("requiresReply", json!(true));

        assert_eq!(annotation.str_attribute("inputChannelName"), Some("orders"));
        assert_eq!(annotation.str_attribute("outputChannelName"), None);
        assert_eq!(annotation.attribute("requiresReply"), Some(&json!(true)));
    }
}
