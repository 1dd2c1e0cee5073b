//! Media types carried in the `content-type` header.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{MessagingError, MessagingResult};

/// A parsed `type/subtype;param=value` media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    primary: String,
    subtype: String,
    parameters: BTreeMap<String, String>,
}

impl MediaType {
    pub const APPLICATION_JSON: &'static str = "application/json";
    pub const TEXT_PLAIN: &'static str = "text/plain";
    pub const APPLICATION_OCTET_STREAM: &'static str = "application/octet-stream";

    /// Creates a media type without parameters.
    pub fn create(primary: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            primary: primary.into().to_lowercase(),
            subtype: subtype.into().to_lowercase(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn application_json() -> Self {
        Self::create("application", "json")
    }

    pub fn text_plain() -> Self {
        Self::create("text", "plain")
    }

    /// Parses a media type string.
    pub fn parse(input: &str) -> MessagingResult<Self> {
        let mut parts = input.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let (primary, subtype) = essence
            .split_once('/')
            .filter(|(p, s)| !p.is_empty() && !s.is_empty())
            .ok_or_else(|| {
                MessagingError::invalid_argument(format!("invalid media type '{input}'"))
            })?;

        let mut media_type = Self::create(primary.trim(), subtype.trim());
        for parameter in parts {
            let (name, value) = parameter.split_once('=').ok_or_else(|| {
                MessagingError::invalid_argument(format!(
                    "invalid media type parameter '{parameter}' in '{input}'"
                ))
            })?;
            media_type = media_type.with_parameter(name.trim(), value.trim());
        }
        Ok(media_type)
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn primary_type(&self) -> &str {
        &self.primary
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Returns `true` if both types match, treating `*` as a wildcard.
    pub fn is_compatible_with(&self, other: &MediaType) -> bool {
        let matches = |a: &str, b: &str| a == "*" || b == "*" || a == b;
        matches(&self.primary, &other.primary) && matches(&self.subtype, &other.subtype)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.primary, self.subtype)?;
        for (name, value) in &self.parameters {
            write!(f, ";{name}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for MediaType {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_parameters() {
        let media_type = MediaType::parse("application/x-rust; type=OrderPlaced").unwrap();
        assert_eq!(media_type.primary_type(), "application");
        assert_eq!(media_type.subtype(), "x-rust");
        assert_eq!(media_type.parameter("type"), Some("OrderPlaced"));
        assert_eq!(media_type.to_string(), "application/x-rust;type=OrderPlaced");
    }

    #[test]
    fn test_parse_rejects_missing_subtype() {
        assert!(MediaType::parse("application").is_err());
        assert!(MediaType::parse("application/").is_err());
    }

    #[test]
    fn test_wildcard_compatibility() {
        let any = MediaType::create("*", "*");
        assert!(MediaType::application_json().is_compatible_with(&any));
        assert!(!MediaType::application_json().is_compatible_with(&MediaType::text_plain()));
    }
}
