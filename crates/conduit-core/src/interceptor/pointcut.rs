//! Pointcut expressions.
//!
//! A pointcut decides whether an interceptor applies to an endpoint. The
//! textual form supports:
//!
//! - `Interface` or `Interface::method`, with `*` wildcards;
//! - `@(Annotation)` or `@Annotation`, matching endpoints or methods carrying
//!   that annotation;
//! - `!` negating the operand that follows it;
//! - `&&`, `||` and parentheses, with `&&` binding tighter.
//!
//! Expressions are parsed once, at registration, into a [`Pointcut`] tree.

use crate::error::{MessagingError, MessagingResult};
use crate::introspection::{Annotation, InterfaceToCall};

/// What a pointcut is matched against.
#[derive(Debug, Clone, Copy)]
pub struct EndpointDescriptor<'a> {
    pub interface: &'a InterfaceToCall,
    pub endpoint_annotations: &'a [Annotation],
}

impl<'a> EndpointDescriptor<'a> {
    pub fn new(interface: &'a InterfaceToCall, endpoint_annotations: &'a [Annotation]) -> Self {
        Self {
            interface,
            endpoint_annotations,
        }
    }

    fn has_annotation(&self, kind: &str) -> bool {
        self.interface.has_annotation(kind)
            || self.endpoint_annotations.iter().any(|a| a.kind == kind)
    }
}

/// A parsed pointcut expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Pointcut {
    /// Matches nothing; the interceptor applies only where required by name.
    #[default]
    Nothing,
    /// Matches the interface name or `interface::method`.
    Interface(String),
    /// Matches when the annotation is present.
    Annotation(String),
    And(Box<Pointcut>, Box<Pointcut>),
    Or(Box<Pointcut>, Box<Pointcut>),
    Not(Box<Pointcut>),
}

impl Pointcut {
    /// Parses an expression. A blank expression matches nothing.
    pub fn parse(expression: &str) -> MessagingResult<Self> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Ok(Self::Nothing);
        }
        let mut parser = Parser {
            tokens,
            position: 0,
            expression,
        };
        let pointcut = parser.parse_or()?;
        if parser.position != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(pointcut)
    }

    pub fn interface(pattern: impl Into<String>) -> Self {
        Self::Interface(pattern.into())
    }

    pub fn annotation(kind: impl Into<String>) -> Self {
        Self::Annotation(kind.into())
    }

    pub fn and(self, other: Pointcut) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Pointcut) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    pub fn matches(&self, target: &EndpointDescriptor<'_>) -> bool {
        match self {
            Self::Nothing => false,
            Self::Interface(pattern) => {
                wildcard_matches(pattern, &target.interface.interface_name)
                    || wildcard_matches(pattern, &target.interface.qualified_name())
            }
            Self::Annotation(kind) => target.has_annotation(kind),
            Self::And(left, right) => left.matches(target) && right.matches(target),
            Self::Or(left, right) => left.matches(target) || right.matches(target),
            Self::Not(inner) => !inner.matches(target),
        }
    }
}

impl std::ops::Not for Pointcut {
    type Output = Pointcut;

    fn not(self) -> Pointcut {
        Pointcut::Not(Box::new(self))
    }
}

/// Matches `text` against `pattern`, where `*` stands for any run of characters.
pub fn wildcard_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Or,
    And,
    Not,
    Open,
    Close,
    Interface(String),
    Annotation(String),
}

fn tokenize(expression: &str) -> MessagingResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' | '&' => {
                chars.next();
                if chars.next() != Some(c) {
                    return Err(invalid(expression, &format!("expected '{c}{c}'")));
                }
                tokens.push(if c == '|' { Token::Or } else { Token::And });
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '@' => {
                chars.next();
                let name = if chars.peek() == Some(&'(') {
                    chars.next();
                    let name: String = chars.by_ref().take_while(|&c| c != ')').collect();
                    name.trim().to_string()
                } else {
                    take_name(&mut chars)
                };
                if name.is_empty() {
                    return Err(invalid(expression, "empty annotation name"));
                }
                tokens.push(Token::Annotation(name));
            }
            _ => {
                let name = take_name(&mut chars);
                if name.is_empty() {
                    return Err(invalid(expression, &format!("unexpected character '{c}'")));
                }
                tokens.push(Token::Interface(name));
            }
        }
    }
    Ok(tokens)
}

fn take_name(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut name = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || matches!(c, '|' | '&' | '!' | '(' | ')' | '@') {
            break;
        }
        name.push(c);
        chars.next();
    }
    name
}

fn invalid(expression: &str, reason: &str) -> MessagingError {
    MessagingError::configuration(format!("invalid pointcut '{expression}': {reason}"))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    expression: &'a str,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> MessagingError {
        invalid(self.expression, reason)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn parse_or(&mut self) -> MessagingResult<Pointcut> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            left = left.or(self.parse_and()?);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> MessagingResult<Pointcut> {
        let mut left = self.parse_atom()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            left = left.and(self.parse_atom()?);
        }
        Ok(left)
    }

    fn parse_atom(&mut self) -> MessagingResult<Pointcut> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        self.position += 1;
        match token {
            Token::Interface(pattern) => Ok(Pointcut::Interface(pattern)),
            Token::Annotation(kind) => Ok(Pointcut::Annotation(kind)),
            Token::Not => Ok(!self.parse_atom()?),
            Token::Open => {
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(self.error("missing ')'"));
                }
                self.position += 1;
                Ok(inner)
            }
            Token::Or | Token::And | Token::Close => Err(self.error("expected an operand")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> InterfaceToCall {
        InterfaceToCall::create("App::OrderService", "place")
            .with_method_annotation(Annotation::new("Transactional"))
    }

    fn matches(expression: &str, annotations: &[Annotation]) -> bool {
        let interface = target();
        Pointcut::parse(expression)
            .unwrap()
            .matches(&EndpointDescriptor::new(&interface, annotations))
    }

    #[test]
    fn test_wildcards() {
        assert!(wildcard_matches("Order*", "OrderService"));
        assert!(wildcard_matches("*Service", "OrderService"));
        assert!(wildcard_matches("*", ""));
        assert!(wildcard_matches("O*r*e", "OrderService"));
        assert!(!wildcard_matches("Order", "OrderService"));
        assert!(!wildcard_matches("*Repository", "OrderService"));
    }

    #[test]
    fn test_interface_and_method_patterns() {
        assert!(matches("App::OrderService", &[]));
        assert!(matches("App::Order*", &[]));
        assert!(matches("App::OrderService::place", &[]));
        assert!(!matches("App::OrderService::cancel", &[]));
        assert!(!matches("Billing*", &[]));
    }

    #[test]
    fn test_annotations_from_method_and_endpoint() {
        assert!(matches("@(Transactional)", &[]));
        assert!(matches("@Transactional", &[]));
        assert!(!matches("@(Audited)", &[]));
        assert!(matches("@(Audited)", &[Annotation::new("Audited")]));
    }

    #[test]
    fn test_boolean_composition() {
        assert!(matches("Billing* || @(Transactional)", &[]));
        assert!(!matches("Billing* && @(Transactional)", &[]));
        assert!(matches("(Billing* || App::*) && @(Transactional)", &[]));
        assert!(!matches("(Billing* || App::*) && @(Audited)", &[]));
    }

    #[test]
    fn test_negation() {
        assert!(matches("!Billing*", &[]));
        assert!(!matches("!@(Transactional)", &[]));
        assert!(matches("App::* && !(@(Audited) || Billing*)", &[]));
        assert!(!matches("App::* && !(@(Audited) || Billing*)", &[Annotation::new("Audited")]));
        assert_eq!(
            Pointcut::parse("!A").unwrap(),
            !Pointcut::interface("A")
        );
        assert!(matches!(
            Pointcut::parse("A && !"),
            Err(MessagingError::Configuration(_))
        ));
    }

    #[test]
    fn test_blank_matches_nothing_and_garbage_fails() {
        assert_eq!(Pointcut::parse("  ").unwrap(), Pointcut::Nothing);
        assert!(!matches("", &[]));
        assert!(matches!(
            Pointcut::parse("A |"),
            Err(MessagingError::Configuration(_))
        ));
        assert!(matches!(
            Pointcut::parse("(A || B"),
            Err(MessagingError::Configuration(_))
        ));
    }
}
