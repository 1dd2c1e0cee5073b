use std::collections::HashSet;

use super::around::AroundInterceptorReference;
use super::method::MethodInterceptor;
use super::pointcut::EndpointDescriptor;
use crate::error::{MessagingError, MessagingResult};

/// Interceptors applying to one endpoint, each list sorted by ascending precedence.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInterceptors {
    pub before: Vec<MethodInterceptor>,
    pub around: Vec<AroundInterceptorReference>,
    pub after: Vec<MethodInterceptor>,
}

impl ResolvedInterceptors {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.around.is_empty() && self.after.is_empty()
    }
}

/// Every registered before, around and after interceptor.
#[derive(Debug, Clone, Default)]
pub struct InterceptorRegistry {
    before: Vec<MethodInterceptor>,
    around: Vec<AroundInterceptorReference>,
    after: Vec<MethodInterceptor>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_before(&mut self, interceptor: MethodInterceptor) {
        self.before.push(interceptor);
    }

    pub fn add_around(&mut self, interceptor: AroundInterceptorReference) {
        self.around.push(interceptor);
    }

    pub fn add_after(&mut self, interceptor: MethodInterceptor) {
        self.after.push(interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.around.is_empty() && self.after.is_empty()
    }

    pub fn required_reference_names(&self) -> Vec<String> {
        self.before
            .iter()
            .chain(&self.after)
            .flat_map(MethodInterceptor::required_reference_names)
            .chain(
                self.around
                    .iter()
                    .flat_map(AroundInterceptorReference::required_reference_names),
            )
            .collect()
    }

    /// Selects the interceptors for `target`: those named in `required_names`
    /// plus those whose pointcut matches.
    ///
    /// A required name that no interceptor carries is a configuration error.
    pub fn resolve(
        &self,
        target: &EndpointDescriptor<'_>,
        required_names: &[String],
    ) -> MessagingResult<ResolvedInterceptors> {
        let known: HashSet<&str> = self
            .before
            .iter()
            .chain(&self.after)
            .map(MethodInterceptor::name)
            .chain(self.around.iter().map(AroundInterceptorReference::name))
            .collect();
        if let Some(missing) = required_names
            .iter()
            .find(|name| !known.contains(name.as_str()))
        {
            return Err(MessagingError::configuration(format!(
                "can't find interceptor with name '{missing}' required by {}",
                target.interface
            )));
        }

        let required = |name: &str| required_names.iter().any(|n| n == name);
        let select = |interceptors: &[MethodInterceptor]| {
            let mut selected: Vec<MethodInterceptor> = interceptors
                .iter()
                .filter(|i| required(i.name()) || i.matches(target))
                .cloned()
                .collect();
            selected.sort_by_key(MethodInterceptor::precedence);
            selected
        };

        let mut around: Vec<AroundInterceptorReference> = self
            .around
            .iter()
            .filter(|i| required(i.name()) || i.matches(target))
            .cloned()
            .collect();
        around.sort_by_key(AroundInterceptorReference::precedence);

        Ok(ResolvedInterceptors {
            before: select(&self.before),
            around,
            after: select(&self.after),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TransformerBuilder;
    use crate::interceptor::pointcut::Pointcut;
    use crate::introspection::{Annotation, InterfaceToCall};

    fn before(name: &str, precedence: i32, pointcut: &str) -> MethodInterceptor {
        MethodInterceptor::create(
            name,
            TransformerBuilder::create_header_enricher([(name, precedence)]),
            precedence,
            Pointcut::parse(pointcut).unwrap(),
        )
        .unwrap()
    }

    fn names(interceptors: &[MethodInterceptor]) -> Vec<&str> {
        interceptors.iter().map(MethodInterceptor::name).collect()
    }

    #[test]
    fn test_matching_interceptors_sorted_by_precedence() {
        let mut registry = InterceptorRegistry::new();
        registry.add_before(before("two", 2, "Orders"));
        registry.add_before(before("low", -100, "Orders"));
        registry.add_before(before("high", 100, "Orders"));
        registry.add_before(before("other", 0, "Billing"));

        let interface = InterfaceToCall::create("Orders", "place");
        let resolved = registry
            .resolve(&EndpointDescriptor::new(&interface, &[]), &[])
            .unwrap();

        assert_eq!(names(&resolved.before), vec!["low", "two", "high"]);
        assert!(resolved.after.is_empty());
    }

    #[test]
    fn test_required_names_bind_without_pointcut() {
        let mut registry = InterceptorRegistry::new();
        registry.add_after(before("audit", 0, ""));
        registry.add_around(AroundInterceptorReference::create(
            "tx",
            "transactions",
            0,
            Pointcut::annotation("Transactional"),
        ));

        let interface = InterfaceToCall::create("Orders", "place");
        let annotations = [Annotation::new("Transactional")];
        let resolved = registry
            .resolve(
                &EndpointDescriptor::new(&interface, &annotations),
                &["audit".to_string()],
            )
            .unwrap();

        assert_eq!(names(&resolved.after), vec!["audit"]);
        assert_eq!(resolved.around.len(), 1);
    }

    #[test]
    fn test_unknown_required_name_is_error() {
        let registry = InterceptorRegistry::new();
        let interface = InterfaceToCall::create("Orders", "place");
        let result = registry.resolve(
            &EndpointDescriptor::new(&interface, &[]),
            &["missing".to_string()],
        );
        assert!(matches!(result, Err(MessagingError::Configuration(_))));
    }
}
