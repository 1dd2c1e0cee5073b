//! Around interceptors.
//!
//! An around interceptor receives a [`MethodInvocation`] and decides whether
//! and when to [`proceed`](MethodInvocation::proceed) to the next interceptor
//! or the intercepted processor. Each one is applied as a tower [`Layer`]
//! over a type-erased [`ProcessorService`], lowest precedence outermost.

use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};

use super::pointcut::{EndpointDescriptor, Pointcut};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::MessageProcessor;
use crate::introspection::{Annotation, InterfaceToCall, ParameterType};
use crate::message::Message;
use crate::reference::{ReferenceSearchService, ReferenceSearchServiceExt};

/// A message processor as a cloneable tower service.
pub type ProcessorService = BoxCloneSyncService<Message, Option<Message>, MessagingError>;

/// Wraps a [`MessageProcessor`] into a [`ProcessorService`].
pub fn processor_service(processor: Arc<dyn MessageProcessor>) -> ProcessorService {
    ProcessorService::new(tower::service_fn(move |message: Message| {
        let processor = Arc::clone(&processor);
        async move { processor.process(message).await }
    }))
}

/// A [`MessageProcessor`] backed by a [`ProcessorService`].
pub struct ServiceProcessor {
    service: ProcessorService,
}

impl ServiceProcessor {
    pub fn new(service: ProcessorService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageProcessor for ServiceProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        self.service.clone().oneshot(message).await
    }
}

/// The intercepted call, handed to an [`AroundInterceptor`].
pub struct MethodInvocation {
    message: Message,
    next: ProcessorService,
    interface: Arc<InterfaceToCall>,
    endpoint_annotations: Arc<[Annotation]>,
}

impl MethodInvocation {
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The intercepted method.
    pub fn interface(&self) -> &InterfaceToCall {
        &self.interface
    }

    pub fn endpoint_annotations(&self) -> &[Annotation] {
        &self.endpoint_annotations
    }

    /// Replaces the message passed on by [`proceed`](Self::proceed).
    pub fn replace_message(&mut self, message: Message) {
        self.message = message;
    }

    /// Runs the rest of the chain.
    pub async fn proceed(self) -> MessagingResult<Option<Message>> {
        self.next.oneshot(self.message).await
    }
}

/// Advice wrapped around an endpoint or gateway call.
#[async_trait]
pub trait AroundInterceptor: Send + Sync {
    async fn invoke(&self, invocation: MethodInvocation) -> MessagingResult<Option<Message>>;
}

#[derive(Clone)]
enum AroundSource {
    Reference(String),
    Instance(Arc<dyn AroundInterceptor>),
}

/// Registration of an around interceptor.
#[derive(Clone)]
pub struct AroundInterceptorReference {
    name: String,
    precedence: i32,
    pointcut: Pointcut,
    source: AroundSource,
}

impl AroundInterceptorReference {
    /// An interceptor looked up by `reference_name` when the system is built.
    pub fn create(
        name: impl Into<String>,
        reference_name: impl Into<String>,
        precedence: i32,
        pointcut: Pointcut,
    ) -> Self {
        Self {
            name: name.into(),
            precedence,
            pointcut,
            source: AroundSource::Reference(reference_name.into()),
        }
    }

    /// Like [`create`](Self::create), validating the advice method's
    /// signature: a method returning a value must take the method invocation,
    /// since it alone decides whether the call proceeds.
    pub fn create_for_signature(
        name: impl Into<String>,
        reference_name: impl Into<String>,
        signature: &InterfaceToCall,
        precedence: i32,
        pointcut: Pointcut,
    ) -> MessagingResult<Self> {
        if !signature.is_void() && !signature.has_parameter_of_type(ParameterType::MethodInvocation)
        {
            return Err(MessagingError::configuration(format!(
                "around interceptor {signature} returns a value, so it must take a method invocation"
            )));
        }
        Ok(Self::create(name, reference_name, precedence, pointcut))
    }

    pub fn create_with_instance(
        name: impl Into<String>,
        interceptor: Arc<dyn AroundInterceptor>,
        precedence: i32,
        pointcut: Pointcut,
    ) -> Self {
        Self {
            name: name.into(),
            precedence,
            pointcut,
            source: AroundSource::Instance(interceptor),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn precedence(&self) -> i32 {
        self.precedence
    }

    pub fn pointcut(&self) -> &Pointcut {
        &self.pointcut
    }

    pub fn matches(&self, target: &EndpointDescriptor<'_>) -> bool {
        self.pointcut.matches(target)
    }

    pub fn required_reference_names(&self) -> Vec<String> {
        match &self.source {
            AroundSource::Reference(name) => vec![name.clone()],
            AroundSource::Instance(_) => Vec::new(),
        }
    }

    pub fn build(
        &self,
        references: &dyn ReferenceSearchService,
    ) -> MessagingResult<Arc<dyn AroundInterceptor>> {
        match &self.source {
            AroundSource::Reference(name) => references.get_typed::<dyn AroundInterceptor>(name),
            AroundSource::Instance(interceptor) => Ok(Arc::clone(interceptor)),
        }
    }
}

impl std::fmt::Debug for AroundInterceptorReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AroundInterceptorReference")
            .field("name", &self.name)
            .field("precedence", &self.precedence)
            .field("pointcut", &self.pointcut)
            .finish()
    }
}

// ============================================================================
// AroundLayer
// ============================================================================

/// Applies one around interceptor to a [`ProcessorService`].
#[derive(Clone)]
pub struct AroundLayer {
    interceptor: Arc<dyn AroundInterceptor>,
    interface: Arc<InterfaceToCall>,
    endpoint_annotations: Arc<[Annotation]>,
}

impl AroundLayer {
    pub fn new(
        interceptor: Arc<dyn AroundInterceptor>,
        interface: Arc<InterfaceToCall>,
        endpoint_annotations: Arc<[Annotation]>,
    ) -> Self {
        Self {
            interceptor,
            interface,
            endpoint_annotations,
        }
    }
}

impl Layer<ProcessorService> for AroundLayer {
    type Service = AroundService;

    fn layer(&self, inner: ProcessorService) -> Self::Service {
        AroundService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AroundService {
    inner: ProcessorService,
    layer: AroundLayer,
}

impl Service<Message> for AroundService {
    type Response = Option<Message>;
    type Error = MessagingError;
    type Future = BoxFuture<'static, MessagingResult<Option<Message>>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // The inner service is driven to readiness by `proceed`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let invocation = MethodInvocation {
            message,
            next: self.inner.clone(),
            interface: Arc::clone(&self.layer.interface),
            endpoint_annotations: Arc::clone(&self.layer.endpoint_annotations),
        };
        let interceptor = Arc::clone(&self.layer.interceptor);
        async move { interceptor.invoke(invocation).await }.boxed()
    }
}

/// Wraps `processor` in `interceptors`, ordered by ascending precedence with
/// the first one outermost.
pub fn intercept_processor(
    processor: Arc<dyn MessageProcessor>,
    interceptors: &[AroundInterceptorReference],
    interface: InterfaceToCall,
    endpoint_annotations: Vec<Annotation>,
    references: &dyn ReferenceSearchService,
) -> MessagingResult<Arc<dyn MessageProcessor>> {
    let mut ordered: Vec<&AroundInterceptorReference> = interceptors.iter().collect();
    ordered.sort_by_key(|i| i.precedence());

    let interface = Arc::new(interface);
    let endpoint_annotations: Arc<[Annotation]> = endpoint_annotations.into();
    let mut service = processor_service(processor);
    for reference in ordered.into_iter().rev() {
        let layer = AroundLayer::new(
            reference.build(references)?,
            Arc::clone(&interface),
            Arc::clone(&endpoint_annotations),
        );
        service = ProcessorService::new(layer.layer(service));
    }
    Ok(Arc::new(ServiceProcessor::new(service)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::InterfaceParameter;
    use crate::message::MessageBuilder;
    use crate::reference::InMemoryReferenceSearchService;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl MessageProcessor for Echo {
        async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
            Ok(Some(message))
        }
    }

    struct Tracer {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AroundInterceptor for Tracer {
        async fn invoke(&self, invocation: MethodInvocation) -> MessagingResult<Option<Message>> {
            self.log.lock().push(format!("{}:in", self.name));
            let result = invocation.proceed().await;
            self.log.lock().push(format!("{}:out", self.name));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl AroundInterceptor for ShortCircuit {
        async fn invoke(&self, invocation: MethodInvocation) -> MessagingResult<Option<Message>> {
            let reply = MessageBuilder::from_message(invocation.message())
                .set_payload("cached")
                .build()?;
            Ok(Some(reply))
        }
    }

    struct Doubler;

    #[async_trait]
    impl AroundInterceptor for Doubler {
        async fn invoke(&self, mut invocation: MethodInvocation) -> MessagingResult<Option<Message>> {
            let doubled = invocation.message().payload().as_i64().unwrap_or_default() * 2;
            let message = MessageBuilder::from_message(invocation.message())
                .set_payload(doubled)
                .build()?;
            invocation.replace_message(message);
            invocation.proceed().await
        }
    }

    fn interface() -> InterfaceToCall {
        InterfaceToCall::create("Echo", "process")
    }

    fn message(payload: i64) -> Message {
        MessageBuilder::with_payload(payload).build().unwrap()
    }

    #[tokio::test]
    async fn test_lower_precedence_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tracer = |name| -> Arc<dyn AroundInterceptor> {
            Arc::new(Tracer {
                name,
                log: Arc::clone(&log),
            })
        };
        let interceptors = vec![
            AroundInterceptorReference::create_with_instance("b", tracer("b"), 10, Pointcut::Nothing),
            AroundInterceptorReference::create_with_instance("a", tracer("a"), -5, Pointcut::Nothing),
        ];

        let processor = intercept_processor(
            Arc::new(Echo),
            &interceptors,
            interface(),
            Vec::new(),
            &InMemoryReferenceSearchService::new(),
        )
        .unwrap();
        processor.process(message(1)).await.unwrap();

        assert_eq!(*log.lock(), vec!["a:in", "b:in", "b:out", "a:out"]);
    }

    #[tokio::test]
    async fn test_interceptor_may_short_circuit_or_replace_message() {
        let references = InMemoryReferenceSearchService::new()
            .with::<dyn AroundInterceptor>("cache", Arc::new(ShortCircuit));
        let short = intercept_processor(
            Arc::new(Echo),
            &[AroundInterceptorReference::create("cache", "cache", 0, Pointcut::Nothing)],
            interface(),
            Vec::new(),
            &references,
        )
        .unwrap();
        let reply = short.process(message(1)).await.unwrap().unwrap();
        assert_eq!(reply.payload(), &json!("cached"));

        let doubling = intercept_processor(
            Arc::new(Echo),
            &[AroundInterceptorReference::create_with_instance(
                "double",
                Arc::new(Doubler),
                0,
                Pointcut::Nothing,
            )],
            interface(),
            Vec::new(),
            &references,
        )
        .unwrap();
        let reply = doubling.process(message(21)).await.unwrap().unwrap();
        assert_eq!(reply.payload(), &json!(42));
    }

    #[test]
    fn test_value_returning_advice_needs_invocation_parameter() {
        let without = InterfaceToCall::create("Cache", "around")
            .with_parameter(InterfaceParameter::value("payload"))
            .with_return_type(crate::introspection::ReturnType::Value);
        assert!(matches!(
            AroundInterceptorReference::create_for_signature(
                "cache",
                "cache",
                &without,
                0,
                Pointcut::Nothing
            ),
            Err(MessagingError::Configuration(_))
        ));

        let with = without
            .clone()
            .with_parameter(InterfaceParameter::new("invocation", ParameterType::MethodInvocation));
        assert!(
            AroundInterceptorReference::create_for_signature("cache", "cache", &with, 0, Pointcut::Nothing)
                .is_ok()
        );
    }
}
