use std::sync::Arc;
use std::time::Duration;

use super::converter::{GatewayParameterConverter, MethodCallToMessageConverter};
use super::proxy::{Gateway, GatewayPipeline};
use super::send_receive::{ReplyStrategy, SendAndReceiveProcessor};
use super::transaction::TransactionFactory;
use crate::channel::ChannelResolver;
use crate::error::{MessagingError, MessagingResult};
use crate::handler::{BuildContext, MessageProcessor};
use crate::interceptor::{AroundInterceptorReference, MethodInterceptor, intercept_processor};
use crate::introspection::{
    Annotation, InterfaceParameter, InterfaceToCall, MethodSignatureResolver, ReturnType,
};
use crate::reference::ReferenceSearchServiceExt;

/// Reply timeout meaning "do not wait".
pub const DEFAULT_REPLY_TIMEOUT_MS: i64 = -1;

/// Describes one gateway method: a method call turned into a message sent on
/// a request channel, optionally waiting for the reply.
///
/// # Example
///
/// ```rust,ignore
/// let gateway = GatewayBuilder::create("orderGateway", "OrderGateway", "place", "orders")
///     .with_reply_channel("orderReplies")
///     .with_reply_millisecond_timeout(500);
/// configuration.register_gateway(gateway)?;
/// ```
#[derive(Clone, Debug)]
pub struct GatewayBuilder {
    reference_name: String,
    interface_name: String,
    method_name: String,
    request_channel_name: String,
    reply_channel_name: Option<String>,
    error_channel_name: Option<String>,
    reply_timeout_ms: i64,
    converters: Vec<GatewayParameterConverter>,
    transaction_factory_names: Vec<String>,
    required_interceptor_names: Vec<String>,
    endpoint_annotations: Vec<Annotation>,
    before: Vec<MethodInterceptor>,
    around: Vec<AroundInterceptorReference>,
    after: Vec<MethodInterceptor>,
}

impl GatewayBuilder {
    pub fn create(
        reference_name: impl Into<String>,
        interface_name: impl Into<String>,
        method_name: impl Into<String>,
        request_channel_name: impl Into<String>,
    ) -> Self {
        Self {
            reference_name: reference_name.into(),
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            request_channel_name: request_channel_name.into(),
            reply_channel_name: None,
            error_channel_name: None,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            converters: Vec::new(),
            transaction_factory_names: Vec::new(),
            required_interceptor_names: Vec::new(),
            endpoint_annotations: Vec::new(),
            before: Vec::new(),
            around: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Channel the reply is received from.
    pub fn with_reply_channel(mut self, channel: impl Into<String>) -> Self {
        self.reply_channel_name = Some(channel.into());
        self
    }

    /// Channel failures are redirected to instead of being returned.
    pub fn with_error_channel(mut self, channel: impl Into<String>) -> Self {
        self.error_channel_name = Some(channel.into());
        self
    }

    /// How long to wait on the reply channel. Zero or negative means no wait.
    pub fn with_reply_millisecond_timeout(mut self, timeout_ms: i64) -> Self {
        self.reply_timeout_ms = timeout_ms;
        self
    }

    pub fn with_parameter_converters(mut self, converters: Vec<GatewayParameterConverter>) -> Self {
        self.converters = converters;
        self
    }

    /// Reference names of [`TransactionFactory`] services wrapping every call.
    pub fn with_transaction_factories<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transaction_factory_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_required_interceptor_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_interceptor_names
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_endpoint_annotation(mut self, annotation: Annotation) -> Self {
        self.endpoint_annotations.push(annotation);
        self
    }

    pub fn add_before_interceptor(&mut self, interceptor: MethodInterceptor) {
        self.before.push(interceptor);
    }

    pub fn add_around_interceptor(&mut self, interceptor: AroundInterceptorReference) {
        self.around.push(interceptor);
    }

    pub fn add_after_interceptor(&mut self, interceptor: MethodInterceptor) {
        self.after.push(interceptor);
    }

    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn request_channel_name(&self) -> &str {
        &self.request_channel_name
    }

    pub fn reply_channel_name(&self) -> Option<&str> {
        self.reply_channel_name.as_deref()
    }

    pub fn error_channel_name(&self) -> Option<&str> {
        self.error_channel_name.as_deref()
    }

    pub fn reply_timeout_ms(&self) -> i64 {
        self.reply_timeout_ms
    }

    pub fn required_interceptor_names(&self) -> &[String] {
        &self.required_interceptor_names
    }

    pub fn endpoint_annotations(&self) -> &[Annotation] {
        &self.endpoint_annotations
    }

    pub fn required_reference_names(&self) -> Vec<String> {
        let mut names = self.transaction_factory_names.clone();
        names.extend(
            self.before
                .iter()
                .chain(&self.after)
                .flat_map(MethodInterceptor::required_reference_names),
        );
        names.extend(
            self.around
                .iter()
                .flat_map(AroundInterceptorReference::required_reference_names),
        );
        names
    }

    /// The registered signature, or one taking a payload and returning a
    /// value when nothing is registered.
    pub fn intercepted_interface(&self, signatures: &dyn MethodSignatureResolver) -> InterfaceToCall {
        signatures
            .resolve(&self.interface_name, &self.method_name)
            .unwrap_or_else(|_| {
                InterfaceToCall::create(&self.interface_name, &self.method_name)
                    .with_parameter(InterfaceParameter::value("payload"))
                    .with_return_type(ReturnType::Value)
                    .with_nullable_return()
            })
    }

    /// Validates the wiring and builds the gateway. Interceptors must have
    /// been added before.
    pub fn build(&self, context: &BuildContext) -> MessagingResult<Gateway> {
        let interface = self.intercepted_interface(context.signatures.as_ref());
        if interface.is_void() && self.reply_channel_name.is_some() {
            return Err(MessagingError::configuration(format!(
                "can't set reply channel for {interface}, it returns nothing"
            )));
        }

        let request_channel = context.channels.resolve(&self.request_channel_name)?;
        if !interface.is_void() && request_channel.is_pollable() {
            return Err(MessagingError::configuration(format!(
                "gateway {interface} expects a reply, so request channel '{}' must be subscribable",
                self.request_channel_name
            )));
        }
        let reply_channel = self
            .reply_channel_name
            .as_deref()
            .map(|name| {
                let channel = context.channels.resolve(name)?;
                channel.as_pollable().cloned().ok_or_else(|| {
                    MessagingError::configuration(format!(
                        "reply channel '{name}' of gateway {interface} must be pollable"
                    ))
                })
            })
            .transpose()?;
        let error_channel = self
            .error_channel_name
            .as_deref()
            .map(|name| context.channels.resolve(name))
            .transpose()?;

        let converter = MethodCallToMessageConverter::new(interface.clone(), self.converters.clone())?;
        let strategy = match reply_channel {
            _ if interface.is_void() => ReplyStrategy::Void,
            None => ReplyStrategy::Inline,
            Some(channel) if self.reply_timeout_ms > 0 => ReplyStrategy::Timeout {
                channel,
                timeout: Duration::from_millis(self.reply_timeout_ms.unsigned_abs()),
            },
            Some(channel) => ReplyStrategy::Receive(channel),
        };
        let transactions = self
            .transaction_factory_names
            .iter()
            .map(|name| context.references.get_typed::<dyn TransactionFactory>(name))
            .collect::<MessagingResult<Vec<_>>>()?;

        let mut core: Arc<dyn MessageProcessor> = Arc::new(SendAndReceiveProcessor {
            gateway: format!("{}::{}", self.reference_name, self.method_name),
            request_channel,
            error_channel,
            strategy,
        });
        if !self.around.is_empty() {
            core = intercept_processor(
                core,
                &self.around,
                interface.clone(),
                self.endpoint_annotations.clone(),
                context.references.as_ref(),
            )?;
        }
        let build_all = |interceptors: &[MethodInterceptor]| {
            interceptors
                .iter()
                .map(|i| i.build_processor(context))
                .collect::<MessagingResult<Vec<_>>>()
        };
        let pipeline = GatewayPipeline {
            before: build_all(&self.before)?,
            core,
            after: build_all(&self.after)?,
        };

        Ok(Gateway::new(
            self.reference_name.clone(),
            interface,
            converter,
            Arc::new(pipeline),
            transactions,
        ))
    }
}

impl std::fmt::Display for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gateway {}::{} with reference name '{}' for request channel '{}'",
            self.interface_name, self.method_name, self.reference_name, self.request_channel_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{
        ChannelRef, DirectChannel, InMemoryChannelResolver, MessageChannel, PollableChannel,
        QueueChannel, SubscribableChannel,
    };
    use crate::gateway::transaction::tests::RecordingFactory;
    use crate::handler::service::tests::Calculator;
    use crate::handler::{
        CallbackHandler, EndpointSettingsExt, MessageHandler, MessageHandlerBuilder,
        ServiceActivatorBuilder, TransformerBuilder,
    };
    use crate::interceptor::{AroundInterceptor, MethodInvocation, Pointcut};
    use crate::introspection::InMemoryMethodSignatureResolver;
    use crate::message::{ErrorMessage, Message, MessageBuilder};
    use crate::reference::InMemoryReferenceSearchService;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    fn double() -> InterfaceToCall {
        InterfaceToCall::create("Calculator", "double")
            .with_parameter(InterfaceParameter::value("number"))
            .with_return_type(ReturnType::Value)
    }

    fn notify() -> InterfaceToCall {
        InterfaceToCall::create("Notifier", "notify")
            .with_parameter(InterfaceParameter::value("event"))
    }

    fn context(references: InMemoryReferenceSearchService, channels: Vec<ChannelRef>) -> BuildContext {
        let resolver = InMemoryChannelResolver::new();
        for channel in channels {
            resolver.register(channel.name().to_string(), channel).unwrap();
        }
        BuildContext::new(
            Arc::new(references),
            Arc::new(resolver),
            Arc::new(
                InMemoryMethodSignatureResolver::new()
                    .with(double())
                    .with(notify()),
            ),
        )
    }

    /// A direct `requests` channel served by a doubling service activator.
    fn doubling_requests(
        output: Option<&str>,
        channels: Vec<ChannelRef>,
        references: InMemoryReferenceSearchService,
    ) -> BuildContext {
        let requests = DirectChannel::create("requests");
        let mut all = vec![ChannelRef::subscribable(Arc::clone(&requests))];
        all.extend(channels);
        let context = context(references, all);
        let mut activator =
            ServiceActivatorBuilder::create_with_direct_reference(Calculator::create(2), "multiply");
        if let Some(output) = output {
            activator = activator.with_output_channel_name(output);
        }
        requests.subscribe(activator.build(&context).unwrap()).unwrap();
        context
    }

    fn calculator_gateway() -> GatewayBuilder {
        GatewayBuilder::create("calculator", "Calculator", "double", "requests")
    }

    #[test]
    fn test_void_gateway_cannot_have_reply_channel() {
        let context = context(
            InMemoryReferenceSearchService::new(),
            vec![
                ChannelRef::pollable(QueueChannel::create("events")),
                ChannelRef::pollable(QueueChannel::create("replies")),
            ],
        );
        let result = GatewayBuilder::create("notifier", "Notifier", "notify", "events")
            .with_reply_channel("replies")
            .build(&context);
        assert!(matches!(result, Err(MessagingError::Configuration(_))));
    }

    #[test]
    fn test_reply_expecting_gateway_needs_subscribable_request_channel() {
        let context = context(
            InMemoryReferenceSearchService::new(),
            vec![ChannelRef::pollable(QueueChannel::create("requests"))],
        );
        assert!(matches!(
            calculator_gateway().build(&context),
            Err(MessagingError::Configuration(_))
        ));
    }

    #[test]
    fn test_reply_channel_must_be_pollable() {
        let context = context(
            InMemoryReferenceSearchService::new(),
            vec![
                ChannelRef::subscribable(DirectChannel::create("requests")),
                ChannelRef::subscribable(DirectChannel::create("replies")),
            ],
        );
        assert!(matches!(
            calculator_gateway().with_reply_channel("replies").build(&context),
            Err(MessagingError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_void_gateway_returns_after_send() {
        let events = QueueChannel::create("events");
        let context = context(
            InMemoryReferenceSearchService::new(),
            vec![ChannelRef::pollable(Arc::clone(&events))],
        );
        let gateway = GatewayBuilder::create("notifier", "Notifier", "notify", "events")
            .build(&context)
            .unwrap();

        let reply = gateway.execute(vec![json!("created")]).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_inline_reply() {
        let context = doubling_requests(None, Vec::new(), InMemoryReferenceSearchService::new());
        let gateway = calculator_gateway().build(&context).unwrap();

        let reply = gateway.execute(vec![json!(21)]).await.unwrap().unwrap();
        assert_eq!(reply.payload(), &json!(42));
    }

    #[tokio::test]
    async fn test_reply_from_configured_channel() {
        let replies = QueueChannel::create("replies");
        let context = doubling_requests(
            Some("replies"),
            vec![ChannelRef::pollable(Arc::clone(&replies))],
            InMemoryReferenceSearchService::new(),
        );
        let gateway = calculator_gateway()
            .with_reply_channel("replies")
            .with_reply_millisecond_timeout(100)
            .build(&context)
            .unwrap();

        let reply = gateway.execute(vec![json!(5)]).await.unwrap().unwrap();
        assert_eq!(reply.payload(), &json!(10));
        assert!(replies.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_reply_times_out() {
        let requests = DirectChannel::create("requests");
        requests.subscribe(CallbackHandler::new(|_| Ok(()))).unwrap();
        let context = context(
            InMemoryReferenceSearchService::new(),
            vec![
                ChannelRef::subscribable(requests),
                ChannelRef::pollable(QueueChannel::create("replies")),
            ],
        );
        let gateway = calculator_gateway()
            .with_reply_channel("replies")
            .with_reply_millisecond_timeout(50)
            .build(&context)
            .unwrap();

        let result = gateway.execute(vec![json!(1)]).await;
        assert!(matches!(
            result,
            Err(MessagingError::ReplyTimeout { timeout_ms: 50, .. })
        ));
    }

    #[tokio::test]
    async fn test_handler_failure_is_returned_without_error_channel() {
        let context = doubling_requests(None, Vec::new(), InMemoryReferenceSearchService::new());
        let gateway = calculator_gateway().build(&context).unwrap();

        let result = gateway.execute(vec![json!("not a number")]).await;
        assert!(matches!(result, Err(MessagingError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_handler_failure_is_redirected_to_error_channel() {
        let errors = QueueChannel::create("errors");
        let context = doubling_requests(
            None,
            vec![ChannelRef::pollable(Arc::clone(&errors))],
            InMemoryReferenceSearchService::new(),
        );
        let gateway = calculator_gateway()
            .with_error_channel("errors")
            .build(&context)
            .unwrap();

        let reply = gateway.execute(vec![json!("not a number")]).await.unwrap();
        assert!(reply.is_none());
        let error_message = errors.receive().await.unwrap().unwrap();
        assert!(error_message.is_error_message());
    }

    /// Answers every request with an error message on `replies`.
    struct Rejecting {
        replies: Arc<QueueChannel>,
    }

    #[async_trait]
    impl MessageHandler for Rejecting {
        async fn handle(&self, message: Message) -> MessagingResult<()> {
            let error = ErrorMessage::create(&MessagingError::handler("rejected"), &message)?;
            self.replies.send(error).await
        }
    }

    #[tokio::test]
    async fn test_error_reply_surfaces_as_handler_error() {
        let requests = DirectChannel::create("requests");
        let replies = QueueChannel::create("replies");
        requests
            .subscribe(Arc::new(Rejecting {
                replies: Arc::clone(&replies),
            }))
            .unwrap();
        let context = context(
            InMemoryReferenceSearchService::new(),
            vec![
                ChannelRef::subscribable(requests),
                ChannelRef::pollable(replies),
            ],
        );
        let gateway = calculator_gateway()
            .with_reply_channel("replies")
            .build(&context)
            .unwrap();

        let result = gateway.execute(vec![json!(1)]).await;
        assert!(matches!(result, Err(MessagingError::Handler(_))));
    }

    #[tokio::test]
    async fn test_transactions_commit_on_success_and_roll_back_on_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let references = InMemoryReferenceSearchService::new().with::<dyn TransactionFactory>(
            "tx",
            Arc::new(RecordingFactory {
                name: "tx",
                log: Arc::clone(&log),
            }),
        );
        let context = doubling_requests(None, Vec::new(), references);
        let gateway = calculator_gateway()
            .with_transaction_factories(["tx"])
            .build(&context)
            .unwrap();

        gateway.execute(vec![json!(1)]).await.unwrap();
        assert!(gateway.execute(vec![json!("oops")]).await.is_err());
        assert_eq!(
            *log.lock(),
            vec!["begin tx", "commit tx", "begin tx", "rollback tx"]
        );
    }

    struct AddOne;

    #[async_trait]
    impl AroundInterceptor for AddOne {
        async fn invoke(&self, invocation: MethodInvocation) -> MessagingResult<Option<Message>> {
            let reply = invocation.proceed().await?;
            reply
                .map(|m| {
                    let value = m.payload().as_i64().unwrap_or_default();
                    MessageBuilder::from_message(&m).set_payload(value + 1).build()
                })
                .transpose()
        }
    }

    #[tokio::test]
    async fn test_interceptors_wrap_the_call() {
        let context = doubling_requests(None, Vec::new(), InMemoryReferenceSearchService::new());
        let mut builder = calculator_gateway();
        builder.add_before_interceptor(
            MethodInterceptor::create(
                "plus-ten",
                TransformerBuilder::create_with_closure(|m| {
                    Ok(json!(m.payload().as_i64().unwrap_or_default() + 10))
                }),
                0,
                Pointcut::Nothing,
            )
            .unwrap(),
        );
        builder.add_around_interceptor(AroundInterceptorReference::create_with_instance(
            "add-one",
            Arc::new(AddOne),
            0,
            Pointcut::Nothing,
        ));
        builder.add_after_interceptor(
            MethodInterceptor::create(
                "negate",
                TransformerBuilder::create_with_closure(|m| {
                    Ok(json!(-m.payload().as_i64().unwrap_or_default()))
                }),
                0,
                Pointcut::Nothing,
            )
            .unwrap(),
        );

        // (1 + 10) * 2 = 22, + 1 = 23, negated
        let reply = builder.build(&context).unwrap().execute(vec![json!(1)]).await.unwrap();
        assert_eq!(reply.unwrap().payload(), &json!(-23));
    }

    #[tokio::test]
    async fn test_proxy_dispatches_by_method() {
        let context = doubling_requests(None, Vec::new(), InMemoryReferenceSearchService::new());
        let mut proxy = crate::gateway::GatewayProxy::new("calculator");
        proxy.add(calculator_gateway().build(&context).unwrap()).unwrap();

        let doubled: Option<i64> = proxy.invoke_for("double", vec![json!(4)]).await.unwrap();
        assert_eq!(doubled, Some(8));
        assert!(matches!(
            proxy.invoke("triple", vec![json!(4)]).await,
            Err(MessagingError::GatewayNotFound(_))
        ));
        assert!(matches!(
            proxy.add(calculator_gateway().build(&context).unwrap()),
            Err(MessagingError::Configuration(_))
        ));
    }
}
