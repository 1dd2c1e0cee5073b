//! Channel interceptors and the adapters applying them.
//!
//! Interceptors attached to one channel run in descending importance for the
//! `pre_*` hooks and in the mirror order for `post_*` and completion hooks,
//! so the most important interceptor is outermost on both ways.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::{ChannelRef, MessageChannel, PollableChannel, SubscribableChannel};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::MessageHandler;
use crate::interceptor::pointcut::wildcard_matches;
use crate::message::Message;
use crate::reference::{ReferenceSearchService, ReferenceSearchServiceExt};

/// Hooks wrapped around every send and receive of a channel.
///
/// All hooks have pass-through defaults.
#[async_trait]
pub trait ChannelInterceptor: Send + Sync {
    /// Called before sending. Returning `None` silently drops the message.
    async fn pre_send(
        &self,
        message: Message,
        _channel: &ChannelRef,
    ) -> MessagingResult<Option<Message>> {
        Ok(Some(message))
    }

    /// Called once the send returned, with its outcome.
    async fn post_send(
        &self,
        _message: &Message,
        _channel: &ChannelRef,
        _success: bool,
    ) -> MessagingResult<()> {
        Ok(())
    }

    /// Called after the send completed, whatever happened.
    async fn after_send_completion(
        &self,
        _message: &Message,
        _channel: &ChannelRef,
        _error: Option<&MessagingError>,
    ) {
    }

    /// Called before receiving. Returning `false` skips the receive attempt.
    async fn pre_receive(&self, _channel: &ChannelRef) -> MessagingResult<bool> {
        Ok(true)
    }

    /// Called with the received message, which may be replaced or dropped.
    async fn post_receive(
        &self,
        message: Option<Message>,
        _channel: &ChannelRef,
    ) -> MessagingResult<Option<Message>> {
        Ok(message)
    }

    /// Called after the receive completed, whatever happened.
    async fn after_receive_completion(
        &self,
        _message: Option<&Message>,
        _channel: &ChannelRef,
        _error: Option<&MessagingError>,
    ) {
    }
}

#[derive(Clone)]
enum InterceptorSource {
    Reference(String),
    Instance(Arc<dyn ChannelInterceptor>),
}

/// Registration of a channel interceptor for the channels matching a pattern.
///
/// The pattern is an exact channel name or contains `*` wildcards.
#[derive(Clone)]
pub struct ChannelInterceptorBuilder {
    channel_pattern: String,
    importance: i32,
    source: InterceptorSource,
}

impl ChannelInterceptorBuilder {
    /// Interceptor resolved from the reference service at build time.
    pub fn create(
        channel_pattern: impl Into<String>,
        reference_name: impl Into<String>,
    ) -> Self {
        Self {
            channel_pattern: channel_pattern.into(),
            importance: 0,
            source: InterceptorSource::Reference(reference_name.into()),
        }
    }

    /// Interceptor given directly.
    pub fn create_with_instance(
        channel_pattern: impl Into<String>,
        interceptor: Arc<dyn ChannelInterceptor>,
    ) -> Self {
        Self {
            channel_pattern: channel_pattern.into(),
            importance: 0,
            source: InterceptorSource::Instance(interceptor),
        }
    }

    /// Higher importance runs first on the way in.
    pub fn with_importance(mut self, importance: i32) -> Self {
        self.importance = importance;
        self
    }

    pub fn importance(&self) -> i32 {
        self.importance
    }

    pub fn channel_pattern(&self) -> &str {
        &self.channel_pattern
    }

    pub fn relates_to(&self, channel_name: &str) -> bool {
        wildcard_matches(&self.channel_pattern, channel_name)
    }

    pub fn required_reference_names(&self) -> Vec<String> {
        match &self.source {
            InterceptorSource::Reference(name) => vec![name.clone()],
            InterceptorSource::Instance(_) => Vec::new(),
        }
    }

    pub fn build(
        &self,
        references: &dyn ReferenceSearchService,
    ) -> MessagingResult<Arc<dyn ChannelInterceptor>> {
        match &self.source {
            InterceptorSource::Reference(name) => {
                references.get_typed::<dyn ChannelInterceptor>(name)
            }
            InterceptorSource::Instance(interceptor) => Ok(Arc::clone(interceptor)),
        }
    }
}

/// Orders interceptors for attachment: descending importance, stable.
pub(crate) fn order_by_importance(
    mut interceptors: Vec<(i32, Arc<dyn ChannelInterceptor>)>,
) -> Vec<Arc<dyn ChannelInterceptor>> {
    interceptors.sort_by(|a, b| b.0.cmp(&a.0));
    interceptors.into_iter().map(|(_, i)| i).collect()
}

/// Runs the send pipeline shared by both adapter kinds.
async fn intercepted_send(
    interceptors: &[Arc<dyn ChannelInterceptor>],
    channel: &ChannelRef,
    message: Message,
) -> MessagingResult<()> {
    let mut message = message;
    for (index, interceptor) in interceptors.iter().enumerate() {
        match interceptor.pre_send(message.clone(), channel).await {
            Ok(Some(next)) => message = next,
            Ok(None) => {
                trace!(channel = %channel.name(), "Message dropped by channel interceptor");
                for applied in interceptors[..index].iter().rev() {
                    applied.after_send_completion(&message, channel, None).await;
                }
                return Ok(());
            }
            Err(e) => {
                for applied in interceptors[..index].iter().rev() {
                    applied.after_send_completion(&message, channel, Some(&e)).await;
                }
                return Err(e);
            }
        }
    }

    let mut result = channel.send(message.clone()).await;
    let success = result.is_ok();
    for interceptor in interceptors.iter().rev() {
        if let Err(e) = interceptor.post_send(&message, channel, success).await
            && result.is_ok()
        {
            result = Err(e);
        }
    }
    for interceptor in interceptors.iter().rev() {
        interceptor
            .after_send_completion(&message, channel, result.as_ref().err())
            .await;
    }
    result
}

/// A subscribable channel wrapped with its interceptors.
pub struct InterceptedSubscribableChannel {
    inner: Arc<dyn SubscribableChannel>,
    inner_ref: ChannelRef,
    interceptors: Vec<Arc<dyn ChannelInterceptor>>,
}

impl InterceptedSubscribableChannel {
    /// `interceptors` must already be ordered by descending importance.
    pub fn create(
        inner: Arc<dyn SubscribableChannel>,
        interceptors: Vec<Arc<dyn ChannelInterceptor>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner_ref: ChannelRef::Subscribable(Arc::clone(&inner)),
            inner,
            interceptors,
        })
    }
}

#[async_trait]
impl MessageChannel for InterceptedSubscribableChannel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, message: Message) -> MessagingResult<()> {
        intercepted_send(&self.interceptors, &self.inner_ref, message).await
    }
}

impl SubscribableChannel for InterceptedSubscribableChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> MessagingResult<()> {
        self.inner.subscribe(handler)
    }

    fn unsubscribe(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        self.inner.unsubscribe(handler)
    }
}

/// A pollable channel wrapped with its interceptors.
pub struct InterceptedPollableChannel {
    inner: Arc<dyn PollableChannel>,
    inner_ref: ChannelRef,
    interceptors: Vec<Arc<dyn ChannelInterceptor>>,
}

impl InterceptedPollableChannel {
    /// `interceptors` must already be ordered by descending importance.
    pub fn create(
        inner: Arc<dyn PollableChannel>,
        interceptors: Vec<Arc<dyn ChannelInterceptor>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner_ref: ChannelRef::Pollable(Arc::clone(&inner)),
            inner,
            interceptors,
        })
    }

    async fn intercepted_receive(
        &self,
        timeout: Option<Duration>,
    ) -> MessagingResult<Option<Message>> {
        let channel = &self.inner_ref;
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            match interceptor.pre_receive(channel).await {
                Ok(true) => {}
                Ok(false) => {
                    trace!(channel = %channel.name(), "Receive skipped by channel interceptor");
                    for applied in self.interceptors[..index].iter().rev() {
                        applied.after_receive_completion(None, channel, None).await;
                    }
                    return Ok(None);
                }
                Err(e) => {
                    for applied in self.interceptors[..index].iter().rev() {
                        applied.after_receive_completion(None, channel, Some(&e)).await;
                    }
                    return Err(e);
                }
            }
        }

        let mut result = match timeout {
            Some(timeout) => self.inner.receive_with_timeout(timeout).await,
            None => self.inner.receive().await,
        };
        for interceptor in self.interceptors.iter().rev() {
            result = match result {
                Ok(message) => interceptor.post_receive(message, channel).await,
                Err(e) => Err(e),
            };
        }
        for interceptor in self.interceptors.iter().rev() {
            match &result {
                Ok(message) => {
                    interceptor
                        .after_receive_completion(message.as_ref(), channel, None)
                        .await
                }
                Err(e) => {
                    interceptor
                        .after_receive_completion(None, channel, Some(e))
                        .await
                }
            }
        }
        result
    }
}

#[async_trait]
impl MessageChannel for InterceptedPollableChannel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, message: Message) -> MessagingResult<()> {
        intercepted_send(&self.interceptors, &self.inner_ref, message).await
    }
}

#[async_trait]
impl PollableChannel for InterceptedPollableChannel {
    async fn receive(&self) -> MessagingResult<Option<Message>> {
        self.intercepted_receive(None).await
    }

    async fn receive_with_timeout(&self, timeout: Duration) -> MessagingResult<Option<Message>> {
        self.intercepted_receive(Some(timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DirectChannel, QueueChannel};
    use crate::handler::CallbackHandler;
    use crate::message::MessageBuilder;
    use crate::reference::InMemoryReferenceSearchService;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every hook call as `"<name>:<hook>"`.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        drop_messages: bool,
        skip_receive: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                drop_messages: false,
                skip_receive: false,
            })
        }

        fn record(&self, hook: &str) {
            self.log.lock().push(format!("{}:{hook}", self.name));
        }
    }

    #[async_trait]
    impl ChannelInterceptor for Recorder {
        async fn pre_send(
            &self,
            message: Message,
            _channel: &ChannelRef,
        ) -> MessagingResult<Option<Message>> {
            self.record("pre_send");
            Ok((!self.drop_messages).then_some(message))
        }

        async fn post_send(
            &self,
            _message: &Message,
            _channel: &ChannelRef,
            success: bool,
        ) -> MessagingResult<()> {
            self.record(&format!("post_send({success})"));
            Ok(())
        }

        async fn after_send_completion(
            &self,
            _message: &Message,
            _channel: &ChannelRef,
            _error: Option<&MessagingError>,
        ) {
            self.record("after_send_completion");
        }

        async fn pre_receive(&self, _channel: &ChannelRef) -> MessagingResult<bool> {
            self.record("pre_receive");
            Ok(!self.skip_receive)
        }

        async fn post_receive(
            &self,
            message: Option<Message>,
            _channel: &ChannelRef,
        ) -> MessagingResult<Option<Message>> {
            self.record("post_receive");
            Ok(message)
        }

        async fn after_receive_completion(
            &self,
            _message: Option<&Message>,
            _channel: &ChannelRef,
            _error: Option<&MessagingError>,
        ) {
            self.record("after_receive_completion");
        }
    }

    fn message() -> Message {
        MessageBuilder::with_payload("payload").build().unwrap()
    }

    #[tokio::test]
    async fn test_hooks_nest_by_importance() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = DirectChannel::create("orders");
        direct.subscribe(CallbackHandler::new(|_| Ok(()))).unwrap();
        let interceptors = order_by_importance(vec![
            (1, Recorder::new("low", &log) as Arc<dyn ChannelInterceptor>),
            (2, Recorder::new("high", &log) as Arc<dyn ChannelInterceptor>),
        ]);
        let channel = InterceptedSubscribableChannel::create(direct, interceptors);

        channel.send(message()).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "high:pre_send",
                "low:pre_send",
                "low:post_send(true)",
                "high:post_send(true)",
                "low:after_send_completion",
                "high:after_send_completion",
            ]
        );
    }

    #[tokio::test]
    async fn test_pre_send_none_drops_message() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let direct = DirectChannel::create("orders");
        direct
            .subscribe(CallbackHandler::new(move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        let dropping = Arc::new(Recorder {
            name: "drop",
            log: Arc::clone(&log),
            drop_messages: true,
            skip_receive: false,
        });
        let channel = InterceptedSubscribableChannel::create(
            direct,
            vec![dropping as Arc<dyn ChannelInterceptor>],
        );

        channel.send(message()).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(*log.lock(), vec!["drop:pre_send"]);
    }

    #[tokio::test]
    async fn test_post_send_reports_failure_and_error_propagates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = DirectChannel::create("orders");
        direct
            .subscribe(CallbackHandler::new(|_| Err(MessagingError::handler("boom"))))
            .unwrap();
        let only: Arc<dyn ChannelInterceptor> = Recorder::new("only", &log);
        let channel = InterceptedSubscribableChannel::create(direct, vec![only]);

        let result = channel.send(message()).await;

        assert!(matches!(result, Err(MessagingError::Handler(_))));
        assert!(log.lock().contains(&"only:post_send(false)".to_string()));
    }

    #[tokio::test]
    async fn test_pollable_receive_runs_receive_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = QueueChannel::create("queue");
        let recorder: Arc<dyn ChannelInterceptor> = Recorder::new("r", &log);
        let channel = InterceptedPollableChannel::create(queue, vec![recorder]);

        channel.send(message()).await.unwrap();
        let received = channel.receive().await.unwrap();

        assert_eq!(received.unwrap().payload(), &json!("payload"));
        assert_eq!(
            *log.lock(),
            vec![
                "r:pre_send",
                "r:post_send(true)",
                "r:after_send_completion",
                "r:pre_receive",
                "r:post_receive",
                "r:after_receive_completion",
            ]
        );
    }

    #[tokio::test]
    async fn test_skipped_receive_completes_outer_interceptors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = QueueChannel::create("queue");
        queue.send(message()).await.unwrap();
        let skipping = Arc::new(Recorder {
            name: "inner",
            log: Arc::clone(&log),
            drop_messages: false,
            skip_receive: true,
        });
        let channel = InterceptedPollableChannel::create(
            Arc::clone(&queue) as Arc<dyn PollableChannel>,
            vec![
                Recorder::new("outer", &log) as Arc<dyn ChannelInterceptor>,
                skipping as Arc<dyn ChannelInterceptor>,
                Recorder::new("unreached", &log) as Arc<dyn ChannelInterceptor>,
            ],
        );

        assert!(channel.receive().await.unwrap().is_none());
        assert_eq!(
            *log.lock(),
            vec![
                "outer:pre_receive",
                "inner:pre_receive",
                "outer:after_receive_completion",
            ]
        );
        assert!(queue.receive().await.unwrap().is_some());
    }

    #[test]
    fn test_builder_pattern_and_reference() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut references = InMemoryReferenceSearchService::new();
        references.register::<dyn ChannelInterceptor>(
            "recorder",
            Recorder::new("r", &log),
        );
        let builder = ChannelInterceptorBuilder::create("order*", "recorder").with_importance(5);

        assert!(builder.relates_to("orders"));
        assert!(!builder.relates_to("payments"));
        assert_eq!(builder.required_reference_names(), vec!["recorder".to_string()]);
        assert!(builder.build(&references).is_ok());
        assert!(matches!(
            ChannelInterceptorBuilder::create("*", "missing").build(&references),
            Err(MessagingError::ReferenceNotFound(_))
        ));
    }
}
