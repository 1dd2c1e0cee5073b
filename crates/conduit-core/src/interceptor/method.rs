use std::sync::Arc;

use async_trait::async_trait;

use super::pointcut::{EndpointDescriptor, Pointcut};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::{BuildContext, EndpointSettings, MessageHandlerBuilder, MessageProcessor};
use crate::introspection::{InterfaceToCall, MethodSignatureResolver};
use crate::message::Message;

/// A before or after interceptor: a handler spliced into the flow of every
/// endpoint it applies to.
///
/// When the handler produces no reply the original message continues
/// unchanged, so purely observing handlers can be used as interceptors.
#[derive(Clone)]
pub struct MethodInterceptor {
    name: String,
    precedence: i32,
    pointcut: Pointcut,
    handler: Arc<dyn MessageHandlerBuilder>,
}

impl MethodInterceptor {
    /// Fails if `handler` declares an endpoint id or channels of its own;
    /// those come from the endpoint it intercepts.
    pub fn create(
        name: impl Into<String>,
        handler: impl MessageHandlerBuilder + 'static,
        precedence: i32,
        pointcut: Pointcut,
    ) -> MessagingResult<Self> {
        let name = name.into();
        let settings = handler.settings();
        if settings.endpoint_id.is_some()
            || settings.input_channel_name.is_some()
            || settings.output_channel_name.is_some()
        {
            return Err(MessagingError::configuration(format!(
                "interceptor '{name}' must not declare an endpoint id, input or output channel"
            )));
        }
        Ok(Self {
            name,
            precedence,
            pointcut,
            handler: Arc::new(handler),
        })
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
        self.handler.required_reference_names()
    }

    /// The interceptor as a chain stage.
    pub fn stage(&self) -> Arc<dyn MessageHandlerBuilder> {
        Arc::new(InterceptorStage {
            settings: EndpointSettings::default(),
            handler: Arc::clone(&self.handler),
        })
    }

    /// Builds the interceptor as a standalone processor.
    pub fn build_processor(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        self.stage().build_processor(context)
    }
}

impl std::fmt::Debug for MethodInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodInterceptor")
            .field("name", &self.name)
            .field("precedence", &self.precedence)
            .field("pointcut", &self.pointcut)
            .finish()
    }
}

struct InterceptorStage {
    settings: EndpointSettings,
    handler: Arc<dyn MessageHandlerBuilder>,
}

impl MessageHandlerBuilder for InterceptorStage {
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
        self.handler.intercepted_interface(signatures)
    }

    fn required_reference_names(&self) -> Vec<String> {
        self.handler.required_reference_names()
    }

    fn build_processor(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        Ok(Arc::new(PassThroughProcessor {
            inner: self.handler.build_intercepted_processor(context)?,
        }))
    }
}

struct PassThroughProcessor {
    inner: Arc<dyn MessageProcessor>,
}

#[async_trait]
impl MessageProcessor for PassThroughProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        match self.inner.process(message.clone()).await? {
            Some(reply) => Ok(Some(reply)),
            None => Ok(Some(message)),
        }
    }
}
