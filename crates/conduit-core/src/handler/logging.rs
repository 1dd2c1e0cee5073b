use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Level, debug, error, info, trace, warn};

use super::{BuildContext, EndpointSettings, MessageHandlerBuilder, MessageProcessor};
use crate::error::MessagingResult;
use crate::introspection::{InterfaceParameter, InterfaceToCall, MethodSignatureResolver, ReturnType};
use crate::message::Message;

/// Endpoint logging every message it sees and passing it through unchanged.
#[derive(Clone)]
pub struct LoggingHandlerBuilder {
    settings: EndpointSettings,
    level: Level,
    include_headers: bool,
}

impl LoggingHandlerBuilder {
    pub fn create(level: Level) -> Self {
        Self {
            settings: EndpointSettings::default(),
            level,
            include_headers: false,
        }
    }

    pub fn with_headers(mut self, include_headers: bool) -> Self {
        self.include_headers = include_headers;
        self
    }
}

impl MessageHandlerBuilder for LoggingHandlerBuilder {
    fn settings(&self) -> &EndpointSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut EndpointSettings {
        &mut self.settings
    }

    fn intercepted_interface(
        &self,
        _signatures: &dyn MethodSignatureResolver,
    ) -> MessagingResult<InterfaceToCall> {
        Ok(InterfaceToCall::create("conduit::Logger", "log")
            .with_parameter(InterfaceParameter::value("payload"))
            .with_return_type(ReturnType::Message))
    }

    fn build_processor(&self, _context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        Ok(Arc::new(LoggingProcessor {
            endpoint: self.endpoint_id().unwrap_or("logger").to_string(),
            level: self.level,
            include_headers: self.include_headers,
        }))
    }
}

struct LoggingProcessor {
    endpoint: String,
    level: Level,
    include_headers: bool,
}

macro_rules! log_message {
    ($macro:ident, $endpoint:expr, $message:expr, $headers:expr) => {
        $macro!(
            endpoint = %$endpoint,
            message_id = %$message.id(),
            payload = %$message.payload(),
            headers = ?$headers,
            "Message received"
        )
    };
}

#[async_trait]
impl MessageProcessor for LoggingProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        let headers = self
            .include_headers
            .then(|| message.headers().to_value_map());
        match self.level {
            Level::ERROR => log_message!(error, self.endpoint, message, headers),
            Level::WARN => log_message!(warn, self.endpoint, message, headers),
            Level::INFO => log_message!(info, self.endpoint, message, headers),
            Level::DEBUG => log_message!(debug, self.endpoint, message, headers),
            _ => log_message!(trace, self.endpoint, message, headers),
        }
        Ok(Some(message))
    }
}
