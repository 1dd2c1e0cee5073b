use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::interceptor::ConsumerInterceptor;
use super::limits::{
    LimitConsumedMessagesInterceptor, LimitExecutionAmountInterceptor,
    LimitMemoryUsageInterceptor, SignalInterceptor,
};
use crate::error::{MessagingError, MessagingResult};

/// Default wait for a message on every poll.
pub const DEFAULT_FIXED_RATE_MS: u64 = 1000;

/// How a separately running consumer polls and when it stops.
///
/// Limits set to zero are disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingMetadata {
    pub endpoint_id: String,
    /// Wait before the first poll.
    pub initial_delay_in_milliseconds: u64,
    /// How long each poll waits for a message.
    pub fixed_rate_in_milliseconds: u64,
    /// Receives failed messages lacking an error-channel header.
    pub error_channel_name: Option<String>,
    pub max_message_per_poll: usize,
    /// Stop after this many handled messages.
    pub handled_message_limit: usize,
    /// Stop once the process uses more memory.
    pub memory_limit_in_megabytes: i64,
    /// Stop after this many loop iterations.
    pub execution_amount_limit: usize,
    /// Stop on SIGINT or SIGTERM.
    pub with_signal_interceptors: bool,
}

impl Default for PollingMetadata {
    fn default() -> Self {
        Self {
            endpoint_id: String::new(),
            initial_delay_in_milliseconds: 0,
            fixed_rate_in_milliseconds: DEFAULT_FIXED_RATE_MS,
            error_channel_name: None,
            max_message_per_poll: 1,
            handled_message_limit: 0,
            memory_limit_in_megabytes: 0,
            execution_amount_limit: 0,
            with_signal_interceptors: false,
        }
    }
}

impl PollingMetadata {
    pub fn create(endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            ..Self::default()
        }
    }

    pub fn with_initial_delay_in_milliseconds(mut self, delay: u64) -> Self {
        self.initial_delay_in_milliseconds = delay;
        self
    }

    pub fn with_fixed_rate_in_milliseconds(mut self, rate: u64) -> Self {
        self.fixed_rate_in_milliseconds = rate;
        self
    }

    pub fn with_error_channel_name(mut self, channel: impl Into<String>) -> Self {
        self.error_channel_name = Some(channel.into());
        self
    }

    pub fn with_max_message_per_poll(mut self, max: usize) -> Self {
        self.max_message_per_poll = max;
        self
    }

    pub fn with_handled_message_limit(mut self, limit: usize) -> Self {
        self.handled_message_limit = limit;
        self
    }

    pub fn with_memory_limit_in_megabytes(mut self, limit: i64) -> Self {
        self.memory_limit_in_megabytes = limit;
        self
    }

    pub fn with_execution_amount_limit(mut self, limit: usize) -> Self {
        self.execution_amount_limit = limit;
        self
    }

    pub fn with_signal_interceptors(mut self, enabled: bool) -> Self {
        self.with_signal_interceptors = enabled;
        self
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_in_milliseconds)
    }

    pub fn fixed_rate(&self) -> Duration {
        Duration::from_millis(self.fixed_rate_in_milliseconds)
    }

    /// Checks the values consumers rely on.
    pub fn validate(&self) -> MessagingResult<()> {
        if self.endpoint_id.trim().is_empty() {
            return Err(MessagingError::configuration(
                "polling metadata needs an endpoint id",
            ));
        }
        if self.memory_limit_in_megabytes < 0 {
            return Err(MessagingError::configuration(format!(
                "memory limit of '{}' must not be negative, got {}",
                self.endpoint_id, self.memory_limit_in_megabytes
            )));
        }
        Ok(())
    }

    /// The stopping interceptors this metadata asks for.
    pub fn consumer_interceptors(&self) -> MessagingResult<Vec<Arc<dyn ConsumerInterceptor>>> {
        self.validate()?;
        let mut interceptors: Vec<Arc<dyn ConsumerInterceptor>> = Vec::new();
        if self.handled_message_limit > 0 {
            interceptors.push(Arc::new(LimitConsumedMessagesInterceptor::new(
                self.handled_message_limit,
            )));
        }
        if self.memory_limit_in_megabytes > 0 {
            interceptors.push(Arc::new(LimitMemoryUsageInterceptor::new(
                self.memory_limit_in_megabytes as u64,
            )));
        }
        if self.execution_amount_limit > 0 {
            interceptors.push(Arc::new(LimitExecutionAmountInterceptor::new(
                self.execution_amount_limit,
            )));
        }
        if self.with_signal_interceptors {
            interceptors.push(Arc::new(SignalInterceptor::new()));
        }
        Ok(interceptors)
    }
}
