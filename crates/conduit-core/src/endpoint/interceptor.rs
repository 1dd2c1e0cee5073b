use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info};

use super::{ConsumerLifecycle, ConsumerState};
use crate::error::{MessagingError, MessagingResult};

/// Hooks around the loop of a separately running consumer.
#[async_trait]
pub trait ConsumerInterceptor: Send + Sync {
    /// Called once, before the first iteration.
    async fn on_startup(&self) -> MessagingResult<()> {
        Ok(())
    }

    /// Called before every iteration.
    async fn pre_run(&self) -> MessagingResult<()> {
        Ok(())
    }

    /// Called after every iteration.
    async fn post_run(&self) -> MessagingResult<()> {
        Ok(())
    }

    /// Called for every message handled successfully.
    async fn post_send(&self) -> MessagingResult<()> {
        Ok(())
    }

    /// Checked before every iteration; `true` ends the loop.
    fn should_be_stopped(&self) -> bool {
        false
    }
}

/// One iteration of a consumer loop.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs one iteration, reporting every successfully handled message to
    /// `iteration`. Waits must end early once its cancellation fires.
    async fn execute(&self, iteration: &Iteration<'_>) -> MessagingResult<()>;
}

/// The view a [`TaskExecutor`] has of the consumer running it.
pub struct Iteration<'a> {
    cancellation: &'a CancellationToken,
    interceptors: &'a [Arc<dyn ConsumerInterceptor>],
}

impl<'a> Iteration<'a> {
    pub fn new(
        cancellation: &'a CancellationToken,
        interceptors: &'a [Arc<dyn ConsumerInterceptor>],
    ) -> Self {
        Self {
            cancellation,
            interceptors,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.cancellation
    }

    /// Runs `post_send` of every consumer interceptor for one handled message.
    pub async fn message_handled(&self) -> MessagingResult<()> {
        for interceptor in self.interceptors {
            interceptor.post_send().await?;
        }
        Ok(())
    }

    /// Whether the consumer was stopped or an interceptor asks to stop.
    /// Executors handling several messages per iteration check it between
    /// messages.
    pub fn should_stop(&self) -> bool {
        self.cancellation.is_cancelled()
            || self.interceptors.iter().any(|i| i.should_be_stopped())
    }
}

/// A consumer repeatedly running a [`TaskExecutor`] under consumer interceptors.
pub struct InterceptedConsumer {
    name: String,
    task: Arc<dyn TaskExecutor>,
    interceptors: Vec<Arc<dyn ConsumerInterceptor>>,
    initial_delay: Duration,
    state: Mutex<ConsumerState>,
    cancellation: CancellationToken,
}

impl InterceptedConsumer {
    pub fn new(
        name: impl Into<String>,
        task: Arc<dyn TaskExecutor>,
        interceptors: Vec<Arc<dyn ConsumerInterceptor>>,
    ) -> Self {
        Self {
            name: name.into(),
            task,
            interceptors,
            initial_delay: Duration::ZERO,
            state: Mutex::new(ConsumerState::Created),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    async fn run_loop(&self) -> MessagingResult<()> {
        info!("Consumer started");
        for interceptor in &self.interceptors {
            interceptor.on_startup().await?;
        }
        if !self.initial_delay.is_zero() {
            tokio::select! {
                _ = self.cancellation.cancelled() => {}
                _ = tokio::time::sleep(self.initial_delay) => {}
            }
        }

        let iteration = Iteration::new(&self.cancellation, &self.interceptors);
        let mut iterations: u64 = 0;
        while !iteration.should_stop() {
            for interceptor in &self.interceptors {
                interceptor.pre_run().await?;
            }
            self.task.execute(&iteration).await?;
            for interceptor in &self.interceptors {
                interceptor.post_run().await?;
            }
            iterations += 1;
        }
        info!(iterations, "Consumer stopped");
        Ok(())
    }
}

#[async_trait]
impl ConsumerLifecycle for InterceptedConsumer {
    fn consumer_name(&self) -> &str {
        &self.name
    }

    fn is_running_in_separate_thread(&self) -> bool {
        true
    }

    async fn run(&self) -> MessagingResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ConsumerState::Running => {
                    return Err(MessagingError::invalid_argument(format!(
                        "consumer '{}' is already running",
                        self.name
                    )));
                }
                ConsumerState::Stopped => {
                    debug!(consumer = %self.name, "Consumer already stopped, not running it");
                    return Ok(());
                }
                ConsumerState::Created => *state = ConsumerState::Running,
            }
        }

        let span = debug_span!("consumer", consumer = %self.name);
        let result = self.run_loop().instrument(span).await;
        *self.state.lock() = ConsumerState::Stopped;
        self.cancellation.cancel();
        result
    }

    fn stop(&self) {
        *self.state.lock() = ConsumerState::Stopped;
        self.cancellation.cancel();
    }

    fn state(&self) -> ConsumerState {
        *self.state.lock()
    }
}
