//! Consumer interceptors stopping a consumer once a limit is reached.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::interceptor::ConsumerInterceptor;
use crate::error::MessagingResult;

/// Stops after a number of successfully handled messages.
#[derive(Debug)]
pub struct LimitConsumedMessagesInterceptor {
    limit: usize,
    handled: AtomicUsize,
}

impl LimitConsumedMessagesInterceptor {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            handled: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConsumerInterceptor for LimitConsumedMessagesInterceptor {
    async fn on_startup(&self) -> MessagingResult<()> {
        self.handled.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn post_send(&self) -> MessagingResult<()> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn should_be_stopped(&self) -> bool {
        let handled = self.handled.load(Ordering::SeqCst);
        if handled >= self.limit {
            info!(handled, limit = self.limit, "Handled message limit reached");
            return true;
        }
        false
    }
}

/// Stops after a number of loop iterations, whether or not they handled anything.
#[derive(Debug)]
pub struct LimitExecutionAmountInterceptor {
    limit: usize,
    executed: AtomicUsize,
}

impl LimitExecutionAmountInterceptor {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            executed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConsumerInterceptor for LimitExecutionAmountInterceptor {
    async fn on_startup(&self) -> MessagingResult<()> {
        self.executed.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn post_run(&self) -> MessagingResult<()> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn should_be_stopped(&self) -> bool {
        self.executed.load(Ordering::SeqCst) >= self.limit
    }
}

/// Stops once the resident memory of the process exceeds a threshold.
pub struct LimitMemoryUsageInterceptor {
    limit_in_megabytes: u64,
    system: Mutex<System>,
    pid: Pid,
}

impl LimitMemoryUsageInterceptor {
    pub fn new(limit_in_megabytes: u64) -> Self {
        Self {
            limit_in_megabytes,
            system: Mutex::new(System::new()),
            pid: Pid::from(std::process::id() as usize),
        }
    }

    /// Current resident memory in megabytes, if it can be read.
    pub fn current_usage_in_megabytes(&self) -> Option<u64> {
        let mut system = self.system.lock();
        system.refresh_process(self.pid);
        system
            .process(self.pid)
            .map(|process| process.memory() / 1024 / 1024)
    }
}

#[async_trait]
impl ConsumerInterceptor for LimitMemoryUsageInterceptor {
    fn should_be_stopped(&self) -> bool {
        match self.current_usage_in_megabytes() {
            Some(used) if used > self.limit_in_megabytes => {
                warn!(
                    used_mb = used,
                    limit_mb = self.limit_in_megabytes,
                    "Memory limit exceeded"
                );
                true
            }
            _ => false,
        }
    }
}

/// Stops on Ctrl+C, or SIGTERM on Unix.
#[derive(Default)]
pub struct SignalInterceptor {
    received: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SignalInterceptor {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn wait_for_termination() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[async_trait]
impl ConsumerInterceptor for SignalInterceptor {
    async fn on_startup(&self) -> MessagingResult<()> {
        let received = Arc::clone(&self.received);
        let handle = tokio::spawn(async move {
            match wait_for_termination().await {
                Ok(()) => {
                    info!("Termination signal received, stopping consumer");
                    received.store(true, Ordering::SeqCst);
                }
                Err(e) => warn!(error = %e, "Cannot listen for termination signals"),
            }
        });
        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    fn should_be_stopped(&self) -> bool {
        self.received.load(Ordering::SeqCst)
    }
}

impl Drop for SignalInterceptor {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consumed_messages_limit() {
        let limit = LimitConsumedMessagesInterceptor::new(2);
        limit.on_startup().await.unwrap();
        limit.post_send().await.unwrap();
        assert!(!limit.should_be_stopped());
        limit.post_send().await.unwrap();
        assert!(limit.should_be_stopped());
    }

    #[tokio::test]
    async fn test_execution_amount_limit_counts_iterations() {
        let limit = LimitExecutionAmountInterceptor::new(1);
        assert!(!limit.should_be_stopped());
        limit.post_run().await.unwrap();
        assert!(limit.should_be_stopped());
    }

    #[test]
    fn test_memory_limit() {
        let generous = LimitMemoryUsageInterceptor::new(u64::MAX / (1024 * 1024));
        assert!(!generous.should_be_stopped());

        let tiny = LimitMemoryUsageInterceptor::new(0);
        if tiny.current_usage_in_megabytes().is_some_and(|used| used > 0) {
            assert!(tiny.should_be_stopped());
        }
    }

    #[tokio::test]
    async fn test_signal_interceptor_starts_clear() {
        let signal = SignalInterceptor::new();
        signal.on_startup().await.unwrap();
        assert!(!signal.should_be_stopped());
    }
}
