//! Runtime orchestration of a configured messaging system.
//!
//! The runtime applies loaded configuration to a
//! [`MessagingSystemConfiguration`], builds the system and drives its
//! separately running consumers, each on its own tokio task, until shutdown.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use conduit_runtime::MessagingRuntime;
//!
//! let runtime = MessagingRuntime::builder()
//!     .config_file("config/conduit.toml")
//!     .profile("production")
//!     .build(configuration, references)
//!     .await?;
//!
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use conduit_core::{
    ConfiguredMessagingSystem, MessagingResult, MessagingSystemConfiguration,
    ReferenceSearchService,
};
use futures::future::join_all;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{ConduitConfig, ConfigLoader, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

type ConsumerTask = (String, JoinHandle<MessagingResult<()>>);

/// Drives a [`ConfiguredMessagingSystem`] built from loaded configuration.
pub struct MessagingRuntime {
    config: ConduitConfig,
    system: Arc<ConfiguredMessagingSystem>,
}

impl MessagingRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Builds the messaging system after applying `config`.
    ///
    /// Polling entries become registered polling metadata and the gateway
    /// reply timeout becomes the default for gateways without one. Logging
    /// is initialized from `config.logging` unless a subscriber is already
    /// installed.
    pub async fn from_config(
        config: ConduitConfig,
        mut configuration: MessagingSystemConfiguration,
        references: Arc<dyn ReferenceSearchService>,
    ) -> RuntimeResult<Self> {
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        for metadata in &config.polling {
            configuration.register_polling_metadata(metadata.clone())?;
        }
        if let Some(timeout_ms) = config.gateway.reply_timeout_ms {
            configuration.with_default_reply_timeout_ms(timeout_ms);
        }

        let system = configuration.build_messaging_system(references).await?;

        info!(
            log_level = %config.logging.level,
            polling_entries = config.polling.len(),
            consumers = ?system.list_of_separately_running_consumers(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config,
            system: Arc::new(system),
        })
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.config
    }

    pub fn system(&self) -> &ConfiguredMessagingSystem {
        &self.system
    }

    /// Consumers selected by `consumers.run`, or all of them when it is
    /// empty.
    pub fn consumers_to_run(&self) -> RuntimeResult<Vec<String>> {
        if self.config.consumers.run.is_empty() {
            return Ok(self.system.list_of_separately_running_consumers());
        }
        for name in &self.config.consumers.run {
            self.system.consumer(name)?;
        }
        Ok(self.config.consumers.run.clone())
    }

    /// Runs the selected consumers until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        let tasks = self.start()?;

        info!("Conduit runtime is now running. Press Ctrl+C to stop.");
        let signal = wait_for_shutdown().await;

        self.stop(tasks).await?;
        signal
    }

    /// Runs the selected consumers until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let tasks = self.start()?;
        shutdown.await;
        self.stop(tasks).await
    }

    fn start(&self) -> RuntimeResult<Vec<ConsumerTask>> {
        let names = self.consumers_to_run()?;
        if names.is_empty() {
            warn!("No separately running consumers to start");
        }

        let mut tasks = Vec::with_capacity(names.len());
        for name in names {
            let consumer = self.system.consumer(&name)?;
            let span = info_span!("consumer", consumer = %name);
            let handle = tokio::spawn(async move { consumer.run().await }.instrument(span));
            debug!(consumer = %name, "Consumer task spawned");
            tasks.push((name, handle));
        }

        info!(consumers = tasks.len(), "Runtime started");
        Ok(tasks)
    }

    /// Stops every consumer and waits for the tasks to finish.
    ///
    /// Consumer failures are logged; a task that panicked is reported as an
    /// error once all tasks have been joined.
    async fn stop(&self, tasks: Vec<ConsumerTask>) -> RuntimeResult<()> {
        info!("Stopping Conduit runtime");
        self.system.shutdown();

        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let mut failure = None;
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(())) => debug!(consumer = %name, "Consumer finished"),
                Ok(Err(e)) => error!(consumer = %name, error = %e, "Consumer failed"),
                Err(e) => {
                    error!(consumer = %name, error = %e, "Consumer task aborted");
                    failure.get_or_insert_with(|| RuntimeError::consumer_task(name, e.to_string()));
                }
            }
        }

        info!("Runtime stopped");
        failure.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for MessagingRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingRuntime")
            .field("system", &self.system)
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Loads configuration and builds a [`MessagingRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir().with_user_config_dir(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: ConduitConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub async fn build(
        self,
        configuration: MessagingSystemConfiguration,
        references: Arc<dyn ReferenceSearchService>,
    ) -> RuntimeResult<MessagingRuntime> {
        let config = self.config_loader.load()?;
        MessagingRuntime::from_config(config, configuration, references).await
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
