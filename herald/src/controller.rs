use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use herald_common::{Clock, Signal, SystemClock, internal, logging};
use herald_delivery::{
    DeliveryConfig, DeliveryError, DispatchOutcome, Dispatcher, Notification, PushProvider,
    RetryConfig, RetryManager, RetryWorker, TokenDelivery,
};
use herald_tokens::{LifecycleConfig, TokenLifecycleManager, TokenStore};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::sweep::Sweeper;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Configuration root, usually read from a RON file
///
/// ```ron
/// (
///     retry: (max_attempts: 5, jitter: Equal),
///     lifecycle: (max_age_in_days: 60),
///     delivery: (attempt_timeout_secs: 10),
/// )
/// ```
///
/// Every section and every field may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Herald {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Herald {
    /// Find the configuration file using the following precedence:
    /// 1. `HERALD_CONFIG` environment variable
    /// 2. ./herald.config.ron (current working directory)
    /// 3. /etc/herald/herald.config.ron (system-wide config)
    ///
    /// # Errors
    /// If `HERALD_CONFIG` names a missing file, or none of the default
    /// locations exist
    pub fn find_config_file() -> anyhow::Result<PathBuf> {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            if path.exists() {
                return Ok(path);
            }
            anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
        }

        let default_paths = [
            PathBuf::from("./herald.config.ron"),
            PathBuf::from("/etc/herald/herald.config.ron"),
        ];

        if let Some(path) = default_paths.iter().find(|path| path.exists()) {
            return Ok(path.clone());
        }

        let paths_tried = default_paths
            .iter()
            .map(|p| format!("  - {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n");

        anyhow::bail!(
            "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
        )
    }

    /// Read, parse and validate the configuration at `path`
    ///
    /// # Errors
    /// If the file cannot be read, is not valid RON, or holds invalid values
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }

    /// Parse and validate a RON document
    ///
    /// # Errors
    /// If `content` is not valid RON, or holds invalid values
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let herald: Self = ron::from_str(content)?;
        herald.validate()?;
        Ok(herald)
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    /// Describes the first offending value
    pub fn validate(&self) -> anyhow::Result<()> {
        self.retry.validate()?;
        self.lifecycle.validate()?;

        if self.delivery.attempt_timeout_secs == 0 {
            anyhow::bail!("delivery.attempt_timeout_secs must be at least 1");
        }

        Ok(())
    }

    /// Wire up the engine against `store` and `provider` and start the
    /// background tasks
    ///
    /// # Errors
    /// If the configuration is invalid
    pub fn start(
        self,
        store: Arc<dyn TokenStore>,
        provider: Arc<dyn PushProvider>,
    ) -> anyhow::Result<Running> {
        logging::init();
        self.start_with_clock(store, provider, Arc::new(SystemClock))
    }

    /// As [`Herald::start`], reading time from `clock`
    ///
    /// # Errors
    /// If the configuration is invalid
    pub fn start_with_clock(
        self,
        store: Arc<dyn TokenStore>,
        provider: Arc<dyn PushProvider>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Running> {
        self.validate()?;

        let lifecycle = Arc::new(TokenLifecycleManager::new(
            store,
            Arc::clone(&clock),
            self.lifecycle,
        ));
        let sender = Arc::new(TokenDelivery::new(
            Arc::clone(&lifecycle),
            provider,
            self.delivery,
        ));
        let retries = Arc::new(RetryManager::new(self.retry, sender, clock)?);

        let sweeper = Sweeper::start(Arc::clone(&lifecycle))?;
        let retry_worker = retries.start();

        internal!(level = INFO, "Herald running");

        Ok(Running {
            dispatcher: Dispatcher::new(retries),
            lifecycle,
            retry_worker,
            sweeper,
        })
    }
}

/// A started engine
///
/// Background tasks keep running until [`Running::shutdown`] is called.
#[derive(Debug)]
pub struct Running {
    dispatcher: Dispatcher,
    lifecycle: Arc<TokenLifecycleManager>,
    retry_worker: RetryWorker,
    sweeper: Sweeper,
}

impl Running {
    /// Deliver a new notification, queueing retries for anyone missed
    ///
    /// # Errors
    /// See [`Dispatcher::dispatch`]
    pub async fn dispatch(
        &self,
        notification: &Notification,
    ) -> Result<DispatchOutcome, DeliveryError> {
        self.dispatcher.dispatch(notification).await
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub const fn lifecycle(&self) -> &Arc<TokenLifecycleManager> {
        &self.lifecycle
    }

    #[must_use]
    pub fn retries(&self) -> &Arc<RetryManager> {
        self.dispatcher.retries()
    }

    /// Stop the background tasks, letting any pass in flight finish
    pub async fn shutdown(self) {
        internal!("Shutting down...");

        self.retry_worker.stop().await;
        self.sweeper.stop().await;

        internal!(
            level = INFO,
            "Herald stopped, {} retries left queued",
            self.dispatcher.retries().queue().len()
        );
    }

    /// Run until CTRL+C or SIGTERM, then shut down
    ///
    /// # Errors
    /// If the signal handlers cannot be installed
    pub async fn run_until_signal(self) -> anyhow::Result<()> {
        wait_for_signal().await?;
        self.shutdown().await;
        Ok(())
    }
}

async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r?;
                internal!("CTRL+C entered, shutting down");
            }
            _ = terminate.recv() => {
                internal!("Terminate Signal received, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        internal!("CTRL+C entered, shutting down");
    }

    Ok(())
}

/// Forward a shutdown broadcast from the host into [`Running::shutdown`]
///
/// For hosts that already own a shutdown channel.
pub async fn shutdown_on(running: Running, mut signals: broadcast::Receiver<Signal>) {
    match signals.recv().await {
        Ok(signal) => debug!("Received {signal:?}"),
        Err(e) => debug!("Shutdown channel closed: {e}"),
    }

    running.shutdown().await;
}
