//! Periodic token maintenance
//!
//! Every `cleanup_interval_secs` the sweeper retires stale, malformed and
//! duplicated tokens, then rescores whatever is left.

use std::sync::Arc;

use herald_common::{Signal, internal};
use herald_tokens::{CleanupReport, HealthRefreshReport, TokenError, TokenLifecycleManager};
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info, warn};

/// Handle to the running token sweep
#[derive(Debug)]
pub struct Sweeper {
    shutdown: broadcast::Sender<Signal>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep loop for `lifecycle` on the current runtime
    ///
    /// # Errors
    /// If the lifecycle configuration is out of bounds
    pub fn start(lifecycle: Arc<TokenLifecycleManager>) -> Result<Self, TokenError> {
        lifecycle.config().validate()?;

        let (shutdown, receiver) = broadcast::channel(1);
        let handle = tokio::spawn(serve(lifecycle, receiver));

        Ok(Self { shutdown, handle })
    }

    /// Stop the sweep and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(Signal::Shutdown);

        if let Err(e) = self.handle.await {
            error!("Token sweeper terminated abnormally: {e}");
        }
    }
}

/// One full maintenance pass
pub async fn sweep(lifecycle: &TokenLifecycleManager) -> (CleanupReport, HealthRefreshReport) {
    let cleanup = lifecycle
        .cleanup_invalid_tokens(lifecycle.config().max_age_in_days)
        .await;
    for e in &cleanup.errors {
        warn!(error = %e, "Token cleanup error");
    }

    let health = lifecycle.refresh_token_health().await;
    for e in &health.errors {
        warn!(error = %e, "Token health refresh error");
    }

    info!(
        deactivated = cleanup.total_deactivated() + health.deactivated,
        deleted = cleanup.deleted_tokens,
        checked = health.total_checked,
        healthy = health.healthy,
        unhealthy = health.unhealthy,
        "Token sweep complete"
    );

    (cleanup, health)
}

async fn serve(lifecycle: Arc<TokenLifecycleManager>, mut shutdown: broadcast::Receiver<Signal>) {
    internal!("Token sweeper starting");

    let period = std::time::Duration::from_secs(lifecycle.config().cleanup_interval_secs);
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                sweep(&lifecycle).await;
            }
            sig = shutdown.recv() => {
                if let Err(e) = sig {
                    error!("Token sweeper shutdown channel error: {e}");
                }
                break;
            }
        }
    }

    internal!("Token sweeper shutdown complete");
}
