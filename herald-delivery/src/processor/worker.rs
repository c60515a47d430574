use std::sync::Arc;

use herald_common::{Signal, internal};
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info};

use super::RetryManager;
use crate::RetryError;

/// Handle to a running retry worker
///
/// Dropping the handle leaves the worker running; call [`RetryWorker::stop`]
/// to shut it down.
#[derive(Debug)]
pub struct RetryWorker {
    shutdown: broadcast::Sender<Signal>,
    handle: JoinHandle<()>,
}

impl RetryWorker {
    /// Stop the worker and wait for it to exit
    ///
    /// A pass that is already running completes first. Once this returns,
    /// the worker will not touch the queue again.
    pub async fn stop(self) {
        // Nothing listening means the worker already exited
        let _ = self.shutdown.send(Signal::Shutdown);

        if let Err(e) = self.handle.await {
            error!("Retry worker terminated abnormally: {e}");
        }
    }
}

impl RetryManager {
    /// Process the retry queue every `process_interval_secs` until a shutdown
    /// signal arrives
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!("Retry worker starting");

        let mut timer = tokio::time::interval(self.config.process_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick to avoid immediate execution
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.process_retry_queue().await {
                        Ok(report) if report.processed > 0 => {
                            info!(
                                processed = report.processed,
                                successful = report.successful,
                                failed = report.failed,
                                skipped = report.skipped,
                                rescheduled = report.rescheduled,
                                "Processed retry queue"
                            );
                        }
                        Ok(_) => debug!("Processed retry queue, nothing due"),
                        Err(RetryError::AlreadyProcessing) => {
                            debug!("Retry pass still running, skipping tick");
                        }
                        Err(e) => error!("Error processing retry queue: {e}"),
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Retry worker received shutdown signal");
                        }
                        Err(e) => error!("Retry worker shutdown channel error: {e}"),
                    }
                    break;
                }
            }
        }

        internal!(
            "Retry worker shutdown complete, {} retries left queued",
            self.queue.len()
        );
    }

    /// Spawn [`RetryManager::serve`] on the current runtime
    #[must_use = "dropping the worker handle makes it impossible to stop the worker"]
    pub fn start(self: &Arc<Self>) -> RetryWorker {
        let (shutdown, receiver) = broadcast::channel(1);
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.serve(receiver).await });

        RetryWorker { shutdown, handle }
    }
}
