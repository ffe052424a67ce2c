//! Background worker that drives the metadata updater
//!
//! Runs a promotion pass every `run_interval`, or sooner when kicked. The
//! pass itself is synchronous and yields the OS thread between promotions,
//! so it executes on the blocking pool rather than an async worker.

use crate::config::UpdaterConfig;
use crate::context::UpdaterScheduler;
use crate::error::{UpdaterError, UpdaterResult};
use crate::updater::MetadataUpdater;

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, trace, warn};

/// Tokio-based [`UpdaterScheduler`]
pub struct UpdaterWorker {
    handle: Handle,
    interval: Duration,
    notify: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UpdaterWorker {
    /// Create a worker that will spawn onto `handle`
    pub fn new(handle: Handle, interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            handle,
            interval,
            notify: Arc::new(Notify::new()),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Create a worker on the runtime of the calling context
    pub fn current(interval: Duration) -> UpdaterResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| UpdaterError::Scheduler(format!("no tokio runtime: {}", e)))?;
        Ok(Self::new(handle, interval))
    }

    /// Create a worker on the current runtime ticking at the configured interval
    pub fn for_config(config: &UpdaterConfig) -> UpdaterResult<Self> {
        Self::current(config.run_interval())
    }

    /// Whether the worker task has been spawned and not yet exited
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Wait for the worker task to exit after `stop`
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("Metadata updater worker exited abnormally: {}", e);
        }
    }
}

impl UpdaterScheduler for UpdaterWorker {
    fn start(&self, updater: Weak<MetadataUpdater>) -> UpdaterResult<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(UpdaterError::Scheduler(
                "worker already serves a metadata updater".to_string(),
            ));
        }
        if *self.shutdown_tx.borrow() {
            return Err(UpdaterError::Scheduler("worker was stopped".to_string()));
        }

        *task = Some(self.handle.spawn(worker_loop(
            updater,
            self.interval,
            Arc::clone(&self.notify),
            self.shutdown_tx.subscribe(),
        )));
        Ok(())
    }

    fn kick(&self) {
        self.notify.notify_one();
    }

    fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Drop for UpdaterWorker {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn worker_loop(
    updater: Weak<MetadataUpdater>,
    interval: Duration,
    notify: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Metadata updater worker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = notify.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let Some(live) = updater.upgrade() else {
            warn!("Metadata updater dropped without stopping its worker");
            break;
        };

        match tokio::task::spawn_blocking(move || live.run_if_live()).await {
            Ok(Some(outcome)) if outcome.promoted > 0 => {
                trace!(
                    "Promoted {} metadata writes, {} still pending",
                    outcome.promoted, outcome.still_pending
                );
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                warn!("Metadata updater run failed: {}", e);
                break;
            }
        }
    }

    info!("Metadata updater worker stopped");
}
