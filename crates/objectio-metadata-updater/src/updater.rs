//! Metadata updater: the per-cache entry point
//!
//! Producers call [`MetadataUpdater::submit`] (or
//! [`MetadataUpdater::submit_group`]) for every write; the scheduler calls
//! [`MetadataUpdater::run`] to promote deferred writes once the writes they
//! overlapped have finished.

use crate::config::UpdaterConfig;
use crate::context::{IoDispatcher, UpdaterScheduler};
use crate::error::UpdaterResult;
use crate::request::{RequestGroup, RequestRef};
use crate::stats::UpdaterStatsSnapshot;
use crate::syncher::{Admission, QueueSnapshot, RunOutcome, Syncher};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Result of submitting a whole group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupSubmission {
    /// Members dispatched straight away
    pub admitted: usize,
    /// Members parked until `run` promotes them
    pub deferred: usize,
}

/// Serializes overlapping metadata writes for one cache
pub struct MetadataUpdater {
    config: UpdaterConfig,
    syncher: Syncher,
    dispatcher: Arc<dyn IoDispatcher>,
    scheduler: Arc<dyn UpdaterScheduler>,
    stopped: AtomicBool,
}

impl MetadataUpdater {
    /// Create the updater and register it with `scheduler`
    pub fn init(
        config: UpdaterConfig,
        dispatcher: Arc<dyn IoDispatcher>,
        scheduler: Arc<dyn UpdaterScheduler>,
    ) -> UpdaterResult<Arc<Self>> {
        config.validate()?;

        let updater = Arc::new(Self {
            config,
            syncher: Syncher::new(),
            dispatcher,
            scheduler,
            stopped: AtomicBool::new(false),
        });

        if let Err(e) = updater.scheduler.start(Arc::downgrade(&updater)) {
            // Never registered, so dropping must not deregister anything.
            updater.stopped.store(true, Ordering::Release);
            return Err(e);
        }
        info!(
            "Metadata updater initialized (run interval {:?})",
            updater.config.run_interval()
        );
        Ok(updater)
    }

    /// Configuration in effect
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Classify one request
    ///
    /// On [`Admission::Admitted`] the caller dispatches the request itself.
    /// A deferred request is dispatched later by `run`; the caller should
    /// [`kick`](Self::kick) so that happens promptly.
    pub fn submit(&self, request: RequestRef) -> Admission {
        debug_assert!(!self.is_stopped(), "submit on a stopped metadata updater");
        self.syncher.classify(request)
    }

    /// Submit every member of `group` in index order
    ///
    /// Admitted members are dispatched at the configured admission priority.
    /// The scheduler is kicked once if anything was deferred.
    pub fn submit_group(&self, group: &Arc<RequestGroup>) -> GroupSubmission {
        let mut summary = GroupSubmission::default();

        for request in group.requests() {
            match self.submit(request.clone()) {
                Admission::Admitted => {
                    summary.admitted += 1;
                    self.dispatcher
                        .dispatch(request, self.config.admission_priority);
                }
                Admission::Deferred => summary.deferred += 1,
            }
        }

        if summary.deferred > 0 {
            debug!(
                "Group {}: {} of {} metadata writes deferred",
                group.id(),
                summary.deferred,
                group.len()
            );
            self.kick();
        }
        summary
    }

    /// One promotion pass
    ///
    /// Pending requests are re-examined oldest first; those no longer
    /// overlapping an in-flight write are dispatched at the promotion
    /// priority. With nothing pending this only reclaims finished writes.
    pub fn run(&self) -> RunOutcome {
        debug_assert!(!self.is_stopped(), "run on a stopped metadata updater");
        self.run_pass()
    }

    /// `run` for schedulers that may race with `stop`
    pub(crate) fn run_if_live(&self) -> Option<RunOutcome> {
        (!self.is_stopped()).then(|| self.run_pass())
    }

    fn run_pass(&self) -> RunOutcome {
        let priority = self.config.promotion_priority;
        self.syncher.promote(
            |request| self.dispatcher.dispatch(request, priority),
            || self.yield_point(),
        )
    }

    fn yield_point(&self) {
        if self.config.yield_between_promotions {
            self.scheduler.cond_resched();
        }
    }

    /// Hint the scheduler that `run` has work; never runs it inline
    pub fn kick(&self) {
        self.scheduler.kick();
    }

    /// Mark `request` finished and kick the scheduler
    ///
    /// For I/O layers that have the updater at hand on completion.
    pub fn complete(&self, request: &RequestRef) {
        request.mark_finished();
        self.kick();
    }

    /// Deregister from the scheduler
    ///
    /// The caller guarantees no `submit` or `run` is issued afterwards.
    /// Stopping twice is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.stop();

        let snapshot = self.syncher.snapshot();
        info!(
            "Metadata updater stopped ({} admitted, {} pending)",
            snapshot.admitted.len(),
            snapshot.pending.len()
        );
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Requests in the admitted queue, including finished ones not yet reclaimed
    pub fn admitted_len(&self) -> usize {
        self.syncher.admitted_len()
    }

    /// Requests waiting for promotion
    pub fn pending_len(&self) -> usize {
        self.syncher.pending_len()
    }

    /// Queue contents at this instant
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.syncher.snapshot()
    }

    /// Counter values at this instant
    pub fn stats(&self) -> UpdaterStatsSnapshot {
        self.syncher.stats().snapshot()
    }
}

impl Drop for MetadataUpdater {
    fn drop(&mut self) {
        self.stop();
    }
}
