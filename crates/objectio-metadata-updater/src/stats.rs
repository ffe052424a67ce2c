//! Metadata updater statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters, updated without taking the queue lock
#[derive(Debug, Default)]
pub struct UpdaterStats {
    submitted: AtomicU64,
    admitted_immediately: AtomicU64,
    deferred: AtomicU64,
    promoted: AtomicU64,
    reclaimed_requests: AtomicU64,
    released_groups: AtomicU64,
    runs: AtomicU64,
}

impl UpdaterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.admitted_immediately.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deferred(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_promoted(&self) {
        self.promoted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reclaimed(&self, requests: u64, groups: u64) {
        self.reclaimed_requests.fetch_add(requests, Ordering::Relaxed);
        self.released_groups.fetch_add(groups, Ordering::Relaxed);
    }

    pub(crate) fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> UpdaterStatsSnapshot {
        UpdaterStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            admitted_immediately: self.admitted_immediately.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            promoted: self.promoted.load(Ordering::Relaxed),
            reclaimed_requests: self.reclaimed_requests.load(Ordering::Relaxed),
            released_groups: self.released_groups.load(Ordering::Relaxed),
            runs: self.runs.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdaterStatsSnapshot {
    /// Requests passed to `submit`
    pub submitted: u64,
    /// Requests admitted at submission time
    pub admitted_immediately: u64,
    /// Requests parked behind an overlapping write
    pub deferred: u64,
    /// Pending requests later moved to the admitted queue
    pub promoted: u64,
    /// Finished requests unlinked from the admitted queue
    pub reclaimed_requests: u64,
    /// Groups whose storage was released
    pub released_groups: u64,
    /// Invocations of `run`
    pub runs: u64,
}

impl UpdaterStatsSnapshot {
    /// Deferred requests not yet promoted
    pub fn waiting(&self) -> u64 {
        self.deferred.saturating_sub(self.promoted)
    }
}
