//! Boundaries with the host environment
//!
//! The updater does no I/O and owns no threads. It hands admitted requests
//! to an [`IoDispatcher`] and relies on an [`UpdaterScheduler`] to call
//! [`MetadataUpdater::run`] periodically or after a kick.

use crate::error::UpdaterResult;
use crate::request::RequestRef;
use crate::updater::MetadataUpdater;

use serde::{Deserialize, Serialize};
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

/// I/O priority level for scheduling
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    /// Front of the I/O layer's queue
    High = 2,
    Critical = 3,
}

/// The I/O layer that executes metadata page writes
pub trait IoDispatcher: Send + Sync {
    /// Execute `request`; must eventually call [`RequestRef::mark_finished`]
    /// exactly once, whatever the outcome of the write.
    ///
    /// Never called with the updater's queue lock held, so completing the
    /// request synchronously from here is allowed.
    fn dispatch(&self, request: RequestRef, priority: Priority);
}

/// The host primitive that drives [`MetadataUpdater::run`]
pub trait UpdaterScheduler: Send + Sync {
    /// Register the updater; called once from [`MetadataUpdater::init`]
    fn start(&self, updater: Weak<MetadataUpdater>) -> UpdaterResult<()>;

    /// Ask for `run` to be invoked soon. Must not block or run it inline.
    fn kick(&self);

    /// Deregister the updater
    fn stop(&self);

    /// Cooperative yield point inside `run`
    fn cond_resched(&self) {
        std::thread::yield_now();
    }
}

/// Scheduler for hosts that call `run` themselves
///
/// Records kicks so the host can poll for them.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    kicks: AtomicU64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kicks received since the last call
    pub fn take_kicks(&self) -> u64 {
        self.kicks.swap(0, Ordering::AcqRel)
    }
}

impl UpdaterScheduler for ManualScheduler {
    fn start(&self, _updater: Weak<MetadataUpdater>) -> UpdaterResult<()> {
        Ok(())
    }

    fn kick(&self) {
        self.kicks.fetch_add(1, Ordering::AcqRel);
    }

    fn stop(&self) {}

    fn cond_resched(&self) {}
}
