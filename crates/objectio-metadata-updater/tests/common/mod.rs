#![allow(dead_code)]

use objectio_metadata_updater::{
    IoDispatcher, ManualScheduler, MetadataUpdater, PageRange, Priority, RequestGroup, RequestRef,
    UpdaterConfig, UpdaterScheduler,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Dispatcher that only records what it was handed
#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<(RequestRef, Priority)>>,
}

impl RecordingDispatcher {
    pub fn take(&self) -> Vec<(RequestRef, Priority)> {
        std::mem::take(&mut *self.dispatched.lock())
    }

    pub fn count(&self) -> usize {
        self.dispatched.lock().len()
    }
}

impl IoDispatcher for RecordingDispatcher {
    fn dispatch(&self, request: RequestRef, priority: Priority) {
        self.dispatched.lock().push((request, priority));
    }
}

pub fn manual_updater() -> (Arc<MetadataUpdater>, Arc<RecordingDispatcher>) {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let updater = MetadataUpdater::init(
        UpdaterConfig::default(),
        Arc::clone(&dispatcher) as Arc<dyn IoDispatcher>,
        Arc::new(ManualScheduler::new()) as Arc<dyn UpdaterScheduler>,
    )
    .unwrap();
    (updater, dispatcher)
}

pub fn single(offset: u64, count: u32) -> RequestRef {
    RequestGroup::new([PageRange::new(offset, count)])
        .request(0)
        .unwrap()
}
