//! ObjectIO Metadata Updater
//!
//! Serializes background metadata page writes of the block cache. Writes
//! whose page ranges overlap an in-flight write are parked and promoted once
//! that write finishes; everything else runs concurrently.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ submit  ┌─────────────────────────┐ dispatch ┌──────────┐
//! │   Producer   │────────▶│   MetadataUpdater       │─────────▶│ I/O layer│
//! │ RequestGroup │         │  Syncher                │          └────┬─────┘
//! └──────────────┘         │  ├─ admitted (in flight)│               │
//!                          │  └─ pending  (blocked)  │◀── finished ──┘
//!                          └────────────▲────────────┘
//!                                       │ run / kick
//!                              ┌────────┴────────┐
//!                              │  UpdaterWorker  │
//!                              └─────────────────┘
//! ```
//!
//! Finished admitted writes are reclaimed lazily by every walk over the
//! admitted queue; a [`RequestGroup`] is released when its last member is
//! reclaimed.

pub mod config;
pub mod context;
pub mod error;
pub mod range;
pub mod request;
pub mod stats;
pub mod syncher;
pub mod updater;
pub mod worker;

pub use config::UpdaterConfig;
pub use context::{IoDispatcher, ManualScheduler, Priority, UpdaterScheduler};
pub use error::{UpdaterError, UpdaterResult};
pub use range::PageRange;
pub use request::{GroupId, MetadataIoRequest, ReleaseHook, RequestGroup, RequestRef};
pub use stats::{UpdaterStats, UpdaterStatsSnapshot};
pub use syncher::{Admission, QueueSnapshot, RunOutcome, Syncher};
pub use updater::{GroupSubmission, MetadataUpdater};
pub use worker::UpdaterWorker;
