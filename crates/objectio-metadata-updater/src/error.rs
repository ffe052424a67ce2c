//! Metadata updater error types

use thiserror::Error;

/// Metadata updater error
///
/// Only lifecycle operations are fallible. Classification and promotion
/// never fail; a deferred request is a normal outcome.
#[derive(Error, Debug)]
pub enum UpdaterError {
    /// Configuration rejected by validation
    #[error("Invalid updater config: {0}")]
    InvalidConfig(String),

    /// The host scheduler refused to register the updater
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

/// Result type for metadata updater lifecycle operations
pub type UpdaterResult<T> = Result<T, UpdaterError>;
