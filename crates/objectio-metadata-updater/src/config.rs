//! Metadata updater configuration

use crate::context::Priority;
use crate::error::{UpdaterError, UpdaterResult};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata updater configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdaterConfig {
    /// How often the worker invokes `run` when nobody kicks it
    pub run_interval_ms: u64,
    /// Priority for requests promoted out of the pending queue
    pub promotion_priority: Priority,
    /// Priority for requests admitted straight away by `submit_group`
    pub admission_priority: Priority,
    /// Give the scheduler a chance to run other work between promotions
    pub yield_between_promotions: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            run_interval_ms: 100,
            promotion_priority: Priority::High,
            admission_priority: Priority::Normal,
            yield_between_promotions: true,
        }
    }
}

impl UpdaterConfig {
    /// Periodic run cadence
    pub fn run_interval(&self) -> Duration {
        Duration::from_millis(self.run_interval_ms)
    }

    /// Check the config for values the updater cannot work with
    pub fn validate(&self) -> UpdaterResult<()> {
        if self.run_interval_ms == 0 {
            return Err(UpdaterError::InvalidConfig(
                "run_interval_ms must be positive".to_string(),
            ));
        }
        // Promoted requests already waited once; they must not queue behind fresh ones.
        if self.promotion_priority < self.admission_priority {
            return Err(UpdaterError::InvalidConfig(format!(
                "promotion priority {:?} is below admission priority {:?}",
                self.promotion_priority, self.admission_priority
            )));
        }
        Ok(())
    }
}
