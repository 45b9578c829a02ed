use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocketError, Result};
use crate::lease::{PickRequest, DEFAULT_LOCK_MS};

/// Configuration for a single queue worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause between two handled documents, in milliseconds.
    pub delay_ms: u64,
    /// Idle wait when a pick returns nothing, in milliseconds.
    pub sleep_ms: u64,
    /// Documents claimed per pick.
    pub batch: usize,
    /// Lease requested for each claimed document, in milliseconds.
    pub lock_ms: u64,
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay between handled documents.
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Set the idle sleep.
    pub fn with_sleep(mut self, ms: u64) -> Self {
        self.sleep_ms = ms;
        self
    }

    /// Set the pick batch size.
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    /// Set the lease length.
    pub fn with_lock(mut self, ms: u64) -> Self {
        self.lock_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch == 0 {
            return Err(DocketError::InvalidConfig(
                "worker batch must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    pub(crate) fn pick_request(&self) -> PickRequest {
        PickRequest::new(self.batch).with_lock_ms(self.lock_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            sleep_ms: 1_000,
            batch: 1,
            lock_ms: DEFAULT_LOCK_MS,
        }
    }
}
