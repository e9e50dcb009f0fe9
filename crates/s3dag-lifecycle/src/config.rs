use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and batching for a [`LifecycleSweeper`](crate::LifecycleSweeper).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Minimum time between sweeps anywhere in the cluster.
    pub interval_secs: u64,
    /// Sleep between checks when no sweep is due or another node holds the lock.
    pub tick_secs: u64,
    /// Sleep after a failed round.
    pub retry_backoff_secs: u64,
    /// Initial wait for the cluster lock; adapts with observed contention.
    pub lock_timeout_secs: u64,
    /// The lock wait never shrinks below this.
    pub lock_timeout_min_secs: u64,
    /// Maximum keys per batched delete.
    pub max_object_list: usize,
    /// Deletes wait while this many requests or more are in flight.
    pub request_tolerance: usize,
    pub low_load_poll_ms: u64,
    /// Give up waiting for low load after this long and delete anyway.
    pub low_load_max_wait_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 60 * 60,
            tick_secs: 60 * 60,
            retry_backoff_secs: 60,
            lock_timeout_secs: 60,
            lock_timeout_min_secs: 1,
            max_object_list: 1000,
            request_tolerance: 1,
            low_load_poll_ms: 500,
            low_load_max_wait_secs: 10 * 60,
        }
    }
}

impl LifecycleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs.max(1))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_timeout_min(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_min_secs)
    }

    pub fn low_load_poll(&self) -> Duration {
        Duration::from_millis(self.low_load_poll_ms.max(1))
    }

    pub fn low_load_max_wait(&self) -> Duration {
        Duration::from_secs(self.low_load_max_wait_secs)
    }

    /// Batch size, at least one.
    pub fn batch_size(&self) -> usize {
        self.max_object_list.max(1)
    }
}
