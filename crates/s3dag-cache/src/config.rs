use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for an [`ObjectCache`](crate::ObjectCache).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on cached object bytes, and on any single object.
    pub max_size: u64,
    /// Idle time after which an object is expired. Zero disables expiry.
    pub expiration_secs: u64,
    /// How often the background sweep looks for expired objects.
    pub expiry_interval_secs: u64,
    /// Maximum number of buckets the cache will hold.
    pub max_buckets: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 512 * 1024 * 1024,
            expiration_secs: 60 * 60,
            expiry_interval_secs: 5,
            max_buckets: 100,
        }
    }
}

impl CacheConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs.max(1))
    }
}
