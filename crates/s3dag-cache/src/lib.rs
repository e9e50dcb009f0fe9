//! In-memory object cache for s3dag.
//!
//! [`ObjectCache`] serves bucket and object operations from memory. Object
//! bytes live in an [`ExpiringCache`] bounded by total size and idle time;
//! bucket and object metadata live in a separate map guarded by its own lock.
//! When bytes are evicted the matching metadata goes with them.
//!
//! A cache is built over a [`CacheBacking`]: either memory only, or a
//! [`PersistentBackend`] that holds the truth while the cache holds copies.
//! With a backend, misses fall back to it and repopulate the cache.

pub mod backend;
pub mod config;
pub mod error;
pub mod expiring;
pub mod list;
pub mod metadata;
pub mod object_cache;

pub use backend::{CacheBacking, PersistentBackend};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use expiring::{CacheStats, EvictionCallback, EvictionReason, ExpiringCache, ExpiryHandle};
pub use list::{plan, ListPlan};
pub use metadata::{BucketMetadata, ListObjectsParams, ListObjectsResult, ObjectMetadata};
pub use object_cache::ObjectCache;
