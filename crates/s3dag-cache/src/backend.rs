use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use crate::error::CacheResult;
use crate::metadata::{BucketMetadata, ListObjectsParams, ListObjectsResult, ObjectMetadata};

/// Durable store behind an [`ObjectCache`](crate::ObjectCache).
///
/// The backend owns the truth; the cache only holds copies. Backends report
/// absence with [`CacheError::BucketNotFound`](crate::CacheError::BucketNotFound)
/// and [`CacheError::ObjectNotFound`](crate::CacheError::ObjectNotFound) so the
/// cache can tell a miss from a failure.
pub trait PersistentBackend: Send + Sync {
    fn make_bucket(&self, bucket: &str, acl: &str) -> CacheResult<BucketMetadata>;

    fn get_bucket_metadata(&self, bucket: &str) -> CacheResult<BucketMetadata>;

    fn set_bucket_metadata(&self, bucket: &str, acl: &str) -> CacheResult<()>;

    fn list_buckets(&self) -> CacheResult<Vec<BucketMetadata>>;

    /// Fails with `BucketNotEmpty` if objects remain.
    fn delete_bucket(&self, bucket: &str) -> CacheResult<()>;

    /// Store the full contents of `data` as `bucket/object`.
    ///
    /// `expected_md5` is hex-encoded; on mismatch nothing is committed and
    /// the call fails with `BadDigest`.
    fn put_object(
        &self,
        bucket: &str,
        object: &str,
        content_type: &str,
        expected_md5: Option<&str>,
        data: &mut dyn Read,
    ) -> CacheResult<ObjectMetadata>;

    /// A reader over the object's bytes, and its size.
    fn get_object(&self, bucket: &str, object: &str) -> CacheResult<(Box<dyn Read + Send>, u64)>;

    fn get_object_metadata(&self, bucket: &str, object: &str) -> CacheResult<ObjectMetadata>;

    fn list_objects(&self, bucket: &str, params: &ListObjectsParams)
        -> CacheResult<ListObjectsResult>;

    fn delete_object(&self, bucket: &str, object: &str) -> CacheResult<()>;

    /// Replace the object's user tags, returning the updated metadata.
    fn set_object_tags(
        &self,
        bucket: &str,
        object: &str,
        tags: BTreeMap<String, String>,
    ) -> CacheResult<ObjectMetadata>;
}

/// What sits behind an object cache, fixed at construction.
#[derive(Clone)]
pub enum CacheBacking {
    /// The cache is the only copy; evicted objects are gone.
    MemoryOnly,
    /// Misses fall back to the backend and writes go through it.
    Persistent(Arc<dyn PersistentBackend>),
}

impl CacheBacking {
    pub fn backend(&self) -> Option<&Arc<dyn PersistentBackend>> {
        match self {
            Self::MemoryOnly => None,
            Self::Persistent(backend) => Some(backend),
        }
    }
}

impl std::fmt::Debug for CacheBacking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryOnly => write!(f, "MemoryOnly"),
            Self::Persistent(_) => write!(f, "Persistent"),
        }
    }
}
