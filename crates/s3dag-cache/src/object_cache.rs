use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Read, Write};
use std::sync::{Arc, Weak};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use md5::{Digest, Md5};
use parking_lot::{Mutex, RwLock};
use s3dag_types::{
    is_valid_bucket_acl, is_valid_bucket_name, is_valid_object_name, is_valid_prefix,
    normalize_acl,
};

use crate::backend::{CacheBacking, PersistentBackend};
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::expiring::{CacheStats, EvictionReason, ExpiringCache, ExpiryHandle};
use crate::list;
use crate::metadata::{
    BucketMetadata, ListObjectsParams, ListObjectsResult, ObjectMetadata, DEFAULT_CONTENT_TYPE,
};

/// Read size when streaming an upload into the byte cache.
const CHUNK_SIZE: usize = 1024 * 1024;

struct StoredBucket {
    metadata: BucketMetadata,
    /// Keyed by full cache key (`bucket/object`).
    objects: HashMap<String, ObjectMetadata>,
    /// Keys reserved by uploads still in progress.
    pending: HashSet<String>,
}

impl StoredBucket {
    fn new(metadata: BucketMetadata) -> Self {
        Self {
            metadata,
            objects: HashMap::new(),
            pending: HashSet::new(),
        }
    }
}

type BucketMap = HashMap<String, StoredBucket>;

/// Per-key write counts, kept only while backend reads are in flight. A
/// backend read must not cache what it saw once its key has been written
/// since the read began.
#[derive(Default)]
struct Generations {
    state: Mutex<GenerationState>,
}

#[derive(Default)]
struct GenerationState {
    keys: HashMap<String, u64>,
    readers: usize,
}

impl Generations {
    /// Record a write to `key`. Call after the backend has changed.
    fn bump(&self, key: &str) {
        let mut state = self.state.lock();
        if state.readers > 0 {
            *state.keys.entry(key.to_string()).or_default() += 1;
        }
    }

    /// Call before reading `key` from the backend.
    fn begin_read(&self, key: &str) -> ReadTicket<'_> {
        let mut state = self.state.lock();
        state.readers += 1;
        ReadTicket {
            generations: self,
            key: key.to_string(),
            generation: state.keys.get(key).copied().unwrap_or(0),
        }
    }
}

struct ReadTicket<'a> {
    generations: &'a Generations,
    key: String,
    generation: u64,
}

impl ReadTicket<'_> {
    /// No write to the key since the ticket was taken.
    fn is_current(&self) -> bool {
        let state = self.generations.state.lock();
        state.keys.get(&self.key).copied().unwrap_or(0) == self.generation
    }
}

impl Drop for ReadTicket<'_> {
    fn drop(&mut self) {
        let mut state = self.generations.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            state.keys.clear();
        }
    }
}

fn object_key(bucket: &str, object: &str) -> String {
    format!("{bucket}/{object}")
}

/// Bucket and object cache.
///
/// Two independent locks: `buckets` guards metadata, the byte cache guards
/// itself. Byte-cache mutations can fire the eviction callback, which takes
/// the metadata lock, so no method mutates the byte cache while holding
/// `buckets`. `generations` is taken last, under either of them.
pub struct ObjectCache {
    config: CacheConfig,
    buckets: Arc<RwLock<BucketMap>>,
    objects: Arc<ExpiringCache>,
    backing: CacheBacking,
    generations: Generations,
}

impl ObjectCache {
    pub fn new(config: CacheConfig, backing: CacheBacking) -> Self {
        let buckets: Arc<RwLock<BucketMap>> = Arc::new(RwLock::new(HashMap::new()));
        let objects = Arc::new(ExpiringCache::new(config.max_size, config.expiration()));

        let weak_buckets = Arc::downgrade(&buckets);
        let weak_objects = Arc::downgrade(&objects);
        objects.set_eviction_callback(Arc::new(move |key: &str, reason: EvictionReason| {
            expired_object(&weak_buckets, &weak_objects, key, reason);
        }));

        Self {
            config,
            buckets,
            objects,
            backing,
            generations: Generations::default(),
        }
    }

    /// Memory-only cache with the given configuration.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(config, CacheBacking::MemoryOnly)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backing(&self) -> &CacheBacking {
        &self.backing
    }

    pub fn stats(&self) -> CacheStats {
        self.objects.stats()
    }

    /// Start the background expiry sweep at the configured interval.
    pub fn start_expiry(&self) -> io::Result<ExpiryHandle> {
        self.objects.spawn_expiry(self.config.expiry_interval())
    }

    /// Expire idle objects immediately.
    pub fn expire_now(&self) -> usize {
        self.objects.expire_now()
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    pub fn make_bucket(&self, bucket: &str, acl: &str) -> CacheResult<()> {
        {
            let buckets = self.buckets.read();
            if buckets.len() >= self.config.max_buckets {
                return Err(CacheError::TooManyBuckets {
                    bucket: bucket.to_string(),
                });
            }
            check_bucket_name(bucket)?;
            if !is_valid_bucket_acl(acl) {
                return Err(CacheError::InvalidAcl(acl.to_string()));
            }
            if buckets.contains_key(bucket) {
                return Err(CacheError::BucketExists(bucket.to_string()));
            }
        }

        let acl = normalize_acl(acl);
        let metadata = match self.backing.backend() {
            Some(backend) => backend.make_bucket(bucket, &acl)?,
            None => BucketMetadata {
                name: bucket.to_string(),
                created: Utc::now(),
                acl,
            },
        };

        let mut buckets = self.buckets.write();
        if buckets.contains_key(bucket) {
            return Err(CacheError::BucketExists(bucket.to_string()));
        }
        buckets.insert(bucket.to_string(), StoredBucket::new(metadata));
        tracing::info!(bucket = %bucket, "bucket created");
        Ok(())
    }

    /// All buckets, sorted by name.
    pub fn list_buckets(&self) -> CacheResult<Vec<BucketMetadata>> {
        if let Some(backend) = self.backing.backend() {
            let known = backend.list_buckets()?;
            let mut buckets = self.buckets.write();
            for metadata in known {
                buckets
                    .entry(metadata.name.clone())
                    .or_insert_with(|| StoredBucket::new(metadata));
            }
        }
        let mut result: Vec<BucketMetadata> = self
            .buckets
            .read()
            .values()
            .map(|b| b.metadata.clone())
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    pub fn get_bucket_metadata(&self, bucket: &str) -> CacheResult<BucketMetadata> {
        check_bucket_name(bucket)?;
        self.ensure_bucket(bucket)?;
        self.buckets
            .read()
            .get(bucket)
            .map(|b| b.metadata.clone())
            .ok_or_else(|| CacheError::BucketNotFound(bucket.to_string()))
    }

    /// Replace the bucket ACL. A blank ACL means `private`.
    pub fn set_bucket_metadata(&self, bucket: &str, acl: &str) -> CacheResult<()> {
        check_bucket_name(bucket)?;
        if !is_valid_bucket_acl(acl) {
            return Err(CacheError::InvalidAcl(acl.to_string()));
        }
        self.ensure_bucket(bucket)?;
        let acl = normalize_acl(acl);
        if let Some(backend) = self.backing.backend() {
            backend.set_bucket_metadata(bucket, &acl)?;
        }
        let mut buckets = self.buckets.write();
        let stored = buckets
            .get_mut(bucket)
            .ok_or_else(|| CacheError::BucketNotFound(bucket.to_string()))?;
        stored.metadata.acl = acl;
        Ok(())
    }

    /// Remove an empty bucket.
    pub fn delete_bucket(&self, bucket: &str) -> CacheResult<()> {
        check_bucket_name(bucket)?;
        self.ensure_bucket(bucket)?;

        let removed = match self.backing.backend() {
            Some(backend) => {
                if self.has_pending(bucket) {
                    return Err(CacheError::BucketNotEmpty(bucket.to_string()));
                }
                backend.delete_bucket(bucket)?;
                self.buckets.write().remove(bucket)
            }
            None => {
                let mut buckets = self.buckets.write();
                let stored = buckets
                    .get(bucket)
                    .ok_or_else(|| CacheError::BucketNotFound(bucket.to_string()))?;
                if !stored.objects.is_empty() || !stored.pending.is_empty() {
                    return Err(CacheError::BucketNotEmpty(bucket.to_string()));
                }
                buckets.remove(bucket)
            }
        };

        if let Some(stored) = removed {
            for key in stored.objects.keys() {
                self.objects.remove(key);
            }
        }
        tracing::info!(bucket = %bucket, "bucket deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Object writes
    // -----------------------------------------------------------------------

    /// Store `data` as `bucket/object`.
    ///
    /// `expected_md5` is the base64 Content-MD5 header value, or blank. The
    /// key is reserved for the duration of the upload, so a concurrent
    /// create of the same key fails with `ObjectExists`. On failure nothing
    /// is recorded.
    pub fn create_object(
        &self,
        bucket: &str,
        object: &str,
        content_type: &str,
        expected_md5: &str,
        size: u64,
        data: impl Read,
    ) -> CacheResult<ObjectMetadata> {
        let max_size = self.config.max_size;
        if size > max_size {
            return Err(CacheError::EntityTooLarge {
                bucket: bucket.to_string(),
                object: object.to_string(),
                size,
                max_size,
            });
        }
        check_bucket_name(bucket)?;
        check_object_name(object)?;
        let expected = decode_md5(expected_md5)?;
        let content_type = match content_type.trim() {
            "" => DEFAULT_CONTENT_TYPE,
            t => t,
        };

        self.ensure_bucket(bucket)?;
        let key = object_key(bucket, object);
        self.reserve(bucket, object, &key)?;

        let result = match self.backing.backend() {
            Some(backend) => self.create_in_backend(
                backend.as_ref(),
                bucket,
                object,
                &key,
                content_type,
                expected.as_deref(),
                data,
            ),
            None => self.create_in_memory(
                bucket,
                object,
                &key,
                content_type,
                expected.as_deref(),
                data,
            ),
        };

        let mut buckets = self.buckets.write();
        // memory-only bytes can be evicted by another writer up to here
        let result = result.and_then(|metadata| {
            if self.backing.backend().is_none() && !self.objects.contains(&key) {
                return Err(CacheError::Internal(format!(
                    "{key} was evicted while being written"
                )));
            }
            Ok(metadata)
        });
        if let Some(stored) = buckets.get_mut(bucket) {
            stored.pending.remove(&key);
            if let Ok(metadata) = &result {
                stored.objects.insert(key, metadata.clone());
            }
        }
        drop(buckets);

        match &result {
            Ok(metadata) => {
                tracing::debug!(bucket = %bucket, object = %object, size = metadata.size, "object created")
            }
            Err(e) => tracing::debug!(bucket = %bucket, object = %object, error = %e, "object create failed"),
        }
        result
    }

    fn reserve(&self, bucket: &str, object: &str, key: &str) -> CacheResult<()> {
        let mut buckets = self.buckets.write();
        let stored = buckets
            .get_mut(bucket)
            .ok_or_else(|| CacheError::BucketNotFound(bucket.to_string()))?;
        if stored.objects.contains_key(key) || !stored.pending.insert(key.to_string()) {
            return Err(CacheError::ObjectExists {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }
        Ok(())
    }

    fn create_in_backend(
        &self,
        backend: &dyn PersistentBackend,
        bucket: &str,
        object: &str,
        key: &str,
        content_type: &str,
        expected: Option<&str>,
        data: impl Read,
    ) -> CacheResult<ObjectMetadata> {
        let max_size = self.config.max_size;
        let mut limited = data.take(max_size.saturating_add(1));
        let metadata = backend.put_object(bucket, object, content_type, expected, &mut limited)?;
        self.generations.bump(key);
        self.objects.remove(key);
        if metadata.size > max_size {
            if let Err(e) = backend.delete_object(bucket, object) {
                tracing::warn!(bucket = %bucket, object = %object, error = %e, "failed to remove oversized object");
            }
            return Err(CacheError::EntityTooLarge {
                bucket: bucket.to_string(),
                object: object.to_string(),
                size: metadata.size,
                max_size,
            });
        }
        Ok(metadata)
    }

    fn create_in_memory(
        &self,
        bucket: &str,
        object: &str,
        key: &str,
        content_type: &str,
        expected: Option<&str>,
        data: impl Read,
    ) -> CacheResult<ObjectMetadata> {
        self.objects.remove(key);
        let streamed = self.stream_into_cache(bucket, object, key, expected, data);
        if streamed.is_err() {
            self.objects.remove(key);
        }
        let (md5, size) = streamed?;
        Ok(ObjectMetadata {
            bucket: bucket.to_string(),
            object: object.to_string(),
            content_type: content_type.to_string(),
            created: Utc::now(),
            md5,
            size,
            user_tags: BTreeMap::new(),
        })
    }

    /// Append `data` to the byte cache chunk by chunk, hashing as it goes.
    /// Returns the hex MD5 and the byte count.
    fn stream_into_cache(
        &self,
        bucket: &str,
        object: &str,
        key: &str,
        expected: Option<&str>,
        mut data: impl Read,
    ) -> CacheResult<(String, u64)> {
        let max_size = self.config.max_size;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            let n = match data.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(io_error(bucket, object, source)),
            };
            total += n as u64;
            if total > max_size {
                return Err(CacheError::EntityTooLarge {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    size: total,
                    max_size,
                });
            }
            hasher.update(&buf[..n]);
            if !self.objects.append(key, &buf[..n]) {
                return Err(CacheError::Internal(format!("cache append failed for {key}")));
            }
        }

        if total == 0 {
            self.objects.set(key, Vec::new());
        }
        if self.objects.len_of(key) != Some(total as usize) {
            return Err(CacheError::Internal(format!(
                "{key} was evicted while being written"
            )));
        }

        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = expected {
            if expected != actual {
                return Err(CacheError::BadDigest {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok((actual, total))
    }

    pub fn delete_object(&self, bucket: &str, object: &str) -> CacheResult<()> {
        check_bucket_name(bucket)?;
        check_object_name(object)?;
        self.ensure_bucket(bucket)?;
        let key = object_key(bucket, object);

        if let Some(backend) = self.backing.backend() {
            backend.delete_object(bucket, object)?;
            self.generations.bump(&key);
        }
        let removed = self
            .buckets
            .write()
            .get_mut(bucket)
            .and_then(|b| b.objects.remove(&key));
        if removed.is_none() && self.backing.backend().is_none() {
            return Err(CacheError::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }
        self.objects.remove(&key);
        tracing::debug!(bucket = %bucket, object = %object, "object deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Object reads
    // -----------------------------------------------------------------------

    /// Write the whole object to `writer`, returning the byte count.
    pub fn get_object<W: Write>(&self, writer: &mut W, bucket: &str, object: &str) -> CacheResult<u64> {
        check_bucket_name(bucket)?;
        check_object_name(object)?;
        self.ensure_bucket(bucket)?;
        let key = object_key(bucket, object);

        if let Some(data) = self.objects.get(&key) {
            writer
                .write_all(&data)
                .map_err(|e| io_error(bucket, object, e))?;
            return Ok(data.len() as u64);
        }

        let backend = self.backend_for_miss(bucket, object)?;
        let ticket = self.generations.begin_read(&key);
        let (reader, size) = backend.get_object(bucket, object)?;
        let capture = size <= self.config.max_size;
        let mut tee = TeeWriter {
            inner: writer,
            captured: capture.then(|| Vec::with_capacity(size as usize)),
        };
        let written = io::copy(&mut reader.take(size), &mut tee)
            .map_err(|e| io_error(bucket, object, e))?;
        if written != size {
            return Err(io_error(
                bucket,
                object,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("backend returned {written} of {size} bytes"),
                ),
            ));
        }
        if let Some(captured) = tee.captured {
            self.populate(&ticket, captured);
        }
        Ok(written)
    }

    /// Write `length` bytes starting at `start` to `writer`.
    ///
    /// A backend miss buffers the whole object so the cache never holds a
    /// truncated copy.
    pub fn get_partial_object<W: Write>(
        &self,
        writer: &mut W,
        bucket: &str,
        object: &str,
        start: i64,
        length: i64,
    ) -> CacheResult<u64> {
        check_bucket_name(bucket)?;
        check_object_name(object)?;
        if start < 0 || length < 0 {
            return Err(CacheError::InvalidRange { start, length });
        }
        self.ensure_bucket(bucket)?;
        let key = object_key(bucket, object);

        if let Some(data) = self.objects.get(&key) {
            return write_range(writer, bucket, object, &data, start, length);
        }

        let backend = self.backend_for_miss(bucket, object)?;
        let ticket = self.generations.begin_read(&key);
        let (reader, size) = backend.get_object(bucket, object)?;
        let mut data = Vec::with_capacity(size.min(self.config.max_size) as usize);
        reader
            .take(size)
            .read_to_end(&mut data)
            .map_err(|e| io_error(bucket, object, e))?;
        let written = write_range(writer, bucket, object, &data, start, length)?;
        self.populate(&ticket, data);
        Ok(written)
    }

    /// Cached metadata, or the backend's copy on a miss.
    pub fn get_object_metadata(&self, bucket: &str, object: &str) -> CacheResult<ObjectMetadata> {
        check_bucket_name(bucket)?;
        check_object_name(object)?;
        self.ensure_bucket(bucket)?;
        let key = object_key(bucket, object);

        let cached = self
            .buckets
            .read()
            .get(bucket)
            .and_then(|b| b.objects.get(&key))
            .cloned();
        if let Some(metadata) = cached {
            return Ok(metadata);
        }

        let backend = self.backend_for_miss(bucket, object)?;
        let ticket = self.generations.begin_read(&key);
        let metadata = backend.get_object_metadata(bucket, object)?;
        let mut buckets = self.buckets.write();
        if let Some(stored) = buckets.get_mut(bucket) {
            if ticket.is_current() {
                stored.objects.insert(key, metadata.clone());
            }
        }
        Ok(metadata)
    }

    pub fn list_objects(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> CacheResult<ListObjectsResult> {
        check_bucket_name(bucket)?;
        if !is_valid_prefix(&params.prefix) {
            return Err(CacheError::ObjectNameInvalid(params.prefix.clone()));
        }
        self.ensure_bucket(bucket)?;

        if let Some(backend) = self.backing.backend() {
            let mut result = backend.list_objects(bucket, params)?;
            result.objects.sort_by(|a, b| a.object.cmp(&b.object));
            result.next_marker = if result.is_truncated && params.is_delimiter_set() {
                result.objects.last().map(|o| o.object.clone())
            } else {
                None
            };
            return Ok(result);
        }

        let buckets = self.buckets.read();
        let stored = buckets
            .get(bucket)
            .ok_or_else(|| CacheError::BucketNotFound(bucket.to_string()))?;
        let plan = list::plan(bucket, stored.objects.keys().map(String::as_str), params);
        let objects = plan
            .objects
            .iter()
            .filter_map(|name| stored.objects.get(&object_key(bucket, name)).cloned())
            .collect();
        Ok(ListObjectsResult {
            objects,
            common_prefixes: plan.common_prefixes,
            is_truncated: plan.is_truncated,
            next_marker: plan.next_marker,
        })
    }

    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    /// Replace the object's user tags.
    pub fn put_object_tags(
        &self,
        bucket: &str,
        object: &str,
        tags: BTreeMap<String, String>,
    ) -> CacheResult<ObjectMetadata> {
        check_bucket_name(bucket)?;
        check_object_name(object)?;
        self.ensure_bucket(bucket)?;
        let key = object_key(bucket, object);

        let Some(backend) = self.backing.backend() else {
            let mut buckets = self.buckets.write();
            let metadata = buckets
                .get_mut(bucket)
                .and_then(|b| b.objects.get_mut(&key))
                .ok_or_else(|| CacheError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                })?;
            metadata.user_tags = tags;
            return Ok(metadata.clone());
        };

        let metadata = backend.set_object_tags(bucket, object, tags)?;
        if let Some(stored) = self.buckets.write().get_mut(bucket) {
            stored.objects.insert(key, metadata.clone());
        }
        Ok(metadata)
    }

    pub fn get_object_tags(&self, bucket: &str, object: &str) -> CacheResult<BTreeMap<String, String>> {
        Ok(self.get_object_metadata(bucket, object)?.user_tags)
    }

    pub fn delete_object_tags(&self, bucket: &str, object: &str) -> CacheResult<()> {
        self.put_object_tags(bucket, object, BTreeMap::new())?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Make sure `bucket` is present locally, pulling it from the backend if
    /// needed.
    fn ensure_bucket(&self, bucket: &str) -> CacheResult<()> {
        if self.buckets.read().contains_key(bucket) {
            return Ok(());
        }
        let Some(backend) = self.backing.backend() else {
            return Err(CacheError::BucketNotFound(bucket.to_string()));
        };
        let metadata = backend.get_bucket_metadata(bucket)?;
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_insert_with(|| StoredBucket::new(metadata));
        tracing::debug!(bucket = %bucket, "bucket loaded from backend");
        Ok(())
    }

    fn has_pending(&self, bucket: &str) -> bool {
        self.buckets
            .read()
            .get(bucket)
            .is_some_and(|b| !b.pending.is_empty())
    }

    fn backend_for_miss(&self, bucket: &str, object: &str) -> CacheResult<&Arc<dyn PersistentBackend>> {
        match self.backing.backend() {
            Some(backend) => {
                tracing::debug!(bucket = %bucket, object = %object, "cache miss, reading from backend");
                Ok(backend)
            }
            None => Err(CacheError::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            }),
        }
    }

    /// Cache bytes read from the backend unless another reader got there
    /// first or the key was written while they were being read.
    fn populate(&self, ticket: &ReadTicket<'_>, data: Vec<u8>) {
        let len = data.len();
        if !self
            .objects
            .insert_if_absent_when(&ticket.key, data, || ticket.is_current())
        {
            tracing::trace!(key = %ticket.key, len, "backend read not cached");
        }
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("config", &self.config)
            .field("backing", &self.backing)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Eviction callback: drop the evicted key's metadata from every bucket.
fn expired_object(
    buckets: &Weak<RwLock<BucketMap>>,
    objects: &Weak<ExpiringCache>,
    key: &str,
    reason: EvictionReason,
) {
    if let Some(objects) = objects.upgrade() {
        let stats = objects.stats();
        tracing::debug!(
            key = %key,
            ?reason,
            bytes = stats.bytes,
            items = stats.items,
            expired = stats.expired,
            "cached object evicted"
        );
    }
    let Some(buckets) = buckets.upgrade() else {
        return;
    };
    for stored in buckets.write().values_mut() {
        stored.objects.remove(key);
    }
}

/// Forwards writes and keeps a copy of what was written.
struct TeeWriter<'a, W: Write> {
    inner: &'a mut W,
    captured: Option<Vec<u8>>,
}

impl<W: Write> Write for TeeWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(captured) = &mut self.captured {
            captured.extend_from_slice(&buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn write_range<W: Write>(
    writer: &mut W,
    bucket: &str,
    object: &str,
    data: &[u8],
    start: i64,
    length: i64,
) -> CacheResult<u64> {
    let range = CacheError::InvalidRange { start, length };
    let (start, length) = (start as u64, length as u64);
    let Some(end) = start.checked_add(length).filter(|end| *end <= data.len() as u64) else {
        return Err(range);
    };
    writer
        .write_all(&data[start as usize..end as usize])
        .map_err(|e| io_error(bucket, object, e))?;
    Ok(length)
}

fn decode_md5(expected: &str) -> CacheResult<Option<String>> {
    let trimmed = expected.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let raw = STANDARD
        .decode(trimmed)
        .map_err(|_| CacheError::InvalidDigest(trimmed.to_string()))?;
    Ok(Some(hex::encode(raw)))
}

fn check_bucket_name(bucket: &str) -> CacheResult<()> {
    if !is_valid_bucket_name(bucket) {
        return Err(CacheError::BucketNameInvalid(bucket.to_string()));
    }
    Ok(())
}

fn check_object_name(object: &str) -> CacheResult<()> {
    if !is_valid_object_name(object) {
        return Err(CacheError::ObjectNameInvalid(object.to_string()));
    }
    Ok(())
}

fn io_error(bucket: &str, object: &str, source: io::Error) -> CacheError {
    CacheError::Io {
        bucket: bucket.to_string(),
        object: object.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    fn cache() -> ObjectCache {
        ObjectCache::in_memory(CacheConfig::default())
    }

    fn md5_b64(data: &[u8]) -> String {
        STANDARD.encode(Md5::digest(data))
    }

    fn put(cache: &ObjectCache, bucket: &str, object: &str, data: &[u8]) -> ObjectMetadata {
        cache
            .create_object(bucket, object, "", "", data.len() as u64, Cursor::new(data.to_vec()))
            .unwrap()
    }

    fn read(cache: &ObjectCache, bucket: &str, object: &str) -> Vec<u8> {
        let mut out = Vec::new();
        cache.get_object(&mut out, bucket, object).unwrap();
        out
    }

    /// A reader that signals its first read, then blocks until released.
    struct Gate {
        started: Option<mpsc::Sender<()>>,
        release: mpsc::Receiver<()>,
        data: Cursor<Vec<u8>>,
    }

    impl Read for Gate {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(started) = self.started.take() {
                started.send(()).unwrap();
                self.release.recv().unwrap();
            }
            self.data.read(buf)
        }
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    #[test]
    fn make_bucket_then_list_once() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        let err = c.make_bucket("foo", "").unwrap_err();
        assert!(matches!(err, CacheError::BucketExists(_)));
        assert_eq!(err.kind(), s3dag_types::ErrorKind::AlreadyExists);

        let names: Vec<_> = c.list_buckets().unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["foo"]);
    }

    #[test]
    fn buckets_are_listed_sorted() {
        let c = cache();
        for name in ["zeta", "alpha", "mid"] {
            c.make_bucket(name, "private").unwrap();
        }
        let names: Vec<_> = c.list_buckets().unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn make_bucket_validation() {
        let c = ObjectCache::in_memory(CacheConfig {
            max_buckets: 1,
            ..Default::default()
        });
        assert!(matches!(c.make_bucket("a.b", ""), Err(CacheError::BucketNameInvalid(_))));
        assert!(matches!(c.make_bucket("good", "everyone"), Err(CacheError::InvalidAcl(_))));
        c.make_bucket("good", "").unwrap();
        assert!(matches!(
            c.make_bucket("other", ""),
            Err(CacheError::TooManyBuckets { .. })
        ));
    }

    #[test]
    fn bucket_metadata_defaults_and_updates() {
        let c = cache();
        c.make_bucket("foo", "  ").unwrap();
        assert_eq!(c.get_bucket_metadata("foo").unwrap().acl, "private");
        c.set_bucket_metadata("foo", "public-read").unwrap();
        assert_eq!(c.get_bucket_metadata("foo").unwrap().acl, "public-read");
        c.set_bucket_metadata("foo", "").unwrap();
        assert_eq!(c.get_bucket_metadata("foo").unwrap().acl, "private");
        assert!(matches!(
            c.get_bucket_metadata("missing"),
            Err(CacheError::BucketNotFound(_))
        ));
    }

    #[test]
    fn delete_bucket_requires_empty() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        put(&c, "foo", "obj", b"x");
        assert!(matches!(c.delete_bucket("foo"), Err(CacheError::BucketNotEmpty(_))));
        c.delete_object("foo", "obj").unwrap();
        c.delete_bucket("foo").unwrap();
        assert!(c.list_buckets().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Object writes and reads
    // -----------------------------------------------------------------------

    #[test]
    fn create_then_get_roundtrip() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        let data = b"Hello World";
        let meta = c
            .create_object("foo", "obj", "", &md5_b64(data), data.len() as u64, &data[..])
            .unwrap();
        assert_eq!(meta.size, data.len() as u64);
        assert_eq!(meta.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(meta.md5, hex::encode(Md5::digest(data)));

        assert_eq!(read(&c, "foo", "obj"), data);
        assert_eq!(c.get_object_metadata("foo", "obj").unwrap(), meta);
    }

    #[test]
    fn large_object_spans_chunks() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        put(&c, "foo", "big", &data);
        assert_eq!(read(&c, "foo", "big"), data);
    }

    #[test]
    fn empty_object() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        let meta = put(&c, "foo", "empty", b"");
        assert_eq!(meta.size, 0);
        assert!(read(&c, "foo", "empty").is_empty());
    }

    #[test]
    fn bad_digest_leaves_nothing_behind() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        let err = c
            .create_object("foo", "obj", "", &md5_b64(b"other"), 5, &b"hello"[..])
            .unwrap_err();
        assert!(matches!(err, CacheError::BadDigest { .. }));
        assert_eq!(err.kind(), s3dag_types::ErrorKind::ResourceExhausted);
        assert!(matches!(
            c.get_object_metadata("foo", "obj"),
            Err(CacheError::ObjectNotFound { .. })
        ));
        assert_eq!(c.stats().items, 0);

        // The key is free again.
        put(&c, "foo", "obj", b"hello");
    }

    #[test]
    fn malformed_digest_is_invalid() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        let err = c
            .create_object("foo", "obj", "", "not base64!", 5, &b"hello"[..])
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidDigest(_)));
    }

    #[test]
    fn too_large_declared_and_actual() {
        let c = ObjectCache::in_memory(CacheConfig {
            max_size: 8,
            ..Default::default()
        });
        c.make_bucket("foo", "").unwrap();
        assert!(matches!(
            c.create_object("foo", "obj", "", "", 9, &[0u8; 9][..]),
            Err(CacheError::EntityTooLarge { size: 9, .. })
        ));
        // Declared small, streamed large.
        assert!(matches!(
            c.create_object("foo", "obj", "", "", 2, &[0u8; 9][..]),
            Err(CacheError::EntityTooLarge { .. })
        ));
        assert_eq!(c.stats().bytes, 0);
    }

    #[test]
    fn duplicate_create_fails() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        put(&c, "foo", "obj", b"one");
        assert!(matches!(
            c.create_object("foo", "obj", "", "", 3, &b"two"[..]),
            Err(CacheError::ObjectExists { .. })
        ));
    }

    #[test]
    fn concurrent_create_same_key_is_serialized() {
        let c = Arc::new(cache());
        c.make_bucket("foo", "").unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let writer = {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                let gate = Gate {
                    started: Some(started_tx),
                    release: release_rx,
                    data: Cursor::new(b"first".to_vec()),
                };
                c.create_object("foo", "obj", "", "", 5, gate)
            })
        };

        started_rx.recv().unwrap();
        assert!(matches!(
            c.create_object("foo", "obj", "", "", 6, &b"second"[..]),
            Err(CacheError::ObjectExists { .. })
        ));
        release_tx.send(()).unwrap();
        writer.join().unwrap().unwrap();
        assert_eq!(read(&c, "foo", "obj"), b"first");
    }

    #[test]
    fn name_validation_happens_first() {
        let c = cache();
        let mut out = Vec::new();
        assert!(matches!(
            c.get_object(&mut out, "a.b", "obj"),
            Err(CacheError::BucketNameInvalid(_))
        ));
        assert!(matches!(
            c.get_object(&mut out, "foo", " "),
            Err(CacheError::ObjectNameInvalid(_))
        ));
        assert!(matches!(
            c.get_object(&mut out, "foo", "obj"),
            Err(CacheError::BucketNotFound(_))
        ));
    }

    #[test]
    fn miss_without_backend_is_not_found() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            c.get_object(&mut out, "foo", "nope"),
            Err(CacheError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn negative_range_rejected() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        put(&c, "foo", "obj", b"hello");
        let mut out = Vec::new();
        assert!(matches!(
            c.get_partial_object(&mut out, "foo", "obj", -1, 2),
            Err(CacheError::InvalidRange { start: -1, .. })
        ));
        assert!(matches!(
            c.get_partial_object(&mut out, "foo", "obj", 3, 5),
            Err(CacheError::InvalidRange { .. })
        ));
    }

    proptest! {
        #[test]
        fn partial_read_returns_exact_slice(
            data in proptest::collection::vec(any::<u8>(), 1..256),
            a in any::<usize>(),
            b in any::<usize>(),
        ) {
            let c = cache();
            c.make_bucket("foo", "").unwrap();
            put(&c, "foo", "obj", &data);
            let start = a % (data.len() + 1);
            let length = b % (data.len() - start + 1);
            let mut out = Vec::new();
            let n = c
                .get_partial_object(&mut out, "foo", "obj", start as i64, length as i64)
                .unwrap();
            prop_assert_eq!(n as usize, length);
            prop_assert_eq!(&out[..], &data[start..start + length]);
        }
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[test]
    fn list_objects_prefix_delimiter_and_truncation() {
        let c = cache();
        c.make_bucket("foo5", "").unwrap();
        put(&c, "foo5", "obj1", b"one");
        put(&c, "foo5", "obj2", b"two");

        let params = ListObjectsParams {
            prefix: "o".into(),
            delimiter: "1".into(),
            max_keys: 10,
            ..Default::default()
        };
        let result = c.list_objects("foo5", &params).unwrap();
        assert!(!result.is_truncated);
        assert_eq!(result.common_prefixes, vec!["obj1"]);

        let params = ListObjectsParams {
            delimiter: "1".into(),
            max_keys: 10,
            ..Default::default()
        };
        let result = c.list_objects("foo5", &params).unwrap();
        assert_eq!(result.objects[0].object, "obj2");
        assert_eq!(result.common_prefixes, vec!["obj1"]);

        put(&c, "foo5", "obj3", b"three");
        let params = ListObjectsParams {
            prefix: "o".into(),
            max_keys: 2,
            ..Default::default()
        };
        let result = c.list_objects("foo5", &params).unwrap();
        assert!(result.is_truncated);
        assert_eq!(result.objects.len(), 2);
        assert_eq!(result.objects[0].object, "obj1");
    }

    #[test]
    fn list_rejects_invalid_prefix() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        let params = ListObjectsParams {
            prefix: " ".into(),
            ..Default::default()
        };
        assert!(matches!(
            c.list_objects("foo", &params),
            Err(CacheError::ObjectNameInvalid(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    #[test]
    fn eviction_drops_metadata() {
        let c = ObjectCache::in_memory(CacheConfig {
            max_size: 8,
            ..Default::default()
        });
        c.make_bucket("foo", "").unwrap();
        put(&c, "foo", "first", b"12345");
        put(&c, "foo", "second", b"67890");

        assert!(matches!(
            c.get_object_metadata("foo", "first"),
            Err(CacheError::ObjectNotFound { .. })
        ));
        assert_eq!(c.get_object_metadata("foo", "second").unwrap().size, 5);
        assert_eq!(c.stats().evicted, 1);
    }

    #[test]
    fn metadata_never_outlives_evicted_bytes() {
        let c = Arc::new(ObjectCache::in_memory(CacheConfig {
            max_size: 16,
            ..Default::default()
        }));
        c.make_bucket("foo", "").unwrap();

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..50 {
                        let name = format!("t{t}-{i}");
                        match c.create_object("foo", &name, "", "", 5, &b"12345"[..]) {
                            Ok(_) | Err(CacheError::Internal(_)) => {}
                            Err(e) => panic!("unexpected create failure: {e}"),
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let params = ListObjectsParams {
            max_keys: 1000,
            ..Default::default()
        };
        let listed = c.list_objects("foo", &params).unwrap().objects;
        assert!(!listed.is_empty());
        for metadata in listed {
            assert_eq!(read(&c, "foo", &metadata.object), b"12345");
        }
    }

    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    #[test]
    fn object_tags() {
        let c = cache();
        c.make_bucket("foo", "").unwrap();
        put(&c, "foo", "obj", b"x");
        let tags = BTreeMap::from([("env".to_string(), "dev".to_string())]);
        c.put_object_tags("foo", "obj", tags.clone()).unwrap();
        assert_eq!(c.get_object_tags("foo", "obj").unwrap(), tags);
        c.delete_object_tags("foo", "obj").unwrap();
        assert!(c.get_object_tags("foo", "obj").unwrap().is_empty());
        assert!(matches!(
            c.put_object_tags("foo", "nope", BTreeMap::new()),
            Err(CacheError::ObjectNotFound { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Persistent backend
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct FakeBackend {
        buckets: Mutex<BTreeMap<String, BucketMetadata>>,
        objects: Mutex<BTreeMap<(String, String), (ObjectMetadata, Vec<u8>)>>,
        reads: AtomicUsize,
        /// Holds the next object read at its first byte.
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl FakeBackend {
        fn not_found(bucket: &str, object: &str) -> CacheError {
            CacheError::ObjectNotFound {
                bucket: bucket.into(),
                object: object.into(),
            }
        }
    }

    impl PersistentBackend for FakeBackend {
        fn make_bucket(&self, bucket: &str, acl: &str) -> CacheResult<BucketMetadata> {
            let meta = BucketMetadata {
                name: bucket.into(),
                created: Utc::now(),
                acl: acl.into(),
            };
            self.buckets.lock().insert(bucket.into(), meta.clone());
            Ok(meta)
        }

        fn get_bucket_metadata(&self, bucket: &str) -> CacheResult<BucketMetadata> {
            self.buckets
                .lock()
                .get(bucket)
                .cloned()
                .ok_or_else(|| CacheError::BucketNotFound(bucket.into()))
        }

        fn set_bucket_metadata(&self, bucket: &str, acl: &str) -> CacheResult<()> {
            if let Some(meta) = self.buckets.lock().get_mut(bucket) {
                meta.acl = acl.into();
            }
            Ok(())
        }

        fn list_buckets(&self) -> CacheResult<Vec<BucketMetadata>> {
            Ok(self.buckets.lock().values().cloned().collect())
        }

        fn delete_bucket(&self, bucket: &str) -> CacheResult<()> {
            if self.objects.lock().keys().any(|(b, _)| b == bucket) {
                return Err(CacheError::BucketNotEmpty(bucket.into()));
            }
            self.buckets.lock().remove(bucket);
            Ok(())
        }

        fn put_object(
            &self,
            bucket: &str,
            object: &str,
            content_type: &str,
            _expected_md5: Option<&str>,
            data: &mut dyn Read,
        ) -> CacheResult<ObjectMetadata> {
            let mut bytes = Vec::new();
            data.read_to_end(&mut bytes)
                .map_err(|e| io_error(bucket, object, e))?;
            let meta = ObjectMetadata {
                bucket: bucket.into(),
                object: object.into(),
                content_type: content_type.into(),
                created: Utc::now(),
                md5: hex::encode(Md5::digest(&bytes)),
                size: bytes.len() as u64,
                user_tags: BTreeMap::new(),
            };
            self.objects
                .lock()
                .insert((bucket.into(), object.into()), (meta.clone(), bytes));
            Ok(meta)
        }

        fn get_object(&self, bucket: &str, object: &str) -> CacheResult<(Box<dyn Read + Send>, u64)> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let bytes = self
                .objects
                .lock()
                .get(&(bucket.to_string(), object.to_string()))
                .map(|(_, bytes)| bytes.clone())
                .ok_or_else(|| Self::not_found(bucket, object))?;
            let size = bytes.len() as u64;
            let data = Cursor::new(bytes);
            match self.gate.lock().take() {
                Some((started, release)) => Ok((
                    Box::new(Gate {
                        started: Some(started),
                        release,
                        data,
                    }),
                    size,
                )),
                None => Ok((Box::new(data), size)),
            }
        }

        fn get_object_metadata(&self, bucket: &str, object: &str) -> CacheResult<ObjectMetadata> {
            self.objects
                .lock()
                .get(&(bucket.to_string(), object.to_string()))
                .map(|(meta, _)| meta.clone())
                .ok_or_else(|| Self::not_found(bucket, object))
        }

        fn list_objects(
            &self,
            bucket: &str,
            params: &ListObjectsParams,
        ) -> CacheResult<ListObjectsResult> {
            let objects = self.objects.lock();
            let keys: Vec<String> = objects.keys().map(|(b, o)| object_key(b, o)).collect();
            let plan = list::plan(bucket, keys.iter().map(String::as_str), params);
            Ok(ListObjectsResult {
                objects: plan
                    .objects
                    .iter()
                    .rev()
                    .filter_map(|o| objects.get(&(bucket.to_string(), o.clone())))
                    .map(|(meta, _)| meta.clone())
                    .collect(),
                common_prefixes: plan.common_prefixes,
                is_truncated: plan.is_truncated,
                next_marker: None,
            })
        }

        fn delete_object(&self, bucket: &str, object: &str) -> CacheResult<()> {
            self.objects
                .lock()
                .remove(&(bucket.to_string(), object.to_string()))
                .map(|_| ())
                .ok_or_else(|| Self::not_found(bucket, object))
        }

        fn set_object_tags(
            &self,
            bucket: &str,
            object: &str,
            tags: BTreeMap<String, String>,
        ) -> CacheResult<ObjectMetadata> {
            let mut objects = self.objects.lock();
            let (meta, _) = objects
                .get_mut(&(bucket.to_string(), object.to_string()))
                .ok_or_else(|| Self::not_found(bucket, object))?;
            meta.user_tags = tags;
            Ok(meta.clone())
        }
    }

    fn backed(config: CacheConfig) -> (Arc<FakeBackend>, ObjectCache) {
        let backend = Arc::new(FakeBackend::default());
        let cache = ObjectCache::new(config, CacheBacking::Persistent(backend.clone()));
        (backend, cache)
    }

    #[test]
    fn backend_miss_populates_cache() {
        let (backend, c) = backed(CacheConfig::default());
        c.make_bucket("foo", "").unwrap();
        put(&c, "foo", "obj", b"from backend");

        assert_eq!(read(&c, "foo", "obj"), b"from backend");
        assert_eq!(backend.reads.load(Ordering::SeqCst), 1);
        assert_eq!(read(&c, "foo", "obj"), b"from backend");
        assert_eq!(backend.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backend_read_racing_an_overwrite_is_not_cached() {
        let (backend, c) = backed(CacheConfig::default());
        let c = Arc::new(c);
        c.make_bucket("foo", "").unwrap();
        put(&c, "foo", "obj", b"old-bytes");

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *backend.gate.lock() = Some((started_tx, release_rx));
        let reader = {
            let c = Arc::clone(&c);
            thread::spawn(move || read(&c, "foo", "obj"))
        };

        started_rx.recv().unwrap();
        c.delete_object("foo", "obj").unwrap();
        let fresh = put(&c, "foo", "obj", b"new-bytes");
        release_tx.send(()).unwrap();
        assert_eq!(reader.join().unwrap(), b"old-bytes");

        assert_eq!(read(&c, "foo", "obj"), b"new-bytes");
        let metadata = c.get_object_metadata("foo", "obj").unwrap();
        assert_eq!(metadata.md5, fresh.md5);
        assert_eq!(metadata.md5, hex::encode(Md5::digest(b"new-bytes")));
    }

    #[test]
    fn backend_partial_miss_caches_whole_object() {
        let (backend, c) = backed(CacheConfig::default());
        c.make_bucket("foo", "").unwrap();
        put(&c, "foo", "obj", b"0123456789");

        let mut out = Vec::new();
        c.get_partial_object(&mut out, "foo", "obj", 2, 3).unwrap();
        assert_eq!(out, b"234");
        assert_eq!(read(&c, "foo", "obj"), b"0123456789");
        assert_eq!(backend.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backend_buckets_and_metadata_load_on_demand() {
        let backend = Arc::new(FakeBackend::default());
        let first = ObjectCache::new(
            CacheConfig::default(),
            CacheBacking::Persistent(backend.clone()),
        );
        first.make_bucket("foo", "").unwrap();
        put(&first, "foo", "obj", b"data");

        // A fresh cache over the same backend knows nothing locally.
        let second = ObjectCache::new(CacheConfig::default(), CacheBacking::Persistent(backend));
        assert_eq!(second.get_object_metadata("foo", "obj").unwrap().size, 4);
        assert_eq!(second.list_buckets().unwrap().len(), 1);
    }

    #[test]
    fn eviction_with_backend_refetches_metadata() {
        let (_, c) = backed(CacheConfig {
            max_size: 8,
            ..Default::default()
        });
        c.make_bucket("foo", "").unwrap();
        put(&c, "foo", "a", b"12345");
        put(&c, "foo", "b", b"67890");
        read(&c, "foo", "a");
        read(&c, "foo", "b");
        assert_eq!(c.get_object_metadata("foo", "a").unwrap().size, 5);
    }

    #[test]
    fn backend_listing_is_sorted() {
        let (_, c) = backed(CacheConfig::default());
        c.make_bucket("foo", "").unwrap();
        for name in ["c", "a", "b"] {
            put(&c, "foo", name, b"x");
        }
        let params = ListObjectsParams {
            max_keys: 10,
            ..Default::default()
        };
        let names: Vec<_> = c
            .list_objects("foo", &params)
            .unwrap()
            .objects
            .into_iter()
            .map(|o| o.object)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
