use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use s3dag_cache::{BucketMetadata, CacheError, ListObjectsParams, ObjectCache};
use s3dag_ledger::{Ledger, LedgerError, MultipartUpload};
use s3dag_store::{ContentStore, StoreError};
use s3dag_types::{ContentHash, ErrorKind};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::layer::{
    ByteRange, CompletePart, ListObjectsInfo, ObjectDeletion, ObjectInfo, ObjectLayer, PartInfo,
    PutObjectOptions, MAX_PART_NUMBER,
};

/// Objects fetched per listing page during a walk.
const WALK_PAGE_SIZE: usize = 1000;
/// Objects buffered between a walk and its consumer.
const WALK_BUFFER: usize = 256;

/// Per-key locks that serialize overwrites of the same object.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    /// Run `f` while holding the lock for `key`. Blocks.
    fn with<T>(&self, key: String, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(self.locks.lock().entry(key.clone()).or_default());
        let result = {
            let _held = lock.lock();
            f()
        };
        let mut locks = self.locks.lock();
        // map plus ours: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
        result
    }
}

/// Storage layer over the object cache and the ledger.
///
/// Object data goes through the cache, which writes through to its
/// persistent backend when it has one. Multipart parts are stored as blobs
/// in the content store and tracked by the ledger until completion
/// assembles them into a regular object.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Gateway {
    cache: Arc<ObjectCache>,
    ledger: Arc<Ledger>,
    store: Arc<dyn ContentStore>,
    writes: Arc<KeyLocks>,
}

impl Gateway {
    pub fn new(cache: Arc<ObjectCache>, ledger: Arc<Ledger>, store: Arc<dyn ContentStore>) -> Self {
        Self {
            cache,
            ledger,
            store,
            writes: Arc::new(KeyLocks::default()),
        }
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Without a persistent backend nothing else registers buckets with the
    /// ledger, and multipart sessions need the ledger to know the bucket.
    fn registers_buckets(&self) -> bool {
        self.cache.backing().backend().is_none()
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    fn make_bucket_blocking(&self, bucket: &str, acl: &str) -> GatewayResult<()> {
        self.cache.make_bucket(bucket, acl)?;
        if self.registers_buckets() {
            match self.ledger.new_bucket(bucket, ContentHash::null()) {
                Ok(()) | Err(LedgerError::BucketExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn delete_bucket_blocking(&self, bucket: &str) -> GatewayResult<()> {
        self.cache.delete_bucket(bucket)?;
        if self.registers_buckets() {
            match self.ledger.delete_bucket(bucket) {
                Ok(()) | Err(LedgerError::BucketDoesNotExist(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    fn get_object_blocking(
        &self,
        bucket: &str,
        object: &str,
        range: Option<ByteRange>,
    ) -> GatewayResult<Bytes> {
        let mut out = Vec::new();
        match range {
            None => self.cache.get_object(&mut out, bucket, object)?,
            Some(r) => self
                .cache
                .get_partial_object(&mut out, bucket, object, r.start, r.length)?,
        };
        Ok(Bytes::from(out))
    }

    /// Store `data` as `bucket/object`, replacing any existing object.
    ///
    /// Replacement is delete-then-create: a failed overwrite leaves the key
    /// absent rather than restoring the old bytes. Concurrent puts of one key
    /// take turns, so the last to run wins.
    fn put_object_blocking(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        opts: &PutObjectOptions,
    ) -> GatewayResult<ObjectInfo> {
        let key = format!("{bucket}/{object}");
        self.writes
            .with(key, || self.replace_object(bucket, object, data, opts))
    }

    fn replace_object(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        opts: &PutObjectOptions,
    ) -> GatewayResult<ObjectInfo> {
        match self.cache.delete_object(bucket, object) {
            Ok(()) => tracing::debug!(bucket = %bucket, object = %object, "replacing object"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut metadata = self.cache.create_object(
            bucket,
            object,
            &opts.content_type,
            &opts.content_md5,
            data.len() as u64,
            data,
        )?;
        if !opts.user_tags.is_empty() {
            metadata = self
                .cache
                .put_object_tags(bucket, object, opts.user_tags.clone())?;
        }
        Ok(metadata.into())
    }

    fn delete_objects_blocking(
        &self,
        bucket: &str,
        objects: &[String],
    ) -> GatewayResult<Vec<ObjectDeletion>> {
        self.cache.get_bucket_metadata(bucket)?;
        Ok(objects
            .iter()
            .map(|object| ObjectDeletion {
                object: object.clone(),
                result: self
                    .cache
                    .delete_object(bucket, object)
                    .map_err(GatewayError::from),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Multipart
    // -----------------------------------------------------------------------

    fn new_multipart_upload_blocking(&self, bucket: &str, object: &str) -> GatewayResult<String> {
        self.cache.get_bucket_metadata(bucket)?;
        if !s3dag_types::is_valid_object_name(object) {
            return Err(CacheError::ObjectNameInvalid(object.to_string()).into());
        }
        let id = Uuid::now_v7().to_string();
        self.ledger.new_multipart_upload(bucket, object, &id)?;
        tracing::info!(bucket = %bucket, object = %object, upload_id = %id, "multipart upload started");
        Ok(id)
    }

    /// The session `id`, which must be for `bucket/object`.
    fn upload_for(&self, bucket: &str, object: &str, id: &str) -> GatewayResult<MultipartUpload> {
        let upload = self.ledger.get_multipart_upload(id)?;
        if upload.bucket != bucket || upload.object != object {
            return Err(LedgerError::InvalidUploadId(id.to_string()).into());
        }
        Ok(upload)
    }

    fn put_object_part_blocking(
        &self,
        bucket: &str,
        object: &str,
        id: &str,
        part_number: u32,
        data: &[u8],
    ) -> GatewayResult<PartInfo> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(GatewayError::InvalidPart {
                upload_id: id.to_string(),
                part_number,
            });
        }
        self.upload_for(bucket, object, id)?;
        let hash = self.store.put(data)?;
        self.ledger
            .put_object_part(bucket, object, hash, id, part_number)?;
        tracing::debug!(upload_id = %id, part_number, size = data.len(), "part stored");
        Ok(PartInfo {
            part_number,
            etag: hex::encode(Md5::digest(data)),
            size: data.len() as u64,
        })
    }

    fn read_part(&self, hash: &ContentHash) -> GatewayResult<Vec<u8>> {
        let part = self.store.read(hash)?.ok_or(StoreError::NotFound(*hash))?;
        Ok(part.data)
    }

    fn list_object_parts_blocking(
        &self,
        bucket: &str,
        object: &str,
        id: &str,
    ) -> GatewayResult<Vec<PartInfo>> {
        let upload = self.upload_for(bucket, object, id)?;
        upload
            .parts
            .iter()
            .map(|part| {
                let data = self.read_part(&part.data_hash)?;
                Ok(PartInfo {
                    part_number: part.number,
                    etag: hex::encode(Md5::digest(&data)),
                    size: data.len() as u64,
                })
            })
            .collect()
    }

    fn abort_multipart_upload_blocking(
        &self,
        bucket: &str,
        object: &str,
        id: &str,
    ) -> GatewayResult<()> {
        self.upload_for(bucket, object, id)?;
        self.ledger.abort_multipart_upload(bucket, id)?;
        tracing::info!(bucket = %bucket, object = %object, upload_id = %id, "multipart upload aborted");
        Ok(())
    }

    /// Concatenate the named parts into `bucket/object`.
    ///
    /// Parts must be listed in ascending order and each etag must match the
    /// stored part. The session stays open if assembly fails.
    fn complete_multipart_upload_blocking(
        &self,
        bucket: &str,
        object: &str,
        id: &str,
        parts: &[CompletePart],
    ) -> GatewayResult<ObjectInfo> {
        let upload = self.upload_for(bucket, object, id)?;
        let invalid = |part_number| GatewayError::InvalidPart {
            upload_id: id.to_string(),
            part_number,
        };
        if parts.is_empty() {
            return Err(invalid(0));
        }

        let mut data = Vec::new();
        let mut previous = 0;
        for requested in parts {
            if requested.part_number <= previous {
                return Err(invalid(requested.part_number));
            }
            previous = requested.part_number;
            let stored = upload
                .parts
                .iter()
                .find(|p| p.number == requested.part_number)
                .ok_or_else(|| invalid(requested.part_number))?;
            let bytes = self.read_part(&stored.data_hash)?;
            if hex::encode(Md5::digest(&bytes)) != requested.etag.trim_matches('"') {
                return Err(invalid(requested.part_number));
            }
            data.extend_from_slice(&bytes);
        }

        let info = self.put_object_blocking(bucket, object, &data, &PutObjectOptions::default())?;
        self.ledger.complete_multipart_upload(bucket, id)?;
        tracing::info!(
            bucket = %bucket,
            object = %object,
            upload_id = %id,
            parts = parts.len(),
            size = info.size,
            "multipart upload completed"
        );
        Ok(info)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("cache", &self.cache)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

/// Run cache or ledger work off the async executor.
async fn blocking<T, F>(task: F) -> GatewayResult<T>
where
    F: FnOnce() -> GatewayResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| GatewayError::Task(e.to_string()))?
}

#[async_trait]
impl ObjectLayer for Gateway {
    async fn make_bucket(&self, bucket: &str, acl: &str) -> GatewayResult<()> {
        let (gw, bucket, acl) = (self.clone(), bucket.to_string(), acl.to_string());
        blocking(move || gw.make_bucket_blocking(&bucket, &acl)).await
    }

    async fn get_bucket_info(&self, bucket: &str) -> GatewayResult<BucketMetadata> {
        let (gw, bucket) = (self.clone(), bucket.to_string());
        blocking(move || Ok(gw.cache.get_bucket_metadata(&bucket)?)).await
    }

    async fn set_bucket_acl(&self, bucket: &str, acl: &str) -> GatewayResult<()> {
        let (gw, bucket, acl) = (self.clone(), bucket.to_string(), acl.to_string());
        blocking(move || Ok(gw.cache.set_bucket_metadata(&bucket, &acl)?)).await
    }

    async fn list_buckets(&self) -> GatewayResult<Vec<BucketMetadata>> {
        let gw = self.clone();
        blocking(move || Ok(gw.cache.list_buckets()?)).await
    }

    async fn delete_bucket(&self, bucket: &str) -> GatewayResult<()> {
        let (gw, bucket) = (self.clone(), bucket.to_string());
        blocking(move || gw.delete_bucket_blocking(&bucket)).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> GatewayResult<ListObjectsInfo> {
        let (gw, bucket, params) = (self.clone(), bucket.to_string(), params.clone());
        let result = blocking(move || Ok(gw.cache.list_objects(&bucket, &params)?)).await?;
        Ok(ListObjectsInfo {
            objects: result.objects.into_iter().map(ObjectInfo::from).collect(),
            prefixes: result.common_prefixes,
            is_truncated: result.is_truncated,
            next_marker: result.next_marker,
        })
    }

    async fn walk(&self, bucket: &str, prefix: &str) -> GatewayResult<mpsc::Receiver<ObjectInfo>> {
        self.get_bucket_info(bucket).await?;
        let (tx, rx) = mpsc::channel(WALK_BUFFER);
        let gw = self.clone();
        let bucket = bucket.to_string();
        let mut params = ListObjectsParams {
            prefix: prefix.to_string(),
            max_keys: WALK_PAGE_SIZE,
            ..Default::default()
        };
        tokio::spawn(async move {
            loop {
                let page = match gw.list_objects(&bucket, &params).await {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::warn!(bucket = %bucket, error = %e, "walk aborted");
                        return;
                    }
                };
                let last = page.objects.last().map(|o| o.name.clone());
                for info in page.objects {
                    if tx.send(info).await.is_err() {
                        return;
                    }
                }
                match last {
                    Some(last) if page.is_truncated => params.marker = last,
                    _ => return,
                }
            }
        });
        Ok(rx)
    }

    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        range: Option<ByteRange>,
    ) -> GatewayResult<Bytes> {
        let (gw, bucket, object) = (self.clone(), bucket.to_string(), object.to_string());
        blocking(move || gw.get_object_blocking(&bucket, &object, range)).await
    }

    async fn get_object_info(&self, bucket: &str, object: &str) -> GatewayResult<ObjectInfo> {
        let (gw, bucket, object) = (self.clone(), bucket.to_string(), object.to_string());
        blocking(move || Ok(gw.cache.get_object_metadata(&bucket, &object)?.into())).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: Bytes,
        opts: PutObjectOptions,
    ) -> GatewayResult<ObjectInfo> {
        let (gw, bucket, object) = (self.clone(), bucket.to_string(), object.to_string());
        blocking(move || gw.put_object_blocking(&bucket, &object, &data, &opts)).await
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> GatewayResult<()> {
        let (gw, bucket, object) = (self.clone(), bucket.to_string(), object.to_string());
        blocking(move || Ok(gw.cache.delete_object(&bucket, &object)?)).await
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[String],
    ) -> GatewayResult<Vec<ObjectDeletion>> {
        let (gw, bucket, objects) = (self.clone(), bucket.to_string(), objects.to_vec());
        blocking(move || gw.delete_objects_blocking(&bucket, &objects)).await
    }

    async fn new_multipart_upload(&self, bucket: &str, object: &str) -> GatewayResult<String> {
        let (gw, bucket, object) = (self.clone(), bucket.to_string(), object.to_string());
        blocking(move || gw.new_multipart_upload_blocking(&bucket, &object)).await
    }

    async fn put_object_part(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> GatewayResult<PartInfo> {
        let (gw, bucket, object, id) = (
            self.clone(),
            bucket.to_string(),
            object.to_string(),
            upload_id.to_string(),
        );
        blocking(move || gw.put_object_part_blocking(&bucket, &object, &id, part_number, &data))
            .await
    }

    async fn list_object_parts(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> GatewayResult<Vec<PartInfo>> {
        let (gw, bucket, object, id) = (
            self.clone(),
            bucket.to_string(),
            object.to_string(),
            upload_id.to_string(),
        );
        blocking(move || gw.list_object_parts_blocking(&bucket, &object, &id)).await
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> GatewayResult<()> {
        let (gw, bucket, object, id) = (
            self.clone(),
            bucket.to_string(),
            object.to_string(),
            upload_id.to_string(),
        );
        blocking(move || gw.abort_multipart_upload_blocking(&bucket, &object, &id)).await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        parts: &[CompletePart],
    ) -> GatewayResult<ObjectInfo> {
        let (gw, bucket, object, id, parts) = (
            self.clone(),
            bucket.to_string(),
            object.to_string(),
            upload_id.to_string(),
            parts.to_vec(),
        );
        blocking(move || gw.complete_multipart_upload_blocking(&bucket, &object, &id, &parts))
            .await
    }

    async fn put_object_tags(
        &self,
        bucket: &str,
        object: &str,
        tags: BTreeMap<String, String>,
    ) -> GatewayResult<ObjectInfo> {
        let (gw, bucket, object) = (self.clone(), bucket.to_string(), object.to_string());
        blocking(move || Ok(gw.cache.put_object_tags(&bucket, &object, tags)?.into())).await
    }

    async fn get_object_tags(
        &self,
        bucket: &str,
        object: &str,
    ) -> GatewayResult<BTreeMap<String, String>> {
        let (gw, bucket, object) = (self.clone(), bucket.to_string(), object.to_string());
        blocking(move || Ok(gw.cache.get_object_tags(&bucket, &object)?)).await
    }

    async fn delete_object_tags(&self, bucket: &str, object: &str) -> GatewayResult<()> {
        let (gw, bucket, object) = (self.clone(), bucket.to_string(), object.to_string());
        blocking(move || Ok(gw.cache.delete_object_tags(&bucket, &object)?)).await
    }
}
