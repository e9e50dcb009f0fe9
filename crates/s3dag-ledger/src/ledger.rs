use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use s3dag_store::{ContentStore, Datastore};
use s3dag_types::ContentHash;

use crate::error::{LedgerError, LedgerResult};
use crate::records::{LedgerBucketEntry, MultipartUpload, ObjectPartInfo};
use crate::state::LedgerState;

/// Synchronized ledger facade.
///
/// One coarse reader/writer lock guards the whole ledger. Each public method
/// acquires it once and releases it on return; nothing inside holds it
/// across a call back into this type.
pub struct Ledger {
    inner: RwLock<LedgerState>,
}

impl Ledger {
    pub fn new(store: Arc<dyn ContentStore>, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            inner: RwLock::new(LedgerState::new(store, datastore)),
        }
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, LedgerState>> {
        let state = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        state.check_open()?;
        Ok(state)
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, LedgerState>> {
        let state = self.inner.write().map_err(|_| LedgerError::LockPoisoned)?;
        state.check_open()?;
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    /// Start tracking `name` with root `hash`.
    pub fn new_bucket(&self, name: &str, hash: ContentHash) -> LedgerResult<()> {
        let mut state = self.write()?;
        if state.bucket_exists(name)? {
            return Err(LedgerError::BucketExists(name.to_string()));
        }
        state
            .buckets
            .insert(name.to_string(), LedgerBucketEntry::new(name, hash));
        if let Err(e) = state.persist_bucket(name) {
            state.buckets.remove(name);
            return Err(e);
        }
        tracing::info!(bucket = %name, root = %hash, "ledger bucket created");
        Ok(())
    }

    /// Point `name` at a newly committed root.
    pub fn update_bucket_hash(&self, name: &str, hash: ContentHash) -> LedgerResult<()> {
        let mut state = self.write()?;
        let previous = std::mem::replace(&mut state.require_bucket(name)?.ipfs_hash, hash);
        if let Err(e) = state.persist_bucket(name) {
            if let Some(entry) = state.buckets.get_mut(name) {
                entry.ipfs_hash = previous;
            }
            return Err(e);
        }
        tracing::debug!(bucket = %name, root = %hash, "ledger bucket root updated");
        Ok(())
    }

    /// Stop tracking `name`, dropping any uploads still open against it.
    pub fn delete_bucket(&self, name: &str) -> LedgerResult<()> {
        let mut state = self.write()?;
        if !state.bucket_exists(name)? {
            return Err(LedgerError::BucketDoesNotExist(name.to_string()));
        }
        state.forget_bucket(name)?;
        tracing::info!(bucket = %name, "ledger bucket deleted");
        Ok(())
    }

    pub fn bucket_exists(&self, name: &str) -> LedgerResult<bool> {
        self.write()?.bucket_exists(name)
    }

    /// The current root hash of `name`.
    pub fn get_bucket_hash(&self, name: &str) -> LedgerResult<ContentHash> {
        Ok(self.write()?.require_bucket(name)?.ipfs_hash)
    }

    /// Every tracked bucket name, read from the datastore.
    pub fn get_bucket_names(&self) -> LedgerResult<Vec<String>> {
        self.read()?.bucket_names()
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// Hash of the object node for `bucket/object`.
    pub fn get_object_hash(&self, bucket: &str, object: &str) -> LedgerResult<ContentHash> {
        let mut state = self.write()?;
        let entry = state.ensure_cache(bucket)?;
        entry
            .objects
            .get(object)
            .copied()
            .ok_or_else(|| LedgerError::ObjectDoesNotExist {
                bucket: bucket.to_string(),
                object: object.to_string(),
            })
    }

    /// Snapshot of the object map of `bucket`.
    pub fn get_object_hashes(&self, bucket: &str) -> LedgerResult<BTreeMap<String, ContentHash>> {
        let mut state = self.write()?;
        Ok(state.ensure_cache(bucket)?.objects.clone())
    }

    // -----------------------------------------------------------------------
    // Multipart uploads
    // -----------------------------------------------------------------------

    /// Open a multipart session under a caller-chosen `id`.
    ///
    /// Session state lives only in memory.
    pub fn new_multipart_upload(&self, bucket: &str, object: &str, id: &str) -> LedgerResult<()> {
        let mut state = self.write()?;
        if !state.bucket_exists(bucket)? {
            return Err(LedgerError::BucketDoesNotExist(bucket.to_string()));
        }
        if state.uploads.contains_key(id) {
            return Err(LedgerError::UploadIdExists(id.to_string()));
        }
        state
            .uploads
            .insert(id.to_string(), MultipartUpload::new(id, bucket, object));
        tracing::debug!(bucket = %bucket, object = %object, upload_id = %id, "multipart upload opened");
        Ok(())
    }

    pub fn put_object_part(
        &self,
        bucket: &str,
        object: &str,
        part_hash: ContentHash,
        id: &str,
        part_number: u32,
    ) -> LedgerResult<()> {
        let mut state = self.write()?;
        if !state.bucket_exists(bucket)? {
            return Err(LedgerError::BucketDoesNotExist(bucket.to_string()));
        }
        let upload = state.multipart_in_bucket(bucket, id)?;
        if upload.object != object {
            return Err(LedgerError::InvalidUploadId(id.to_string()));
        }
        upload.put_part(part_number, part_hash);
        Ok(())
    }

    pub fn abort_multipart_upload(&self, bucket: &str, id: &str) -> LedgerResult<()> {
        let mut state = self.write()?;
        if !state.bucket_exists(bucket)? {
            return Err(LedgerError::BucketDoesNotExist(bucket.to_string()));
        }
        state.multipart_in_bucket(bucket, id)?;
        state.delete_multipart_id(id);
        tracing::debug!(bucket = %bucket, upload_id = %id, "multipart upload aborted");
        Ok(())
    }

    /// Close the session and hand back its parts in part-number order.
    pub fn complete_multipart_upload(
        &self,
        bucket: &str,
        id: &str,
    ) -> LedgerResult<MultipartUpload> {
        let mut state = self.write()?;
        if !state.bucket_exists(bucket)? {
            return Err(LedgerError::BucketDoesNotExist(bucket.to_string()));
        }
        state.multipart_in_bucket(bucket, id)?;
        state
            .delete_multipart_id(id)
            .ok_or_else(|| LedgerError::InvalidUploadId(id.to_string()))
    }

    pub fn get_object_parts(&self, id: &str) -> LedgerResult<Vec<ObjectPartInfo>> {
        Ok(self.read()?.multipart_exists(id)?.parts.clone())
    }

    pub fn get_multipart_upload(&self, id: &str) -> LedgerResult<MultipartUpload> {
        Ok(self.read()?.multipart_exists(id)?.clone())
    }

    /// `Ok(())` if `id` names an open session, `InvalidUploadId` otherwise.
    pub fn multipart_id_exists(&self, id: &str) -> LedgerResult<()> {
        self.read()?.multipart_exists(id).map(|_| ())
    }

    /// Part data hashes of session `id` in part-number order.
    pub fn get_multipart_hashes(&self, bucket: &str, id: &str) -> LedgerResult<Vec<ContentHash>> {
        let mut state = self.write()?;
        if !state.bucket_exists(bucket)? {
            return Err(LedgerError::BucketDoesNotExist(bucket.to_string()));
        }
        let upload = state.multipart_in_bucket(bucket, id)?;
        Ok(upload.parts.iter().map(|p| p.data_hash).collect())
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Release the datastore. Later calls fail with [`LedgerError::Closed`].
    pub fn close(&self) -> LedgerResult<()> {
        let mut state = self.inner.write().map_err(|_| LedgerError::LockPoisoned)?;
        if state.closed {
            return Ok(());
        }
        state.close_datastore()?;
        tracing::info!("ledger closed");
        Ok(())
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}
