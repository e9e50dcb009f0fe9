//! Unsynchronized ledger core.
//!
//! Nothing in this module locks. Every method assumes the caller holds the
//! [`Ledger`](crate::Ledger) lock (shared for `&self`, exclusive for
//! `&mut self`).

use std::collections::HashMap;
use std::sync::Arc;

use s3dag_store::{BucketTree, ContentStore, Datastore, StoreError};

use crate::error::{LedgerError, LedgerResult};
use crate::records::{bucket_key, LedgerBucketEntry, MultipartUpload, BUCKET_KEY_PREFIX};

pub(crate) struct LedgerState {
    pub(crate) buckets: HashMap<String, LedgerBucketEntry>,
    pub(crate) uploads: HashMap<String, MultipartUpload>,
    pub(crate) closed: bool,
    store: Arc<dyn ContentStore>,
    datastore: Arc<dyn Datastore>,
}

impl LedgerState {
    pub(crate) fn new(store: Arc<dyn ContentStore>, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            buckets: HashMap::new(),
            uploads: HashMap::new(),
            closed: false,
            store,
            datastore,
        }
    }

    pub(crate) fn check_open(&self) -> LedgerResult<()> {
        if self.closed {
            return Err(LedgerError::Closed);
        }
        Ok(())
    }

    /// Resolve a bucket entry, loading its persisted record on first use.
    pub(crate) fn load_bucket(&mut self, name: &str) -> LedgerResult<Option<&mut LedgerBucketEntry>> {
        if !self.buckets.contains_key(name) {
            let Some(raw) = self.datastore.get(&bucket_key(name))? else {
                return Ok(None);
            };
            let mut entry: LedgerBucketEntry = serde_json::from_slice(&raw)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;
            entry.loaded_hash = None;
            tracing::debug!(bucket = %name, root = %entry.ipfs_hash, "loaded bucket record");
            self.buckets.insert(name.to_string(), entry);
        }
        Ok(self.buckets.get_mut(name))
    }

    pub(crate) fn bucket_exists(&mut self, name: &str) -> LedgerResult<bool> {
        Ok(self.load_bucket(name)?.is_some())
    }

    /// Like [`load_bucket`](Self::load_bucket) but absence is an error.
    pub(crate) fn require_bucket(&mut self, name: &str) -> LedgerResult<&mut LedgerBucketEntry> {
        self.load_bucket(name)?
            .ok_or_else(|| LedgerError::BucketDoesNotExist(name.to_string()))
    }

    /// Refresh a bucket's object map if it was decoded from an older root.
    ///
    /// At most one content-store read per call. A null root is an empty
    /// bucket.
    pub(crate) fn ensure_cache(&mut self, name: &str) -> LedgerResult<&LedgerBucketEntry> {
        let store = Arc::clone(&self.store);
        let entry = self.require_bucket(name)?;
        if entry.is_stale() {
            let root = entry.ipfs_hash;
            entry.objects = if root.is_null() {
                Default::default()
            } else {
                let obj = store.read(&root)?.ok_or(StoreError::NotFound(root))?;
                BucketTree::from_stored_object(&obj)?.object_map()
            };
            entry.loaded_hash = Some(root);
            tracing::debug!(
                bucket = %name,
                root = %root,
                objects = entry.objects.len(),
                "refreshed ledger bucket view"
            );
        }
        Ok(&*entry)
    }

    pub(crate) fn persist_bucket(&self, name: &str) -> LedgerResult<()> {
        let Some(entry) = self.buckets.get(name) else {
            return Err(LedgerError::BucketDoesNotExist(name.to_string()));
        };
        let raw =
            serde_json::to_vec(entry).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        self.datastore.put(&bucket_key(name), raw)?;
        Ok(())
    }

    pub(crate) fn forget_bucket(&mut self, name: &str) -> LedgerResult<()> {
        self.buckets.remove(name);
        self.datastore.delete(&bucket_key(name))?;
        self.uploads.retain(|_, upload| upload.bucket != name);
        Ok(())
    }

    pub(crate) fn bucket_names(&self) -> LedgerResult<Vec<String>> {
        Ok(self
            .datastore
            .query_keys(BUCKET_KEY_PREFIX)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(BUCKET_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    pub(crate) fn multipart_exists(&self, id: &str) -> LedgerResult<&MultipartUpload> {
        self.uploads
            .get(id)
            .ok_or_else(|| LedgerError::InvalidUploadId(id.to_string()))
    }

    /// The upload `id`, which must belong to `bucket`.
    pub(crate) fn multipart_in_bucket(
        &mut self,
        bucket: &str,
        id: &str,
    ) -> LedgerResult<&mut MultipartUpload> {
        match self.uploads.get_mut(id) {
            Some(upload) if upload.bucket == bucket => Ok(upload),
            _ => Err(LedgerError::InvalidUploadId(id.to_string())),
        }
    }

    pub(crate) fn delete_multipart_id(&mut self, id: &str) -> Option<MultipartUpload> {
        self.uploads.remove(id)
    }

    pub(crate) fn close_datastore(&mut self) -> LedgerResult<()> {
        self.closed = true;
        self.buckets.clear();
        self.datastore.close()?;
        Ok(())
    }
}
