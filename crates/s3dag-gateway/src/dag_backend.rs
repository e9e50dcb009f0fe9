//! Persistent backend over the content-addressed DAG.
//!
//! Each bucket is a [`BucketTree`] whose root hash the ledger tracks. A write
//! stores the object bytes as a blob, wraps them in an [`ObjectNode`], and
//! commits a new tree pointing at that node. Commits are serialized so two
//! writers never build on the same root.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use chrono::Utc;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use s3dag_cache::{
    plan, BucketMetadata, CacheError, CacheResult, ListObjectsParams, ListObjectsResult,
    ObjectMetadata, PersistentBackend,
};
use s3dag_ledger::{Ledger, LedgerError};
use s3dag_store::{BucketTree, ContentStore, ObjectNode, StoreError, StoreResult, StoredObject};
use s3dag_types::ContentHash;

pub struct DagBackend {
    ledger: Arc<Ledger>,
    store: Arc<dyn ContentStore>,
    commit: Mutex<()>,
}

impl DagBackend {
    pub fn new(ledger: Arc<Ledger>, store: Arc<dyn ContentStore>) -> Self {
        Self {
            ledger,
            store,
            commit: Mutex::new(()),
        }
    }

    fn read_stored(&self, bucket: &str, object: &str, hash: &ContentHash) -> CacheResult<StoredObject> {
        self.store
            .read(hash)
            .map_err(|e| CacheError::backend(bucket, object, e))?
            .ok_or_else(|| CacheError::backend(bucket, object, StoreError::NotFound(*hash)))
    }

    fn write_stored(
        &self,
        bucket: &str,
        object: &str,
        stored: StoreResult<StoredObject>,
    ) -> CacheResult<ContentHash> {
        let stored = stored.map_err(|e| CacheError::backend(bucket, object, e))?;
        self.store
            .write(&stored)
            .map_err(|e| CacheError::backend(bucket, object, e))
    }

    fn load_tree(&self, bucket: &str) -> CacheResult<BucketTree> {
        let root = self
            .ledger
            .get_bucket_hash(bucket)
            .map_err(|e| from_ledger(bucket, "", e))?;
        let stored = self.read_stored(bucket, "", &root)?;
        BucketTree::from_stored_object(&stored).map_err(|e| CacheError::backend(bucket, "", e))
    }

    fn load_node(&self, bucket: &str, object: &str, hash: &ContentHash) -> CacheResult<ObjectNode> {
        let stored = self.read_stored(bucket, object, hash)?;
        ObjectNode::from_stored_object(&stored).map_err(|e| CacheError::backend(bucket, object, e))
    }

    fn find_node(&self, bucket: &str, object: &str) -> CacheResult<ObjectNode> {
        let hash = self
            .ledger
            .get_object_hash(bucket, object)
            .map_err(|e| from_ledger(bucket, object, e))?;
        self.load_node(bucket, object, &hash)
    }

    /// Apply `change` to the bucket's current tree and commit the result as
    /// the new root.
    fn commit<T>(
        &self,
        bucket: &str,
        object: &str,
        change: impl FnOnce(&mut BucketTree) -> CacheResult<T>,
    ) -> CacheResult<T> {
        let _guard = self.commit.lock();
        let mut tree = self.load_tree(bucket)?;
        let out = change(&mut tree)?;
        let root = self.write_stored(bucket, object, tree.to_stored_object())?;
        self.ledger
            .update_bucket_hash(bucket, root)
            .map_err(|e| from_ledger(bucket, object, e))?;
        tracing::debug!(bucket = %bucket, root = %root, entries = tree.len(), "bucket root committed");
        Ok(out)
    }
}

impl PersistentBackend for DagBackend {
    fn make_bucket(&self, bucket: &str, acl: &str) -> CacheResult<BucketMetadata> {
        let _guard = self.commit.lock();
        if self
            .ledger
            .bucket_exists(bucket)
            .map_err(|e| from_ledger(bucket, "", e))?
        {
            return Err(CacheError::BucketExists(bucket.to_string()));
        }
        let tree = BucketTree::empty(bucket, acl, Utc::now());
        let root = self.write_stored(bucket, "", tree.to_stored_object())?;
        self.ledger
            .new_bucket(bucket, root)
            .map_err(|e| from_ledger(bucket, "", e))?;
        Ok(bucket_metadata(&tree))
    }

    fn get_bucket_metadata(&self, bucket: &str) -> CacheResult<BucketMetadata> {
        Ok(bucket_metadata(&self.load_tree(bucket)?))
    }

    fn set_bucket_metadata(&self, bucket: &str, acl: &str) -> CacheResult<()> {
        self.commit(bucket, "", |tree| {
            tree.acl = acl.to_string();
            Ok(())
        })
    }

    fn list_buckets(&self) -> CacheResult<Vec<BucketMetadata>> {
        let names = self
            .ledger
            .get_bucket_names()
            .map_err(|e| from_ledger("", "", e))?;
        let mut buckets = Vec::with_capacity(names.len());
        for name in names {
            match self.load_tree(&name) {
                Ok(tree) => buckets.push(bucket_metadata(&tree)),
                // Deleted between the name scan and the load.
                Err(CacheError::BucketNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(buckets)
    }

    fn delete_bucket(&self, bucket: &str) -> CacheResult<()> {
        let _guard = self.commit.lock();
        if !self.load_tree(bucket)?.is_empty() {
            return Err(CacheError::BucketNotEmpty(bucket.to_string()));
        }
        self.ledger
            .delete_bucket(bucket)
            .map_err(|e| from_ledger(bucket, "", e))
    }

    fn put_object(
        &self,
        bucket: &str,
        object: &str,
        content_type: &str,
        expected_md5: Option<&str>,
        data: &mut dyn Read,
    ) -> CacheResult<ObjectMetadata> {
        if !self
            .ledger
            .bucket_exists(bucket)
            .map_err(|e| from_ledger(bucket, object, e))?
        {
            return Err(CacheError::BucketNotFound(bucket.to_string()));
        }

        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes).map_err(|source| CacheError::Io {
            bucket: bucket.to_string(),
            object: object.to_string(),
            source,
        })?;
        let md5 = hex::encode(Md5::digest(&bytes));
        if let Some(expected) = expected_md5 {
            if expected != md5 {
                return Err(CacheError::BadDigest {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    expected: expected.to_string(),
                    actual: md5,
                });
            }
        }

        let blob = self
            .store
            .put(&bytes)
            .map_err(|e| CacheError::backend(bucket, object, e))?;
        let node = ObjectNode {
            name: object.to_string(),
            data: blob,
            size: bytes.len() as u64,
            md5,
            content_type: content_type.to_string(),
            created: Utc::now(),
            user_tags: BTreeMap::new(),
        };
        let node_hash = self.write_stored(bucket, object, node.to_stored_object())?;
        self.commit(bucket, object, |tree| {
            tree.upsert(object, node_hash);
            Ok(())
        })?;
        tracing::debug!(bucket = %bucket, object = %object, blob = %blob, size = node.size, "object written to DAG");
        Ok(object_metadata(bucket, node))
    }

    fn get_object(&self, bucket: &str, object: &str) -> CacheResult<(Box<dyn Read + Send>, u64)> {
        let node = self.find_node(bucket, object)?;
        let reader = self
            .store
            .open(&node.data)
            .map_err(|e| CacheError::backend(bucket, object, e))?;
        Ok((reader, node.size))
    }

    fn get_object_metadata(&self, bucket: &str, object: &str) -> CacheResult<ObjectMetadata> {
        Ok(object_metadata(bucket, self.find_node(bucket, object)?))
    }

    fn list_objects(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> CacheResult<ListObjectsResult> {
        let hashes = self
            .ledger
            .get_object_hashes(bucket)
            .map_err(|e| from_ledger(bucket, "", e))?;
        let keys: Vec<String> = hashes.keys().map(|name| format!("{bucket}/{name}")).collect();
        let listing = plan(bucket, keys.iter().map(String::as_str), params);

        let mut objects = Vec::with_capacity(listing.objects.len());
        for name in &listing.objects {
            let hash = hashes.get(name).ok_or_else(|| CacheError::ObjectNotFound {
                bucket: bucket.to_string(),
                object: name.clone(),
            })?;
            objects.push(object_metadata(bucket, self.load_node(bucket, name, hash)?));
        }
        Ok(ListObjectsResult {
            objects,
            common_prefixes: listing.common_prefixes,
            is_truncated: listing.is_truncated,
            next_marker: listing.next_marker,
        })
    }

    fn delete_object(&self, bucket: &str, object: &str) -> CacheResult<()> {
        self.commit(bucket, object, |tree| {
            if tree.remove(object) {
                Ok(())
            } else {
                Err(CacheError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                })
            }
        })
    }

    fn set_object_tags(
        &self,
        bucket: &str,
        object: &str,
        tags: BTreeMap<String, String>,
    ) -> CacheResult<ObjectMetadata> {
        self.commit(bucket, object, |tree| {
            let current = tree
                .get(object)
                .map(|entry| entry.hash)
                .ok_or_else(|| CacheError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                })?;
            let mut node = self.load_node(bucket, object, &current)?;
            node.user_tags = tags;
            let node_hash = self.write_stored(bucket, object, node.to_stored_object())?;
            tree.upsert(object, node_hash);
            Ok(object_metadata(bucket, node))
        })
    }
}

impl std::fmt::Debug for DagBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagBackend")
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

fn bucket_metadata(tree: &BucketTree) -> BucketMetadata {
    BucketMetadata {
        name: tree.name.clone(),
        created: tree.created,
        acl: tree.acl.clone(),
    }
}

fn object_metadata(bucket: &str, node: ObjectNode) -> ObjectMetadata {
    ObjectMetadata {
        bucket: bucket.to_string(),
        object: node.name,
        content_type: node.content_type,
        created: node.created,
        md5: node.md5,
        size: node.size,
        user_tags: node.user_tags,
    }
}

/// Translate absence and collisions into the cache's vocabulary; anything
/// else is a backend failure.
fn from_ledger(bucket: &str, object: &str, err: LedgerError) -> CacheError {
    match err {
        LedgerError::BucketDoesNotExist(name) => CacheError::BucketNotFound(name),
        LedgerError::BucketExists(name) => CacheError::BucketExists(name),
        LedgerError::ObjectDoesNotExist { bucket, object } => {
            CacheError::ObjectNotFound { bucket, object }
        }
        other => CacheError::backend(bucket, object, other),
    }
}
