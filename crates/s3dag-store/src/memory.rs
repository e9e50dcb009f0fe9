use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use s3dag_types::ContentHash;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;
use crate::traits::{ContentStore, Datastore};

/// In-memory, HashMap-based content store.
///
/// Intended for tests and single-node deployments. Objects are cloned on
/// read and write.
pub struct InMemoryContentStore {
    objects: RwLock<HashMap<ContentHash, StoredObject>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|obj| obj.size)
            .sum()
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryContentStore {
    fn read(&self, hash: &ContentHash) -> StoreResult<Option<StoredObject>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(hash).cloned())
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ContentHash> {
        let hash = object.compute_hash();
        if hash.is_null() {
            return Err(StoreError::NullHash);
        }
        let mut map = self.objects.write().expect("lock poisoned");
        map.entry(hash).or_insert_with(|| object.clone());
        Ok(hash)
    }

    fn exists(&self, hash: &ContentHash) -> StoreResult<bool> {
        Ok(self.objects.read().expect("lock poisoned").contains_key(hash))
    }

    fn delete(&self, hash: &ContentHash) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(hash).is_some())
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("object_count", &self.len())
            .finish()
    }
}

/// In-memory [`Datastore`] backed by an ordered map.
#[derive(Default)]
pub struct InMemoryDatastore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Datastore for InMemoryDatastore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.entries.read().expect("lock poisoned").get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.check_open()?;
        self.entries
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check_open()?;
        Ok(self
            .entries
            .write()
            .expect("lock poisoned")
            .remove(key)
            .is_some())
    }

    fn query_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_open()?;
        let map = self.entries.read().expect("lock poisoned");
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("in-memory datastore closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDatastore")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
