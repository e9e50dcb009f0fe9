use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use s3dag_types::{ContentHash, ContentHasher};

use crate::error::{StoreError, StoreResult};

/// The kind of object stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Raw object data (or a multipart part).
    Blob,
    /// Bucket root: sorted entries mapping object names to object nodes.
    Bucket,
    /// Per-object metadata node.
    Object,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blob => write!(f, "blob"),
            Self::Bucket => write!(f, "bucket"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// A stored object: kind tag + serialized data + cached size.
///
/// `StoredObject` is the unit of storage. The store never interprets the
/// contents of the data; it is a pure key-value store keyed by content hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
    pub size: u64,
}

impl StoredObject {
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self { kind, data, size }
    }

    /// Wrap raw bytes as a blob.
    pub fn blob(data: Vec<u8>) -> Self {
        Self::new(ObjectKind::Blob, data)
    }

    /// Compute the content-addressed hash for this object.
    pub fn compute_hash(&self) -> ContentHash {
        let hasher = match self.kind {
            ObjectKind::Blob => &ContentHasher::BLOB,
            ObjectKind::Bucket => &ContentHasher::BUCKET,
            ObjectKind::Object => &ContentHasher::OBJECT,
        };
        hasher.hash(&self.data)
    }

    fn expect_kind(&self, kind: ObjectKind) -> StoreResult<()> {
        if self.kind != kind {
            return Err(StoreError::CorruptObject {
                hash: self.compute_hash(),
                reason: format!("expected {kind}, got {}", self.kind),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BucketTree
// ---------------------------------------------------------------------------

/// A single entry in a bucket tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Object name within the bucket.
    pub name: String,
    /// Hash of the [`ObjectNode`] describing the object.
    pub hash: ContentHash,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, hash: ContentHash) -> Self {
        Self {
            name: name.into(),
            hash,
        }
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

/// Root node of a bucket.
///
/// A bucket's current state is exactly one `BucketTree`; every write
/// produces a new tree and a new root hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTree {
    pub name: String,
    pub acl: String,
    pub created: DateTime<Utc>,
    /// Sorted by name for deterministic hashing.
    pub entries: Vec<TreeEntry>,
}

impl BucketTree {
    /// Create an empty bucket tree.
    pub fn empty(name: impl Into<String>, acl: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            acl: acl.into(),
            created,
            entries: Vec::new(),
        }
    }

    /// Look up an entry by object name.
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Insert or replace the entry for `name`, keeping entries sorted.
    pub fn upsert(&mut self, name: &str, hash: ContentHash) {
        match self.entries.binary_search_by(|e| e.name.as_str().cmp(name)) {
            Ok(i) => self.entries[i].hash = hash,
            Err(i) => self.entries.insert(i, TreeEntry::new(name, hash)),
        }
    }

    /// Remove the entry for `name`. Returns `true` if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.entries.binary_search_by(|e| e.name.as_str().cmp(name)) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object name to object-node hash, as the ledger indexes it.
    pub fn object_map(&self) -> BTreeMap<String, ContentHash> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.hash))
            .collect()
    }

    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        let data =
            serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(StoredObject::new(ObjectKind::Bucket, data))
    }

    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        obj.expect_kind(ObjectKind::Bucket)?;
        serde_json::from_slice(&obj.data).map_err(|e| StoreError::CorruptObject {
            hash: obj.compute_hash(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// ObjectNode
// ---------------------------------------------------------------------------

/// Metadata node for one object; points at the blob holding its bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNode {
    pub name: String,
    /// Hash of the data blob.
    pub data: ContentHash,
    pub size: u64,
    /// Hex-encoded MD5 of the data (the S3 ETag).
    pub md5: String,
    pub content_type: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub user_tags: BTreeMap<String, String>,
}

impl ObjectNode {
    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        let data =
            serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(StoredObject::new(ObjectKind::Object, data))
    }

    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        obj.expect_kind(ObjectKind::Object)?;
        serde_json::from_slice(&obj.data).map_err(|e| StoreError::CorruptObject {
            hash: obj.compute_hash(),
            reason: e.to_string(),
        })
    }
}
