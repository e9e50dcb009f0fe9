use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use s3dag_types::ContentHash;

/// Datastore namespace holding one record per bucket.
pub const BUCKET_KEY_PREFIX: &str = "/buckets/";

/// Datastore key for a bucket record.
pub fn bucket_key(name: &str) -> String {
    format!("{BUCKET_KEY_PREFIX}{name}")
}

/// Ledger view of one bucket.
///
/// `ipfs_hash` is the current root of the bucket's DAG. `objects` is the
/// object map decoded from the root it was last refreshed against
/// (`loaded_hash`); an absent object name means "not known to this view",
/// not "does not exist".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerBucketEntry {
    #[serde(default)]
    pub objects: BTreeMap<String, ContentHash>,
    pub name: String,
    pub ipfs_hash: ContentHash,
    #[serde(skip)]
    pub loaded_hash: Option<ContentHash>,
}

impl LedgerBucketEntry {
    pub fn new(name: impl Into<String>, ipfs_hash: ContentHash) -> Self {
        Self {
            objects: BTreeMap::new(),
            name: name.into(),
            ipfs_hash,
            loaded_hash: None,
        }
    }

    /// `true` when the object map was not decoded from the current root.
    pub fn is_stale(&self) -> bool {
        self.loaded_hash != Some(self.ipfs_hash)
    }
}

/// One uploaded part of a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPartInfo {
    pub number: u32,
    pub data_hash: ContentHash,
}

/// An in-flight multipart upload session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUpload {
    pub id: String,
    pub bucket: String,
    pub object: String,
    /// Ordered by part number, one entry per number.
    pub parts: Vec<ObjectPartInfo>,
}

impl MultipartUpload {
    pub fn new(id: impl Into<String>, bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bucket: bucket.into(),
            object: object.into(),
            parts: Vec::new(),
        }
    }

    /// Record a part, replacing any earlier upload of the same number.
    pub fn put_part(&mut self, number: u32, data_hash: ContentHash) {
        let part = ObjectPartInfo { number, data_hash };
        match self.parts.binary_search_by_key(&number, |p| p.number) {
            Ok(i) => self.parts[i] = part,
            Err(i) => self.parts.insert(i, part),
        }
    }
}
