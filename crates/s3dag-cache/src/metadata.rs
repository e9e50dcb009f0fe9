use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type recorded when the caller supplies none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMetadata {
    pub name: String,
    pub created: DateTime<Utc>,
    pub acl: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub object: String,
    pub content_type: String,
    pub created: DateTime<Utc>,
    /// Hex-encoded MD5 of the object bytes.
    pub md5: String,
    pub size: u64,
    #[serde(default)]
    pub user_tags: BTreeMap<String, String>,
}

/// Listing request: which keys, from where, folded how.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListObjectsParams {
    pub prefix: String,
    pub marker: String,
    pub delimiter: String,
    pub max_keys: usize,
}

impl ListObjectsParams {
    pub fn is_delimiter_set(&self) -> bool {
        !self.delimiter.trim().is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectMetadata>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}
