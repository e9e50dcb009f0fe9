use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3dag_cache::{BucketMetadata, ListObjectsParams, ObjectMetadata};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{GatewayError, GatewayResult};

/// Highest part number a multipart upload accepts.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// An object as the storage layer reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    /// Hex MD5 of the object bytes.
    pub etag: String,
    pub content_type: String,
    pub mod_time: DateTime<Utc>,
    #[serde(default)]
    pub user_tags: BTreeMap<String, String>,
}

impl From<ObjectMetadata> for ObjectInfo {
    fn from(m: ObjectMetadata) -> Self {
        Self {
            bucket: m.bucket,
            name: m.object,
            size: m.size,
            etag: m.md5,
            content_type: m.content_type,
            mod_time: m.created,
            user_tags: m.user_tags,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListObjectsInfo {
    pub objects: Vec<ObjectInfo>,
    pub prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

/// `length` bytes starting at `start`. Negative values are rejected by the
/// layer, not here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: i64,
    pub length: i64,
}

#[derive(Clone, Debug, Default)]
pub struct PutObjectOptions {
    /// Blank means `application/octet-stream`.
    pub content_type: String,
    /// Base64 Content-MD5, or blank to skip verification.
    pub content_md5: String,
    pub user_tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartInfo {
    pub part_number: u32,
    /// Hex MD5 of the part bytes.
    pub etag: String,
    pub size: u64,
}

/// A part named in a completion request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletePart {
    pub part_number: u32,
    pub etag: String,
}

/// Outcome for one key of a batched delete.
#[derive(Debug)]
pub struct ObjectDeletion {
    pub object: String,
    pub result: GatewayResult<()>,
}

/// The storage-layer contract.
///
/// Healing and server-side encryption, compression and notification belong
/// to other collaborators; the provided methods report them as unavailable.
#[async_trait]
pub trait ObjectLayer: Send + Sync {
    // Buckets
    async fn make_bucket(&self, bucket: &str, acl: &str) -> GatewayResult<()>;
    async fn get_bucket_info(&self, bucket: &str) -> GatewayResult<BucketMetadata>;
    async fn set_bucket_acl(&self, bucket: &str, acl: &str) -> GatewayResult<()>;
    async fn list_buckets(&self) -> GatewayResult<Vec<BucketMetadata>>;
    async fn delete_bucket(&self, bucket: &str) -> GatewayResult<()>;

    // Listing
    async fn list_objects(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> GatewayResult<ListObjectsInfo>;

    /// Stream every object under `prefix`. The channel closes when the walk
    /// ends; a listing failure midway is logged and ends the walk early.
    async fn walk(&self, bucket: &str, prefix: &str) -> GatewayResult<mpsc::Receiver<ObjectInfo>>;

    // Objects
    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        range: Option<ByteRange>,
    ) -> GatewayResult<Bytes>;
    async fn get_object_info(&self, bucket: &str, object: &str) -> GatewayResult<ObjectInfo>;
    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: Bytes,
        opts: PutObjectOptions,
    ) -> GatewayResult<ObjectInfo>;
    async fn delete_object(&self, bucket: &str, object: &str) -> GatewayResult<()>;

    /// Delete each key independently. Fails as a whole only if the bucket
    /// itself is unusable.
    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[String],
    ) -> GatewayResult<Vec<ObjectDeletion>>;

    // Multipart
    async fn new_multipart_upload(&self, bucket: &str, object: &str) -> GatewayResult<String>;
    async fn put_object_part(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> GatewayResult<PartInfo>;
    async fn list_object_parts(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> GatewayResult<Vec<PartInfo>>;
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> GatewayResult<()>;
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        parts: &[CompletePart],
    ) -> GatewayResult<ObjectInfo>;

    // Tagging
    async fn put_object_tags(
        &self,
        bucket: &str,
        object: &str,
        tags: BTreeMap<String, String>,
    ) -> GatewayResult<ObjectInfo>;
    async fn get_object_tags(
        &self,
        bucket: &str,
        object: &str,
    ) -> GatewayResult<BTreeMap<String, String>>;
    async fn delete_object_tags(&self, bucket: &str, object: &str) -> GatewayResult<()>;

    // Healing
    async fn heal_bucket(&self, _bucket: &str) -> GatewayResult<()> {
        Err(GatewayError::NotImplemented("heal_bucket"))
    }

    async fn heal_object(&self, _bucket: &str, _object: &str) -> GatewayResult<()> {
        Err(GatewayError::NotImplemented("heal_object"))
    }

    async fn list_buckets_heal(&self) -> GatewayResult<Vec<BucketMetadata>> {
        Err(GatewayError::NotImplemented("list_buckets_heal"))
    }

    // Capabilities
    fn is_encryption_supported(&self) -> bool {
        false
    }

    fn is_compression_supported(&self) -> bool {
        false
    }

    fn is_notification_supported(&self) -> bool {
        false
    }
}
