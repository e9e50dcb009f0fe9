//! The s3dag storage layer.
//!
//! [`ObjectLayer`] is the contract an S3 front end talks to and the
//! lifecycle sweeper consumes. [`Gateway`] implements it over an
//! [`ObjectCache`](s3dag_cache::ObjectCache) for the object data path and
//! the [`Ledger`](s3dag_ledger::Ledger) plus content store for multipart
//! parts. [`DagBackend`] is the persistent backend that writes objects into
//! the content-addressed DAG and commits new bucket roots through the
//! ledger.

pub mod dag_backend;
pub mod error;
pub mod gateway;
pub mod layer;

pub use dag_backend::DagBackend;
pub use error::{GatewayError, GatewayResult};
pub use gateway::Gateway;
pub use layer::{
    ByteRange, CompletePart, ListObjectsInfo, ObjectDeletion, ObjectInfo, ObjectLayer, PartInfo,
    PutObjectOptions, MAX_PART_NUMBER,
};
pub use s3dag_cache::{BucketMetadata, ListObjectsParams};
