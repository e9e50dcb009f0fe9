//! Foundation types for s3dag.
//!
//! Every other s3dag crate depends on `s3dag-types`. It carries the pieces
//! that must agree across the ledger, the object cache and the lifecycle
//! sweeper.
//!
//! # Key Types
//!
//! - [`ContentHash`]: Content-addressed identifier (BLAKE3 hash)
//! - [`ContentHasher`]: Domain-separated hashing for blobs and DAG nodes
//! - [`ErrorKind`]: Coarse error taxonomy every crate error maps onto
//! - [`names`]: Bucket, object, prefix and ACL validation

pub mod error;
pub mod hash;
pub mod names;

pub use error::{ErrorKind, TypeError};
pub use hash::{ContentHash, ContentHasher};
pub use names::{
    is_valid_bucket_acl, is_valid_bucket_name, is_valid_object_name, is_valid_prefix,
    normalize_acl, DEFAULT_ACL,
};
