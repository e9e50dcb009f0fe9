//! Content-addressed object storage for s3dag.
//!
//! Object bytes and the DAG nodes describing buckets live in an append-only,
//! hash-keyed store. Nothing in it is ever mutated in place: a bucket
//! "changes" by writing a new root tree and pointing the ledger at it.
//!
//! # Node Types
//!
//! - [`StoredObject`] with [`ObjectKind::Blob`]: raw object data
//! - [`BucketTree`]: bucket root mapping object names to object nodes
//! - [`ObjectNode`]: per-object metadata plus the hash of its data blob
//!
//! # Storage Backends
//!
//! - [`ContentStore`] / [`InMemoryContentStore`]: the content-addressed store
//! - [`Datastore`] / [`InMemoryDatastore`]: small mutable key namespace the
//!   ledger persists bucket records into
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. Write-then-link: write the object, then publish its hash.
//! 3. Concurrent reads are always safe (objects are immutable).
//! 4. The content store never interprets object contents.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryContentStore, InMemoryDatastore};
pub use object::{BucketTree, ObjectKind, ObjectNode, StoredObject, TreeEntry};
pub use traits::{ContentStore, Datastore};
