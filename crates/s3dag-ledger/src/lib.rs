//! The s3dag ledger.
//!
//! The ledger is the authoritative index from bucket and object names to
//! content hashes. Each bucket entry records the hash of the bucket's root
//! [`BucketTree`](s3dag_store::BucketTree); the object map underneath is a
//! lazily refreshed view of that tree. The ledger also tracks in-flight
//! multipart uploads.
//!
//! Locking is split in two layers. [`Ledger`] is the synchronized facade:
//! every public method takes the lock exactly once. The state it guards is
//! an unsynchronized core whose helpers assume the caller already holds the
//! lock, so they can be freely composed without re-entrant locking.

pub mod error;
pub mod ledger;
pub mod records;
mod state;

pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use records::{LedgerBucketEntry, MultipartUpload, ObjectPartInfo, BUCKET_KEY_PREFIX};
