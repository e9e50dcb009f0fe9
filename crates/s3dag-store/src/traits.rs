use std::io::{Cursor, Read};

use s3dag_types::ContentHash;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;

/// Content-addressed DAG store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written; the same data always produces the
///   same hash.
/// - Writing an object that already exists is a no-op.
/// - Concurrent reads are always safe.
/// - All I/O errors are propagated, never silently ignored.
pub trait ContentStore: Send + Sync {
    /// Read an object by hash.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    fn read(&self, hash: &ContentHash) -> StoreResult<Option<StoredObject>>;

    /// Write an object and return its content hash (idempotent).
    fn write(&self, object: &StoredObject) -> StoreResult<ContentHash>;

    /// Check whether an object exists in the store.
    fn exists(&self, hash: &ContentHash) -> StoreResult<bool>;

    /// Delete an object by hash. Returns `true` if the object existed.
    ///
    /// Only for garbage collection: deleting a referenced object corrupts
    /// every tree that points at it.
    fn delete(&self, hash: &ContentHash) -> StoreResult<bool>;

    /// Read multiple objects. Backends may override to batch round-trips.
    fn read_batch(&self, hashes: &[ContentHash]) -> StoreResult<Vec<Option<StoredObject>>> {
        hashes.iter().map(|h| self.read(h)).collect()
    }

    /// Write multiple objects and return their hashes.
    fn write_batch(&self, objects: &[StoredObject]) -> StoreResult<Vec<ContentHash>> {
        objects.iter().map(|obj| self.write(obj)).collect()
    }

    /// Store raw bytes as a blob.
    fn put(&self, data: &[u8]) -> StoreResult<ContentHash> {
        self.write(&StoredObject::blob(data.to_vec()))
    }

    /// Open a reader over the data of an existing object.
    fn open(&self, hash: &ContentHash) -> StoreResult<Box<dyn Read + Send>> {
        let obj = self.read(hash)?.ok_or(StoreError::NotFound(*hash))?;
        Ok(Box::new(Cursor::new(obj.data)))
    }
}

/// Small mutable key/value namespace for ledger records.
///
/// Keys are slash-separated paths such as `/buckets/photos`. Once
/// [`close`](Datastore::close) has been called every operation fails with
/// [`StoreError::Closed`].
pub trait Datastore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Remove a key. Returns `true` if it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// All keys starting with `prefix`, in lexicographic order.
    fn query_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Flush and release the datastore. Closing twice is not an error.
    fn close(&self) -> StoreResult<()>;
}
