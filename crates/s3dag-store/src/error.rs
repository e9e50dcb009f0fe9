use s3dag_types::{ContentHash, ErrorKind};

/// Errors from content store and datastore operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ContentHash),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The object data is malformed or cannot be decoded.
    #[error("corrupt object {hash}: {reason}")]
    CorruptObject { hash: ContentHash, reason: String },

    /// Attempted to write something that hashes to the null hash.
    #[error("cannot store object with null hash")]
    NullHash,

    /// The datastore handle has been closed.
    #[error("datastore is closed")]
    Closed,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
