use s3dag_store::StoreError;
use s3dag_types::ErrorKind;

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("bucket already exists: {0}")]
    BucketExists(String),

    #[error("bucket does not exist: {0}")]
    BucketDoesNotExist(String),

    #[error("object does not exist: {bucket}/{object}")]
    ObjectDoesNotExist { bucket: String, object: String },

    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("upload id already in use: {0}")]
    UploadIdExists(String),

    #[error("ledger is closed")]
    Closed,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("ledger lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BucketDoesNotExist(_)
            | Self::ObjectDoesNotExist { .. }
            | Self::InvalidUploadId(_) => ErrorKind::NotFound,
            Self::BucketExists(_) | Self::UploadIdExists(_) => ErrorKind::AlreadyExists,
            Self::Store(e) => e.kind(),
            Self::Closed | Self::Serialization(_) | Self::LockPoisoned => ErrorKind::Internal,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
