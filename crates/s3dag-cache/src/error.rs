use s3dag_types::ErrorKind;

/// Boxed error carried out of a persistent backend.
pub type BackendSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the object cache and its backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("too many buckets, cannot create {bucket}")]
    TooManyBuckets { bucket: String },

    #[error("bucket name invalid: {0}")]
    BucketNameInvalid(String),

    #[error("object name invalid: {0}")]
    ObjectNameInvalid(String),

    #[error("invalid ACL: {0}")]
    InvalidAcl(String),

    #[error("bucket exists: {0}")]
    BucketExists(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("object not found: {bucket}/{object}")]
    ObjectNotFound { bucket: String, object: String },

    #[error("object exists: {bucket}/{object}")]
    ObjectExists { bucket: String, object: String },

    #[error("entity too large: {bucket}/{object} is {size} bytes, limit {max_size}")]
    EntityTooLarge {
        bucket: String,
        object: String,
        size: u64,
        max_size: u64,
    },

    #[error("invalid Content-MD5: {0}")]
    InvalidDigest(String),

    #[error("bad digest for {bucket}/{object}: expected {expected}, computed {actual}")]
    BadDigest {
        bucket: String,
        object: String,
        expected: String,
        actual: String,
    },

    #[error("invalid range: start {start}, length {length}")]
    InvalidRange { start: i64, length: i64 },

    #[error("I/O error on {bucket}/{object}: {source}")]
    Io {
        bucket: String,
        object: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend error on {bucket}/{object}: {source}")]
    Backend {
        bucket: String,
        object: String,
        #[source]
        source: BackendSource,
    },

    #[error("internal cache error: {0}")]
    Internal(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BucketNotFound(_) | Self::ObjectNotFound { .. } => ErrorKind::NotFound,
            Self::BucketExists(_) | Self::ObjectExists { .. } | Self::BucketNotEmpty(_) => {
                ErrorKind::AlreadyExists
            }
            Self::BucketNameInvalid(_)
            | Self::ObjectNameInvalid(_)
            | Self::InvalidAcl(_)
            | Self::InvalidDigest(_)
            | Self::InvalidRange { .. } => ErrorKind::InvalidArgument,
            Self::TooManyBuckets { .. } | Self::EntityTooLarge { .. } | Self::BadDigest { .. } => {
                ErrorKind::ResourceExhausted
            }
            Self::Io { .. } | Self::Backend { .. } | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Wrap any backend failure with the object it concerned.
    pub fn backend(
        bucket: impl Into<String>,
        object: impl Into<String>,
        source: impl Into<BackendSource>,
    ) -> Self {
        Self::Backend {
            bucket: bucket.into(),
            object: object.into(),
            source: source.into(),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
