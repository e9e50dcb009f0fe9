use s3dag_cache::CacheError;
use s3dag_ledger::LedgerError;
use s3dag_store::StoreError;
use s3dag_types::ErrorKind;

/// Errors produced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid part {part_number} for upload {upload_id}")]
    InvalidPart { upload_id: String, part_number: u32 },

    #[error("{0} is not implemented by this gateway")]
    NotImplemented(&'static str),

    #[error("background task failed: {0}")]
    Task(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cache(e) => e.kind(),
            Self::Ledger(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::InvalidPart { .. } => ErrorKind::InvalidArgument,
            Self::NotImplemented(_) | Self::Task(_) => ErrorKind::Internal,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_pass_through_wrapped_errors() {
        let err: GatewayError = CacheError::BucketNotFound("b".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err: GatewayError = LedgerError::UploadIdExists("u".into()).into();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let err = GatewayError::InvalidPart {
            upload_id: "u".into(),
            part_number: 3,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
