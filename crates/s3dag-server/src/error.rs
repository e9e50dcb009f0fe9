use std::path::PathBuf;

use s3dag_ledger::LedgerError;
use s3dag_lifecycle::LifecycleError;
use s3dag_types::ErrorKind;

/// Errors from loading configuration and running a node.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot start cache expiry: {0}")]
    Expiry(#[source] std::io::Error),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            Self::Parse { .. } | Self::Invalid(_) => ErrorKind::InvalidArgument,
            Self::Lifecycle(e) => e.kind(),
            Self::Ledger(e) => e.kind(),
            Self::Io { .. } | Self::Serialize(_) | Self::Expiry(_) => ErrorKind::Internal,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
