use s3dag_gateway::GatewayError;
use s3dag_types::ErrorKind;

/// Errors produced by the lifecycle sweeper and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Another holder kept the lock past the wait. Routine contention.
    #[error("timed out waiting for lock {resource}")]
    LockTimeout { resource: String },

    #[error("lock {resource} is not held by {owner}")]
    LockNotHeld { resource: String, owner: String },

    #[error("invalid lifecycle configuration: {0}")]
    InvalidLifecycle(String),

    #[error("peer status unavailable: {0}")]
    PeerStatus(String),

    #[error("sweep cancelled")]
    Cancelled,

    #[error("storage layer error: {0}")]
    Gateway(#[from] GatewayError),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LockTimeout { .. } => ErrorKind::Timeout,
            Self::InvalidLifecycle(_) => ErrorKind::InvalidArgument,
            Self::Gateway(e) => e.kind(),
            Self::LockNotHeld { .. } | Self::PeerStatus(_) | Self::Cancelled => ErrorKind::Internal,
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
