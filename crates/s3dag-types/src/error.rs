use std::fmt;

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// The kind of failure, independent of which crate produced it.
///
/// Each crate error exposes a `kind()` accessor so callers at the protocol
/// boundary can map failures to status codes without matching on every
/// variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bucket, object or upload ID is absent.
    NotFound,
    /// Bucket or object collision.
    AlreadyExists,
    /// Malformed name, ACL, digest encoding or range.
    InvalidArgument,
    /// Too many buckets, entity too large, digest mismatch.
    ResourceExhausted,
    /// A lock was not acquired in time. Routine contention.
    Timeout,
    /// Everything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not-found",
            Self::AlreadyExists => "already-exists",
            Self::InvalidArgument => "invalid-argument",
            Self::ResourceExhausted => "resource-exhausted",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}
