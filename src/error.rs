//! Error types for the caching engine
//!
//! Provides unified error handling using thiserror.

use serde::Serialize;
use thiserror::Error;

use crate::driver::DriverKind;

// == Error Kind ==
/// Discriminant of [`CacheError`], for callers that branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CacheErrorKind {
    KeyInvalid,
    SerializationFailed,
    BackendUnavailable,
    Miss,
    TtlExpired,
    OperationFailed,
}

// == Cache Error Enum ==
/// Unified error type for engine operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key rejected by validation before reaching any backend
    #[error("Invalid key {key:?}: {reason}")]
    KeyInvalid { key: String, reason: String },

    /// Value could not be encoded or decoded as the requested type
    #[error("Serialization failed for key {key:?}")]
    SerializationFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Write failed on the resolved backend and on the memory fallback
    #[error("Backend {kind} unavailable for key {key:?}")]
    BackendUnavailable {
        key: String,
        kind: DriverKind,
        #[source]
        source: DriverError,
    },

    /// Key was never set or has been removed
    #[error("Key not found: {0}")]
    Miss(String),

    /// Key existed but its TTL elapsed
    #[error("Key expired: {0}")]
    TtlExpired(String),

    /// Unexpected backend failure on a non-write path
    #[error("Operation {operation} failed on backend {kind}")]
    OperationFailed {
        operation: &'static str,
        kind: DriverKind,
        #[source]
        source: DriverError,
    },
}

impl CacheError {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> CacheErrorKind {
        match self {
            CacheError::KeyInvalid { .. } => CacheErrorKind::KeyInvalid,
            CacheError::SerializationFailed { .. } => CacheErrorKind::SerializationFailed,
            CacheError::BackendUnavailable { .. } => CacheErrorKind::BackendUnavailable,
            CacheError::Miss(_) => CacheErrorKind::Miss,
            CacheError::TtlExpired(_) => CacheErrorKind::TtlExpired,
            CacheError::OperationFailed { .. } => CacheErrorKind::OperationFailed,
        }
    }

    pub(crate) fn key_invalid(key: &str, reason: impl Into<String>) -> Self {
        CacheError::KeyInvalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn serialization(key: &str, source: impl Into<anyhow::Error>) -> Self {
        CacheError::SerializationFailed {
            key: key.to_string(),
            source: source.into(),
        }
    }
}

// == Driver Error Enum ==
/// Errors reported by a storage backend.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Backend reports itself unavailable and refuses the operation
    #[error("backend {0} is unavailable")]
    Unavailable(DriverKind),

    /// Underlying I/O or storage failure
    #[error("backend I/O failure: {0}")]
    Io(#[from] anyhow::Error),
}

// == Result Type Alias ==
/// Convenience Result type for engine operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Result type returned by backend drivers.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(CacheError::Miss("a".into()).kind(), CacheErrorKind::Miss);
        assert_eq!(
            CacheError::TtlExpired("a".into()).kind(),
            CacheErrorKind::TtlExpired
        );
        assert_eq!(
            CacheError::key_invalid("", "empty").kind(),
            CacheErrorKind::KeyInvalid
        );
    }

    #[test]
    fn test_backend_error_preserves_cause() {
        let err = CacheError::BackendUnavailable {
            key: "k".into(),
            kind: DriverKind::Memory,
            source: DriverError::Io(anyhow::anyhow!("disk full")),
        };
        let cause = err.source().expect("source should be kept");
        assert!(cause.to_string().contains("disk full"));
    }
}
