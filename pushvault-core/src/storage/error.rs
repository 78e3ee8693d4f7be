//! StorageError - Failure Taxonomy
//!
//! TigerStyle: every failure carries a stable [`ErrorKind`]; driver causes are
//! kept as the error source, never flattened away.

use std::time::Duration;

use thiserror::Error;

/// Boxed driver error kept as a source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Stable classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation invoked before `connect` or after `disconnect`.
    NotConnected,
    /// Scoped read or delete of a missing record.
    NotFound,
    /// Missing or invalid configuration.
    Configuration,
    /// A key or document failed validation.
    InvalidArgument,
    /// A record could not be encoded or decoded.
    Serialization,
    /// Underlying store or network failure.
    Backend,
}

/// Errors returned by storage backends and engines.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Operation invoked before `connect` or after `disconnect`.
    #[error("storage backend is not connected")]
    NotConnected,

    /// Scoped read or delete of a missing record.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind, e.g. "subscription".
        entity: &'static str,
        /// Human-readable key.
        key: String,
    },

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A key or document failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying store or network failure.
    #[error("{operation} failed: {message}")]
    Backend {
        /// Engine operation that failed.
        operation: &'static str,
        /// Driver message.
        message: String,
        /// Whether retrying may succeed.
        transient: bool,
        /// Original driver error.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Create a not-found error.
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Wrap a driver error, keeping it as the source.
    pub fn backend<E>(operation: &'static str, transient: bool, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            operation,
            message: source.to_string(),
            transient,
            source: Some(Box::new(source)),
        }
    }

    /// Create a backend error from a message only.
    pub fn backend_message(
        operation: &'static str,
        transient: bool,
        message: impl Into<String>,
    ) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
            transient,
            source: None,
        }
    }

    /// An attempt that did not finish within the call timeout.
    #[must_use]
    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::backend_message(
            operation,
            true,
            format!("timed out after {}ms", timeout.as_millis()),
        )
    }

    /// Stable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected => ErrorKind::NotConnected,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// Whether retrying the failed call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { transient: true, .. })
    }

    /// Shorthand for `kind() == ErrorKind::NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(StorageError::NotConnected.kind(), ErrorKind::NotConnected);
        assert_eq!(
            StorageError::not_found("subscription", "alice/news").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StorageError::configuration("missing url").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(StorageError::invalid("empty owner").kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_backend_preserves_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let err = StorageError::backend("put_item", true, io);

        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "put_item failed: peer reset");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = StorageError::timeout("query", Duration::from_millis(250));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "query failed: timed out after 250ms");
    }

    #[test]
    fn test_not_found_message() {
        let err = StorageError::not_found("web push registration", "alice/B1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "web push registration not found: alice/B1");
    }
}
