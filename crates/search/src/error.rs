//! Error types for the search layer.
//!
//! Errors are split by category: search/compilation errors raised while
//! turning an expression into a backend query, resource errors raised by the
//! record retrieval primitives, and backend errors raised by the underlying
//! storage engine. Backend errors are propagated unmodified to the caller.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::expression::ExpressionKind;

/// The primary error type for all search and storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Search compilation or pagination errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors raised while building, compiling or paging a search.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// The expression tree is malformed (caller bug, never retried).
    #[error("invalid expression: {message}")]
    InvalidExpression { message: String },

    /// The backend cannot execute this kind of expression.
    #[error("{kind} expressions are not supported by {backend}: {reason}")]
    UnsupportedExpression {
        kind: ExpressionKind,
        backend: String,
        reason: String,
    },

    /// The continuation token is malformed, tampered with, or belongs to another query.
    #[error("invalid continuation token: {reason}")]
    InvalidContinuationToken { reason: String },

    /// A search value could not be parsed.
    #[error("invalid value '{value}' for search parameter '{parameter}': {message}")]
    InvalidSearchValue {
        parameter: String,
        value: String,
        message: String,
    },

    /// Composite search parameter error.
    #[error("invalid composite search parameter '{parameter}': {message}")]
    InvalidComposite { parameter: String, message: String },

    /// A filter was merged into a context with no active combinator.
    #[error("cannot merge filter: {message}")]
    ContextMisuse { message: String },

    /// The search was cancelled before it completed.
    #[error("search cancelled")]
    Cancelled,
}

impl SearchError {
    /// Builds an `UnsupportedExpression` error.
    pub fn unsupported(
        kind: ExpressionKind,
        backend: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SearchError::UnsupportedExpression {
            kind,
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Builds an `InvalidContinuationToken` error.
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        SearchError::InvalidContinuationToken {
            reason: reason.into(),
        }
    }

    /// Returns true if this is an `UnsupportedExpression` error.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, SearchError::UnsupportedExpression { .. })
    }
}

/// Errors related to resource state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested resource was not found.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// The requested version of the resource was not found.
    #[error("version not found: {resource_type}/{id}/_history/{version_id}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        version_id: String,
    },
}

/// Errors originating from the storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Returns the inner search error, if this is one.
    pub fn as_search(&self) -> Option<&SearchError> {
        match self {
            StorageError::Search(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}
