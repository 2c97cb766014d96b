//! Query error types
//!
//! Structured errors for operator construction and step evaluation.

use crate::error::StorageError;
use std::fmt;
use std::sync::Arc;

/// Query error with context
///
/// Cloneable so an operator can report the same fatal initialization failure
/// on every call after it happened.
#[derive(Debug, Clone)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ValidationError, message)
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ExecutionError, message)
    }

    /// Create a series resolution error
    pub fn series_resolution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::SeriesResolution, message)
    }

    /// Create a storage iteration error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Storage, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }

    /// Create a resource limit error
    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ResourceLimit, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cancelled, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }

    /// Whether this error was caused by cancellation or timeout
    pub fn is_interrupt(&self) -> bool {
        matches!(
            self.kind,
            QueryErrorKind::Cancelled | QueryErrorKind::Timeout
        )
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<StorageError> for QueryError {
    fn from(err: StorageError) -> Self {
        let kind = match err {
            StorageError::SeriesResolution(_) => QueryErrorKind::SeriesResolution,
            _ => QueryErrorKind::Storage,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    /// Query parameters are invalid
    ValidationError,
    /// Step evaluation failed for a reason not covered below
    ExecutionError,
    /// The series source could not produce the matched series set
    SeriesResolution,
    /// A sample iterator failed during a step
    Storage,
    /// Query exceeded time limit
    Timeout,
    /// Query exceeded resource limits (samples per step)
    ResourceLimit,
    /// Query was cancelled by user or system
    Cancelled,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl QueryErrorKind {
    /// Short label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::ValidationError => "validation",
            QueryErrorKind::ExecutionError => "execution",
            QueryErrorKind::SeriesResolution => "series_resolution",
            QueryErrorKind::Storage => "storage",
            QueryErrorKind::Timeout => "timeout",
            QueryErrorKind::ResourceLimit => "resource_limit",
            QueryErrorKind::Cancelled => "cancelled",
            QueryErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::ValidationError => write!(f, "ValidationError"),
            QueryErrorKind::ExecutionError => write!(f, "ExecutionError"),
            QueryErrorKind::SeriesResolution => write!(f, "SeriesResolution"),
            QueryErrorKind::Storage => write!(f, "Storage"),
            QueryErrorKind::Timeout => write!(f, "Timeout"),
            QueryErrorKind::ResourceLimit => write!(f, "ResourceLimit"),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;
