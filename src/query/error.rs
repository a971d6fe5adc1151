//! Query error types
//!
//! Structured errors for descriptor validation, pipeline construction and
//! execution. Data gaps are never errors; they travel through the pipeline as
//! unknown values.

use crate::error::StorageError;
use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
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
        self.source = Some(Box::new(source));
        self
    }

    /// Create a parse error (malformed expression formula)
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ParseError, message)
    }

    /// Create a validation error (bad query parameters or descriptor)
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ValidationError, message)
    }

    /// Create a storage error (upstream read failure)
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Storage, message)
    }

    /// Create a resource limit error
    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ResourceLimit, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }

    /// Whether this error was raised before any data was read
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind,
            QueryErrorKind::ParseError | QueryErrorKind::ValidationError
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
    fn from(e: StorageError) -> Self {
        QueryError::storage(e.to_string()).with_source(e)
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Expression formula could not be parsed
    ParseError,
    /// Query parameters or descriptor are invalid
    ValidationError,
    /// Reading from storage failed
    Storage,
    /// Query exceeded resource limits (result size)
    ResourceLimit,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::ParseError => write!(f, "ParseError"),
            QueryErrorKind::ValidationError => write!(f, "ValidationError"),
            QueryErrorKind::Storage => write!(f, "Storage"),
            QueryErrorKind::ResourceLimit => write!(f, "ResourceLimit"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = QueryError::parse("unexpected token '*'");
        assert_eq!(err.kind, QueryErrorKind::ParseError);
        assert!(err.message.contains('*'));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::validation("label 'ifInOctets' not declared");
        let display = format!("{}", err);
        assert!(display.contains("ValidationError"));
        assert!(display.contains("ifInOctets"));
    }

    #[test]
    fn test_storage_error_keeps_source() {
        use std::error::Error;
        let err: QueryError = StorageError::ReadFailed("partition 3 unavailable".into()).into();
        assert_eq!(err.kind, QueryErrorKind::Storage);
        assert!(!err.is_configuration());
        assert!(err.source().is_some());
    }
}
