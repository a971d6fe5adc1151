//! Error types for the aggregation engine

use crate::query::error::QueryError;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Query error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Storage collaborator errors
///
/// Raised by sample and last-update repositories. Any of these reaching the
/// query pipeline is fatal to the query.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Read from a partition or cursor failed
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Write batch failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// A cursor produced an element older than its predecessor
    #[error("Cursor out of order: {current} follows {previous}")]
    OutOfOrder {
        /// Timestamp of the previously read element (epoch millis)
        previous: i64,
        /// Timestamp of the offending element (epoch millis)
        current: i64,
    },

    /// Storage configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Time range validation failed
    #[error("Invalid time range: start {start} > end {end}")]
    InvalidTimeRange {
        /// Start timestamp
        start: i64,
        /// End timestamp
        end: i64,
    },
}

/// Validation errors for configuration and input
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid format
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat {
        /// Field name being validated
        field: String,
        /// Description of the format error
        message: String,
    },
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_becomes_configuration() {
        let err: Error = ValidationError::MissingField("resource".to_string()).into();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("resource"));
    }

    #[test]
    fn test_out_of_order_display() {
        let err = StorageError::OutOfOrder {
            previous: 2000,
            current: 1000,
        };
        assert_eq!(err.to_string(), "Cursor out of order: 1000 follows 2000");
    }
}
