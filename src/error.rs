//! Error types for the range-vector engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Query error
    #[error("Query error: {0}")]
    Query(#[from] crate::query::QueryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Parse error (test-data notation, configuration text)
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage errors
///
/// `Clone` so a resolution failure cached by a shared selector can be handed
/// to every shard that asks for it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Matched series set could not be produced
    #[error("Series resolution failed: {0}")]
    SeriesResolution(String),

    /// A sample iterator failed mid-scan
    #[error("Iteration failed: {0}")]
    Iteration(String),

    /// Appended sample is not newer than the last one
    #[error("Out of order sample for {series}: timestamp {timestamp} <= last {last}")]
    OutOfOrder {
        /// Series the sample was appended to
        series: String,
        /// Rejected timestamp
        timestamp: i64,
        /// Last accepted timestamp
        last: i64,
    },

    /// Invalid input data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for crate operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_converts() {
        let err: Error = StorageError::Iteration("chunk decode".to_string()).into();
        assert!(matches!(err, Error::Storage(StorageError::Iteration(_))));
        assert!(err.to_string().contains("chunk decode"));
    }

    #[test]
    fn test_out_of_order_display() {
        let err = StorageError::OutOfOrder {
            series: "up{}".to_string(),
            timestamp: 10,
            last: 20,
        };
        assert_eq!(
            err.to_string(),
            "Out of order sample for up{}: timestamp 10 <= last 20"
        );
    }
}
