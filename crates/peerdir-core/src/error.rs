//! Error types for the peer directory

use thiserror::Error;

/// Main error type for peer directory operations
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Gossip payload could not be decoded
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Transport hook refused or failed to queue a datagram
    #[error("Transport error: {0}")]
    Transport(String),

    /// Directory backend failure (remote service, DHT, ...)
    #[error("Directory error: {0}")]
    Directory(String),

    /// Directory backend did not answer in time
    #[error("Directory request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Identity-related error (keys, hashes)
    #[error("Identity error: {0}")]
    Identity(String),

    /// Signature verification failed
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Envelope timestamp outside the accepted clock drift
    #[error("Envelope timestamp drift of {0} ms exceeds limit")]
    ClockDrift(u64),

    /// Configuration could not be loaded or saved
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using DirectoryError
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DirectoryError::MalformedPayload("missing nodes".to_string());
        assert_eq!(format!("{}", err), "Malformed payload: missing nodes");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DirectoryError = io_err.into();
        assert!(matches!(err, DirectoryError::Io(_)));
    }

    #[test]
    fn test_timeout_display() {
        let err = DirectoryError::Timeout(std::time::Duration::from_secs(10));
        assert_eq!(format!("{}", err), "Directory request timed out after 10s");
    }
}
