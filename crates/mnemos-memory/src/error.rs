use mnemos_types::embedding::DimensionError;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can arise from memory store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An embedding (or the persisted index) does not have the configured
    /// dimension. Nothing is stored.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// The backing files cannot be opened or written.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    /// The backing database stayed busy past the configured timeout.
    #[error("Storage timed out: {0}")]
    StorageTimeout(String),
    /// The log and the index disagree about which ids exist.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),
    /// A stored row or vector could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                return StoreError::StorageTimeout(err.to_string());
            }
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::ReadOnly
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied
                | ErrorCode::DiskFull,
            ) => return StoreError::StorageUnavailable(err.to_string()),
            _ => {}
        }
        match err {
            rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::FromSqlConversionFailure(..) => {
                StoreError::Corrupt(err.to_string())
            }
            other => StoreError::Sqlite(other),
        }
    }
}

impl From<DimensionError> for StoreError {
    fn from(err: DimensionError) -> Self {
        StoreError::DimensionMismatch {
            expected: err.expected,
            actual: err.actual,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

pub(crate) fn poisoned<T>(_: T) -> StoreError {
    StoreError::StorageUnavailable("lock poisoned by a panicked writer".to_string())
}
