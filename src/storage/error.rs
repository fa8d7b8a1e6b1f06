//! Errors raised by the monitoring database

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

/// Why a read or write against the store did not happen
///
/// Any of these reaching a monitoring loop is fatal for that loop.
#[derive(Debug)]
pub enum StorageError {
    /// The database file could not be opened, or the store refuses writes
    Unavailable(String),

    Query(String),

    /// Creating or upgrading the `connectivity`/`speed_tests` tables failed
    SchemaMigration(String),

    /// Storage settings that cannot work, e.g. an unwritable path
    InvalidConfig(String),

    /// A stored row (timestamp, flag) that does not map back to a record
    CorruptRow(String),

    Io(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Unavailable(msg) => write!(f, "monitoring database unavailable: {msg}"),
            StorageError::Query(msg) => write!(f, "monitoring database query failed: {msg}"),
            StorageError::SchemaMigration(msg) => {
                write!(f, "could not prepare the monitoring tables: {msg}")
            }
            StorageError::InvalidConfig(msg) => write!(f, "unusable database settings: {msg}"),
            StorageError::CorruptRow(msg) => write!(f, "stored row is unreadable: {msg}"),
            StorageError::Io(err) => write!(f, "database file access failed: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::Io(io_err),
            sqlx::Error::RowNotFound => StorageError::Query("expected row is missing".to_string()),
            _ => StorageError::Query(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::SchemaMigration(err.to_string())
    }
}
