//! Store error type.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database busy: {0}")]
    Busy(String),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("migration lock held by {holder} since {since}")]
    MigrationLockHeld { holder: String, since: String },

    #[error("schema version mismatch: store is at {found}, expected {expected}")]
    VersionMismatch { found: i64, expected: i64 },

    #[error("migration step {version} found partial state: {detail}; recovery: {recovery}")]
    PartialState {
        version: i64,
        detail: String,
        recovery: String,
    },

    #[error("foreign key type mismatch: {table}.{column} is {found}, {ref_table}.{ref_column} is {expected}")]
    FkTypeMismatch {
        table: String,
        column: String,
        found: String,
        ref_table: String,
        ref_column: String,
        expected: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying after a short delay could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Busy(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StoreError::Io(_) => true,
            _ => false,
        }
    }
}

impl From<StoreError> for cp_common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Busy(detail) => cp_common::Error::StoreBusy(detail),
            StoreError::VersionMismatch { found, expected } => {
                cp_common::Error::SchemaVersionMismatch { found, expected }
            }
            StoreError::PartialState {
                version,
                detail,
                recovery,
            } => cp_common::Error::MigrationPartialState {
                version,
                detail,
                recovery,
            },
            StoreError::FkTypeMismatch {
                table,
                column,
                found,
                ref_table,
                ref_column,
                expected,
            } => cp_common::Error::ForeignKeyTypeMismatch {
                table,
                column,
                found,
                ref_table,
                ref_column,
                expected,
            },
            other => {
                if other.is_transient() {
                    cp_common::Error::StoreBusy(other.to_string())
                } else {
                    cp_common::Error::Store(other.to_string())
                }
            }
        }
    }
}
