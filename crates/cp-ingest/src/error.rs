//! Ingest error type.

use thiserror::Error;

/// Result type alias for ingest operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that abort an ingest run.
///
/// Per-event failures are not errors: they become dead-letter rows and
/// the run continues. Only conditions that stop forward progress
/// surface here.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("input file not found: {path}")]
    NotFound { path: String },

    #[error("decompression failed for {path}: {detail}")]
    Decompression { path: String, detail: String },

    #[error("store error: {0}")]
    Store(#[from] cp_store::StoreError),

    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for cp_common::Error {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::NotFound { path } => cp_common::Error::InputNotFound { path },
            IngestError::Decompression { path, detail } => {
                cp_common::Error::Decompression { path, detail }
            }
            IngestError::Store(store) => store.into(),
            IngestError::WorkerPanic(detail) => cp_common::Error::Store(detail),
            IngestError::Io(io) => cp_common::Error::Io(io),
        }
    }
}
