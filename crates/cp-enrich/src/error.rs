//! Enrichment error type.

use thiserror::Error;

/// Result type alias for enrichment operations.
pub type Result<T> = std::result::Result<T, EnrichError>;

/// Errors from enrichment operations.
///
/// Source-level failures are usually absorbed by the cascade (logged,
/// source skipped); they only surface when a caller asks a single
/// source directly.
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("source '{source_name}' failed: {detail}")]
    Source { source_name: &'static str, detail: String },

    #[error("rate limit deadline exceeded for '{service}'")]
    RateLimitDeadline { service: String },

    #[error("daily quota exhausted for '{service}'")]
    QuotaExhausted { service: String },

    #[error("offline database unavailable: {0}")]
    OfflineDbUnavailable(String),

    #[error("store error: {0}")]
    Store(#[from] cp_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<EnrichError> for cp_common::Error {
    fn from(err: EnrichError) -> Self {
        match err {
            EnrichError::Source { source_name, detail } => cp_common::Error::SourceFailed {
                source_name: source_name.to_string(),
                detail,
            },
            EnrichError::RateLimitDeadline { service } => {
                cp_common::Error::RateLimitDeadline { service }
            }
            EnrichError::QuotaExhausted { service } => {
                cp_common::Error::QuotaExhausted { service }
            }
            EnrichError::OfflineDbUnavailable(detail) => cp_common::Error::Config(detail),
            EnrichError::Store(store) => store.into(),
            EnrichError::Io(io) => cp_common::Error::Io(io),
            EnrichError::Json(json) => cp_common::Error::Json(json),
        }
    }
}
