//! Error types for the Cowrie Processor core.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Agent-Facing Output
//!
//! Errors serialize to structured JSON:
//! ```json
//! {
//!   "code": 31,
//!   "category": "schema",
//!   "message": "schema version mismatch: store is at 14, expected 16",
//!   "recoverable": false,
//!   "suggested_action": "run_migrate",
//!   "context": { "found": 14, "expected": 16 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for Cowrie Processor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and injected-environment errors.
    Config,
    /// Input file reading and decompression errors.
    Input,
    /// Event parse and validation errors.
    Event,
    /// Database and repository errors.
    Store,
    /// Schema version and migration errors.
    Schema,
    /// Enrichment source and cache errors.
    Enrich,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Event => write!(f, "event"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Schema => write!(f, "schema"),
            ErrorCategory::Enrich => write!(f, "enrich"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Suggested actions for automation in response to errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation (possibly with backoff).
    Retry,
    /// Run the schema migrator.
    RunMigrate,
    /// Run the documented recovery procedure for the failed step.
    RunRecovery,
    /// Skip this item and continue.
    Skip,
    /// Wait for a resource (rate limit, lock) to become available.
    Wait,
    /// Abort the operation.
    Abort,
    /// Manual intervention required.
    ManualIntervention,
    /// No action needed (informational).
    None,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::RunMigrate => write!(f, "run_migrate"),
            SuggestedAction::RunRecovery => write!(f, "run_recovery"),
            SuggestedAction::Skip => write!(f, "skip"),
            SuggestedAction::Wait => write!(f, "wait"),
            SuggestedAction::Abort => write!(f, "abort"),
            SuggestedAction::ManualIntervention => write!(f, "manual_intervention"),
            SuggestedAction::None => write!(f, "none"),
        }
    }
}

/// Unified error type for the Cowrie Processor core.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("secret reference could not be resolved: {reference}")]
    SecretUnresolved { reference: String },

    // Input errors (20-29)
    #[error("input file not found: {path}")]
    InputNotFound { path: String },

    #[error("unsupported input format for {path}: {detail}")]
    UnsupportedFormat { path: String, detail: String },

    #[error("decompression failed for {path}: {detail}")]
    Decompression { path: String, detail: String },

    // Event errors (30 is reserved; per-event failures are DLQ rows, not errors)
    #[error("event validation failed: {0}")]
    EventInvalid(String),

    // Store errors (40-49)
    #[error("database error: {0}")]
    Store(String),

    #[error("database busy: {0}")]
    StoreBusy(String),

    #[error("checkpoint conflict for {source_id}: {detail}")]
    CheckpointConflict { source_id: String, detail: String },

    // Schema errors (50-59)
    #[error("schema version mismatch: store is at {found}, expected {expected}")]
    SchemaVersionMismatch { found: i64, expected: i64 },

    #[error("migration step {version} left partial state: {detail}; recovery: {recovery}")]
    MigrationPartialState {
        version: i64,
        detail: String,
        recovery: String,
    },

    #[error("foreign key type mismatch: {table}.{column} is {found}, referenced {ref_table}.{ref_column} is {expected}")]
    ForeignKeyTypeMismatch {
        table: String,
        column: String,
        found: String,
        ref_table: String,
        ref_column: String,
        expected: String,
    },

    // Enrichment errors (60-69)
    #[error("enrichment source '{source_name}' failed: {detail}")]
    SourceFailed { source_name: String, detail: String },

    #[error("rate limit deadline exceeded for '{service}'")]
    RateLimitDeadline { service: String },

    #[error("daily quota exhausted for '{service}'")]
    QuotaExhausted { service: String },

    // I/O errors (70-79)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the stable error code for this error type.
    ///
    /// Error codes are grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Input errors
    /// - 30-39: Event errors
    /// - 40-49: Store errors
    /// - 50-59: Schema errors
    /// - 60-69: Enrichment errors
    /// - 70-79: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::SecretUnresolved { .. } => 11,
            Error::InputNotFound { .. } => 20,
            Error::UnsupportedFormat { .. } => 21,
            Error::Decompression { .. } => 22,
            Error::EventInvalid(_) => 30,
            Error::Store(_) => 40,
            Error::StoreBusy(_) => 41,
            Error::CheckpointConflict { .. } => 42,
            Error::SchemaVersionMismatch { .. } => 50,
            Error::MigrationPartialState { .. } => 51,
            Error::ForeignKeyTypeMismatch { .. } => 52,
            Error::SourceFailed { .. } => 60,
            Error::RateLimitDeadline { .. } => 61,
            Error::QuotaExhausted { .. } => 62,
            Error::Io(_) => 70,
            Error::Json(_) => 71,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::SecretUnresolved { .. } => ErrorCategory::Config,

            Error::InputNotFound { .. }
            | Error::UnsupportedFormat { .. }
            | Error::Decompression { .. } => ErrorCategory::Input,

            Error::EventInvalid(_) => ErrorCategory::Event,

            Error::Store(_) | Error::StoreBusy(_) | Error::CheckpointConflict { .. } => {
                ErrorCategory::Store
            }

            Error::SchemaVersionMismatch { .. }
            | Error::MigrationPartialState { .. }
            | Error::ForeignKeyTypeMismatch { .. } => ErrorCategory::Schema,

            Error::SourceFailed { .. }
            | Error::RateLimitDeadline { .. }
            | Error::QuotaExhausted { .. } => ErrorCategory::Enrich,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable without
    /// operator intervention.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::SecretUnresolved { .. } => false,

            Error::InputNotFound { .. } => false,
            Error::UnsupportedFormat { .. } => false,
            Error::Decompression { .. } => false,

            // Per-event failures route to the DLQ; reaching here means
            // the caller chose to surface one, which is still skippable.
            Error::EventInvalid(_) => true,

            Error::Store(_) => true,
            Error::StoreBusy(_) => true,
            Error::CheckpointConflict { .. } => true,

            Error::SchemaVersionMismatch { .. } => false,
            Error::MigrationPartialState { .. } => false,
            Error::ForeignKeyTypeMismatch { .. } => false,

            Error::SourceFailed { .. } => true,
            Error::RateLimitDeadline { .. } => true,
            Error::QuotaExhausted { .. } => true,

            Error::Io(_) => true,
            Error::Json(_) => true,
        }
    }

    /// Returns the suggested action for automation.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Config(_) => SuggestedAction::ManualIntervention,
            Error::SecretUnresolved { .. } => SuggestedAction::ManualIntervention,

            Error::InputNotFound { .. } => SuggestedAction::Abort,
            Error::UnsupportedFormat { .. } => SuggestedAction::Skip,
            Error::Decompression { .. } => SuggestedAction::Skip,

            Error::EventInvalid(_) => SuggestedAction::Skip,

            Error::Store(_) => SuggestedAction::Retry,
            Error::StoreBusy(_) => SuggestedAction::Wait,
            Error::CheckpointConflict { .. } => SuggestedAction::Retry,

            Error::SchemaVersionMismatch { .. } => SuggestedAction::RunMigrate,
            Error::MigrationPartialState { .. } => SuggestedAction::RunRecovery,
            Error::ForeignKeyTypeMismatch { .. } => SuggestedAction::RunRecovery,

            Error::SourceFailed { .. } => SuggestedAction::Skip,
            Error::RateLimitDeadline { .. } => SuggestedAction::Wait,
            Error::QuotaExhausted { .. } => SuggestedAction::Skip,

            Error::Io(_) => SuggestedAction::Retry,
            Error::Json(_) => SuggestedAction::ManualIntervention,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Check the injected configuration values; run 'cp-core check-health' to validate."
            }
            Error::SecretUnresolved { .. } => {
                "Verify the secret reference and the resolver wiring provided by the caller."
            }

            Error::InputNotFound { .. } => {
                "Check the path and glob expansion. Input files must exist when the run starts."
            }
            Error::UnsupportedFormat { .. } => {
                "Pretty-printed JSON must be requested explicitly with --multiline-json."
            }
            Error::Decompression { .. } => {
                "The file suffix and magic bytes disagree or the stream is truncated. Re-fetch the archive."
            }

            Error::EventInvalid(_) => {
                "The event was routed to the dead-letter queue. Inspect it with 'cp-core dead-letter-replay --dry-run'."
            }

            Error::Store(_) => "Retry the operation. If persistent, check disk space and database file permissions.",
            Error::StoreBusy(_) => {
                "Another writer holds the database. Retry after the competing run finishes."
            }
            Error::CheckpointConflict { .. } => {
                "A concurrent loader advanced the checkpoint. Re-run the delta loader; it resumes safely."
            }

            Error::SchemaVersionMismatch { .. } => "Run 'cp-core migrate' before loading data.",
            Error::MigrationPartialState { .. } => {
                "Follow the recovery procedure named in the message, then re-run 'cp-core migrate'."
            }
            Error::ForeignKeyTypeMismatch { .. } => {
                "Column types drifted from the catalog. Run the recovery procedure for the named version."
            }

            Error::SourceFailed { .. } => {
                "The cascade continues without this source. Check connectivity and credentials if persistent."
            }
            Error::RateLimitDeadline { .. } => {
                "Token-bucket wait exceeded the deadline. Lower concurrency or raise the per-service rate."
            }
            Error::QuotaExhausted { .. } => {
                "The daily quota is spent. The source is skipped until UTC midnight."
            }

            Error::Io(_) => "Check disk space and permissions, then retry the operation.",
            Error::Json(_) => "Invalid JSON produced or consumed. Report with the offending document attached.",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Suggested action for automation.
    pub suggested_action: SuggestedAction,

    /// Additional structured context (e.g., path, versions).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::InputNotFound { path }
            | Error::UnsupportedFormat { path, .. }
            | Error::Decompression { path, .. } => {
                context.insert("path".to_string(), serde_json::json!(path));
            }
            Error::SchemaVersionMismatch { found, expected } => {
                context.insert("found".to_string(), serde_json::json!(found));
                context.insert("expected".to_string(), serde_json::json!(expected));
            }
            Error::MigrationPartialState { version, .. } => {
                context.insert("version".to_string(), serde_json::json!(version));
            }
            Error::SourceFailed { source_name, .. } => {
                context.insert("source".to_string(), serde_json::json!(source_name));
            }
            Error::RateLimitDeadline { service } | Error::QuotaExhausted { service } => {
                context.insert("service".to_string(), serde_json::json!(service));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}
