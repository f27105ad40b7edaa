//! Exit codes for the cp-core CLI.
//!
//! A stable four-value contract for wrappers and cron jobs:
//! - 0: success
//! - 1: user error (bad arguments, unknown file, schema not migrated)
//! - 2: transient error (database busy/unavailable, I/O); retry later
//! - 3: unrecoverable data error (migration partial state, corrupt
//!   input container)
//!
//! Per-event problems never surface here: they become dead-letter rows
//! and the run still exits 0.

use cp_common::Error;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Clean run.
    Success = 0,

    /// Recoverable by the operator: fix arguments or run migrate.
    UserError = 1,

    /// Retry later: the store or filesystem was unavailable.
    Transient = 2,

    /// Data-level failure needing the documented recovery procedure.
    DataError = 3,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Config(_)
            | Error::SecretUnresolved { .. }
            | Error::InputNotFound { .. }
            | Error::UnsupportedFormat { .. }
            | Error::SchemaVersionMismatch { .. } => ExitCode::UserError,

            Error::Store(_)
            | Error::StoreBusy(_)
            | Error::CheckpointConflict { .. }
            | Error::RateLimitDeadline { .. }
            | Error::QuotaExhausted { .. }
            | Error::SourceFailed { .. }
            | Error::Io(_) => ExitCode::Transient,

            Error::Decompression { .. }
            | Error::EventInvalid(_)
            | Error::MigrationPartialState { .. }
            | Error::ForeignKeyTypeMismatch { .. }
            | Error::Json(_) => ExitCode::DataError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_exit_one() {
        let err = Error::InputNotFound {
            path: "/nope".into(),
        };
        assert_eq!(ExitCode::from(&err), ExitCode::UserError);
        assert_eq!(ExitCode::from(&err).as_i32(), 1);
    }

    #[test]
    fn test_schema_mismatch_is_user_error() {
        let err = Error::SchemaVersionMismatch {
            found: 0,
            expected: 16,
        };
        assert_eq!(ExitCode::from(&err), ExitCode::UserError);
    }

    #[test]
    fn test_busy_store_is_transient() {
        assert_eq!(
            ExitCode::from(&Error::StoreBusy("locked".into())),
            ExitCode::Transient
        );
    }

    #[test]
    fn test_partial_migration_is_data_error() {
        let err = Error::MigrationPartialState {
            version: 16,
            detail: "x".into(),
            recovery: "y".into(),
        };
        assert_eq!(ExitCode::from(&err), ExitCode::DataError);
        assert_eq!(ExitCode::from(&err).as_i32(), 3);
    }
}
