//! Ingestion engine for Cowrie honeypot logs.
//!
//! The bulk loader streams one or more input files end-to-end; the
//! delta loader layers resumable checkpoints on top. Both share the
//! same pipeline: format detection and transparent decompression,
//! per-file sequential parsing (so the raw event log preserves file
//! order per source), validation with dead-letter routing, payload
//! sanitization, canonical hashing, and batched idempotent writes.
//!
//! File workers run in parallel across files; within a file, events
//! stay strictly ordered. Stages are connected by bounded
//! crossbeam channels, and a shutdown flag drains in-flight batches
//! before exit.

pub mod bulk;
pub mod delta;
pub mod detect;
pub mod error;
pub mod multiline;
pub mod pipeline;
pub mod repair;

pub use bulk::{BulkLoader, IngestReport};
pub use delta::DeltaLoader;
pub use detect::{detect_format, open_maybe_compressed, FileFormat, FormatReport};
pub use error::{IngestError, Result};
pub use multiline::{MultilineItem, MultilineParser};
pub use repair::{RepairOutcome, RepairRunner};
