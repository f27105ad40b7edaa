//! Status documents for the Cowrie Processor core.
//!
//! Each long-running phase (bulk ingest, delta ingest, enrichment, the
//! sweeper) periodically writes one compact JSON document under the
//! status directory, plus an aggregated `status.json` rolling up every
//! phase. Writes are atomic (temp file + rename) so a monitor sampling
//! the file never sees a torn document. Emission is lossy by design:
//! nothing blocks a producer because a monitor is slow.

pub mod document;
pub mod emitter;

pub use document::{CheckpointInfo, DeadLetterInfo, Phase, StatusDocument};
pub use emitter::{StatusEmitter, StatusError};
