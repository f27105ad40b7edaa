//! Shared types for the Cowrie Processor core.
//!
//! This crate provides:
//! - The unified error type with stable codes and recoverability hints
//! - Ingest run identifiers
//! - The Cowrie event model and validator
//! - Canonical JSON serialization and payload hashing
//! - Per-event risk scoring

pub mod canonical;
pub mod error;
pub mod event;
pub mod id;
pub mod risk;

pub use canonical::{canonical_json, payload_hash, sha256_hex};
pub use error::{Error, ErrorCategory, Result, StructuredError, SuggestedAction};
pub use event::{CowrieEvent, EventKind, ValidationOutcome, COWRIE_EVENT_PREFIX};
pub use id::{IngestId, SessionKey};
pub use risk::{score_event, QUARANTINE_THRESHOLD};

/// Schema version for the relational store, bumped by the migrator.
pub const SCHEMA_VERSION: i64 = 16;

/// Maximum accepted length of a session identifier.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Maximum accepted length of a textual IP address (IPv6 with zone).
pub const MAX_IP_LEN: usize = 45;
