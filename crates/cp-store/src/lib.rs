//! SQLite persistence layer for the Cowrie Processor core.
//!
//! This crate owns every byte of SQL in the workspace: other crates
//! talk to repositories, never to the database directly. DDL is
//! confined further still, to the migrator.
//!
//! Layout:
//! - [`db`] - connection opening, pragmas, transaction helpers
//! - [`migrate`] - versioned, idempotent, self-healing schema evolution
//! - [`raw_events`] - append-only event log with dedup-on-write
//! - [`sessions`] - session summary aggregation and snapshot sealing
//! - [`inventory`] - IP and ASN inventories with serialized upserts
//! - [`ssh_keys`], [`passwords`], [`files`] - specialized fact tables
//! - [`dead_letter`] - durable quarantine for unparseable events
//! - [`checkpoints`] - per-(phase, source) resume offsets
//! - [`cache`] - the shared L2 enrichment cache table
//! - [`sweep`] - backfill cleaner for historical Unicode damage

pub mod cache;
pub mod checkpoints;
pub mod db;
pub mod dead_letter;
pub mod error;
pub mod files;
pub mod inventory;
pub mod migrate;
pub mod passwords;
pub mod raw_events;
pub mod sessions;
pub mod ssh_keys;
pub mod sweep;

pub use cache::{CacheEntry, CacheRepo, ResponseStatus};
pub use checkpoints::{Checkpoint, CheckpointRepo};
pub use db::Store;
pub use dead_letter::{DeadLetterRepo, DeadLetterRow, DeadLetterReason};
pub use error::{Result, StoreError};
pub use files::{FileArtifactRepo, FileArtifactRow};
pub use inventory::{AsnRow, InventoryRepo, IpRow, IpType};
pub use migrate::{migrate, schema_version, Migrator};
pub use raw_events::{NewRawEvent, RawEventRepo};
pub use sessions::{SessionDelta, SessionRepo, SessionSummaryRow, SnapshotPatch};
pub use ssh_keys::{SshKeyObservation, SshKeyRepo};
pub use sweep::{SweepOutcome, SweepReport, Sweeper};
pub use passwords::{PasswordObservation, PasswordRepo};
