//! Ingest checkpoints.
//!
//! One row per `(phase, source)` recording the last committed byte
//! offset and the inode observed when it was written. Checkpoints are
//! updated inside the same transaction as the batch they describe, so
//! a crash can never record progress for rows that were rolled back.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// A stored checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub phase: String,
    pub source: String,
    pub source_offset: i64,
    pub source_inode: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for ingest checkpoints.
pub struct CheckpointRepo;

impl CheckpointRepo {
    /// Load the checkpoint for `(phase, source)`.
    pub fn get(conn: &Connection, phase: &str, source: &str) -> Result<Option<Checkpoint>> {
        let row = conn
            .query_row(
                "SELECT phase, source, source_offset, source_inode, updated_at
                 FROM ingest_checkpoints WHERE phase = ?1 AND source = ?2",
                params![phase, source],
                |row| {
                    Ok(Checkpoint {
                        phase: row.get(0)?,
                        source: row.get(1)?,
                        source_offset: row.get(2)?,
                        source_inode: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Write (or advance) the checkpoint. Called inside the batch
    /// transaction.
    pub fn put(
        tx: &Transaction<'_>,
        phase: &str,
        source: &str,
        source_offset: i64,
        source_inode: Option<&str>,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO ingest_checkpoints (phase, source, source_offset, source_inode, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (phase, source) DO UPDATE SET
                 source_offset = excluded.source_offset,
                 source_inode  = excluded.source_inode,
                 updated_at    = excluded.updated_at",
            params![phase, source, source_offset, source_inode, Utc::now()],
        )?;
        Ok(())
    }

    /// Reset the offset to zero, keeping the new inode (rotation).
    pub fn reset(
        tx: &Transaction<'_>,
        phase: &str,
        source: &str,
        source_inode: Option<&str>,
    ) -> Result<()> {
        Self::put(tx, phase, source, 0, source_inode)
    }
}
