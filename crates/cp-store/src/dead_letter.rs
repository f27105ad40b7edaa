//! Dead-letter queue.
//!
//! Anything that fails to parse or validate lands here with its raw
//! bytes and a reason code. Writing to the DLQ must never fail the
//! ingest path, so the repository exposes only cheap single-row
//! operations the loader can fold into its batch transaction.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};

/// Why an event could not be ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeadLetterReason {
    Parse,
    Validation,
    Sanitize,
    Dedup,
    IngestError,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Parse => "parse",
            DeadLetterReason::Validation => "validation",
            DeadLetterReason::Sanitize => "sanitize",
            DeadLetterReason::Dedup => "dedup",
            DeadLetterReason::IngestError => "ingest-error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parse" => Some(DeadLetterReason::Parse),
            "validation" => Some(DeadLetterReason::Validation),
            "sanitize" => Some(DeadLetterReason::Sanitize),
            "dedup" => Some(DeadLetterReason::Dedup),
            "ingest-error" => Some(DeadLetterReason::IngestError),
            _ => None,
        }
    }
}

/// A stored dead-letter row.
#[derive(Debug, Clone)]
pub struct DeadLetterRow {
    pub id: i64,
    pub source: String,
    pub source_offset: i64,
    pub reason: DeadLetterReason,
    pub payload: String,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_retried_at: Option<DateTime<Utc>>,
}

/// Repository for the dead-letter queue.
pub struct DeadLetterRepo;

impl DeadLetterRepo {
    /// Record an unprocessable event.
    pub fn push(
        tx: &Transaction<'_>,
        source: &str,
        source_offset: i64,
        reason: DeadLetterReason,
        payload: &str,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO dead_letter_events (source, source_offset, reason, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![source, source_offset, reason.as_str(), payload, Utc::now()],
        )?;
        Ok(())
    }

    /// Page rows for a repair pass, oldest first, capped retries.
    pub fn page_for_repair(
        conn: &Connection,
        after_id: i64,
        max_retries: i64,
        limit: usize,
    ) -> Result<Vec<DeadLetterRow>> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, source, source_offset, reason, payload, retry_count,
                    created_at, last_retried_at
             FROM dead_letter_events
             WHERE id > ?1 AND retry_count < ?2
             ORDER BY id
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![after_id, max_retries, limit as i64], |row| {
                let reason: String = row.get(3)?;
                Ok(DeadLetterRow {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    source_offset: row.get(2)?,
                    reason: DeadLetterReason::parse(&reason)
                        .unwrap_or(DeadLetterReason::IngestError),
                    payload: row.get(4)?,
                    retry_count: row.get(5)?,
                    created_at: row.get(6)?,
                    last_retried_at: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove a row after successful promotion into the event log.
    pub fn resolve(tx: &Transaction<'_>, id: i64) -> Result<()> {
        tx.execute("DELETE FROM dead_letter_events WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Record a failed repair attempt.
    pub fn record_retry(tx: &Transaction<'_>, id: i64) -> Result<()> {
        tx.execute(
            "UPDATE dead_letter_events
             SET retry_count = retry_count + 1, last_retried_at = ?2
             WHERE id = ?1",
            params![id, Utc::now()],
        )?;
        Ok(())
    }

    /// Total rows, for status documents.
    pub fn total(conn: &Connection) -> Result<i64> {
        let count =
            conn.query_row("SELECT COUNT(*) FROM dead_letter_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Reason of the most recent row, for status documents.
    pub fn last_reason(conn: &Connection) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;
        let reason = conn
            .query_row(
                "SELECT reason FROM dead_letter_events ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(reason)
    }

    /// Delete rows older than `cutoff` that exhausted their repair
    /// attempts. Returns rows removed.
    pub fn purge_exhausted(
        tx: &Transaction<'_>,
        cutoff: DateTime<Utc>,
        max_retries: i64,
    ) -> Result<usize> {
        let purged = tx.execute(
            "DELETE FROM dead_letter_events
             WHERE created_at < ?1 AND retry_count >= ?2",
            params![cutoff, max_retries],
        )?;
        Ok(purged)
    }

    /// Whether a row exists for `(source, offset, reason)`; used by the
    /// dead-letter completeness check in tests and health probes.
    pub fn exists(
        conn: &Connection,
        source: &str,
        source_offset: i64,
        reason: DeadLetterReason,
    ) -> Result<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM dead_letter_events
             WHERE source = ?1 AND source_offset = ?2 AND reason = ?3)",
            params![source, source_offset, reason.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::migrate::migrate;

    #[test]
    fn test_push_page_resolve_cycle() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();

        store
            .with_tx(|tx| {
                DeadLetterRepo::push(tx, "/logs/a.json", 10, DeadLetterReason::Parse, "{oops")?;
                DeadLetterRepo::push(
                    tx,
                    "/logs/a.json",
                    55,
                    DeadLetterReason::Validation,
                    r#"{"eventid":"other.thing"}"#,
                )
            })
            .unwrap();
        assert_eq!(DeadLetterRepo::total(store.conn()).unwrap(), 2);
        assert_eq!(
            DeadLetterRepo::last_reason(store.conn()).unwrap().as_deref(),
            Some("validation")
        );

        let page = DeadLetterRepo::page_for_repair(store.conn(), 0, 5, 10).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].reason, DeadLetterReason::Parse);

        let first_id = page[0].id;
        store
            .with_tx(|tx| {
                DeadLetterRepo::resolve(tx, first_id)?;
                DeadLetterRepo::record_retry(tx, page[1].id)
            })
            .unwrap();
        assert_eq!(DeadLetterRepo::total(store.conn()).unwrap(), 1);

        let page = DeadLetterRepo::page_for_repair(store.conn(), 0, 5, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].retry_count, 1);
        assert!(page[0].last_retried_at.is_some());
    }

    #[test]
    fn test_retry_cap_hides_rows() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();

        store
            .with_tx(|tx| {
                DeadLetterRepo::push(tx, "/logs/a.json", 0, DeadLetterReason::Parse, "{")?;
                DeadLetterRepo::record_retry(tx, 1)?;
                DeadLetterRepo::record_retry(tx, 1)
            })
            .unwrap();

        assert!(DeadLetterRepo::page_for_repair(store.conn(), 0, 2, 10)
            .unwrap()
            .is_empty());
        assert_eq!(
            DeadLetterRepo::page_for_repair(store.conn(), 0, 3, 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_exists_matches_tuple() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();

        store
            .with_tx(|tx| {
                DeadLetterRepo::push(tx, "/logs/a.json", 42, DeadLetterReason::Parse, "{")
            })
            .unwrap();
        assert!(DeadLetterRepo::exists(
            store.conn(),
            "/logs/a.json",
            42,
            DeadLetterReason::Parse
        )
        .unwrap());
        assert!(!DeadLetterRepo::exists(
            store.conn(),
            "/logs/a.json",
            42,
            DeadLetterReason::Validation
        )
        .unwrap());
    }
}
