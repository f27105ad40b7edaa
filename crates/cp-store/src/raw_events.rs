//! Append-only raw event log.
//!
//! Rows are deduplicated on `(source, source_offset, payload_hash)` at
//! insert time with `INSERT OR IGNORE`, which makes reprocessing a file
//! idempotent without a read-before-write.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};

/// A raw event ready for insertion.
#[derive(Debug, Clone)]
pub struct NewRawEvent {
    pub ingest_id: String,
    pub ingest_at: DateTime<Utc>,
    pub source: String,
    pub source_offset: i64,
    pub source_inode: Option<String>,
    /// Sanitized payload, serialized once by the loader.
    pub payload: String,
    pub payload_hash: String,
    pub session_id: Option<String>,
    pub event_type: String,
    pub event_timestamp: DateTime<Utc>,
    pub risk_score: u8,
    pub quarantined: bool,
}

/// Repository for the raw event log.
pub struct RawEventRepo;

impl RawEventRepo {
    /// Insert a batch, ignoring duplicates. Returns one flag per input
    /// event: true when the row was new.
    ///
    /// Callers aggregate counters only over the true entries, which is
    /// what keeps re-ingesting a file from inflating session counts.
    pub fn insert_batch(tx: &Transaction<'_>, events: &[NewRawEvent]) -> Result<Vec<bool>> {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO raw_events
             (ingest_id, ingest_at, source, source_offset, source_inode,
              payload, payload_hash, session_id, event_type, event_timestamp,
              risk_score, quarantined)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        let mut inserted = Vec::with_capacity(events.len());
        for event in events {
            let changed = stmt.execute(params![
                event.ingest_id,
                event.ingest_at,
                event.source,
                event.source_offset,
                event.source_inode,
                event.payload,
                event.payload_hash,
                event.session_id,
                event.event_type,
                event.event_timestamp,
                event.risk_score as i64,
                event.quarantined,
            ])?;
            inserted.push(changed > 0);
        }
        Ok(inserted)
    }

    /// Total rows in the log.
    pub fn count(conn: &rusqlite::Connection) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM raw_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Rows flagged as quarantined.
    pub fn quarantined_count(conn: &rusqlite::Connection) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM raw_events WHERE quarantined = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::migrate::migrate;

    fn event(offset: i64, hash: &str) -> NewRawEvent {
        NewRawEvent {
            ingest_id: "ing-20260801-000000-abcd".into(),
            ingest_at: Utc::now(),
            source: "/logs/cowrie.json".into(),
            source_offset: offset,
            source_inode: Some("dev1:42".into()),
            payload: r#"{"eventid":"cowrie.session.connect"}"#.into(),
            payload_hash: hash.into(),
            session_id: Some("s1".into()),
            event_type: "cowrie.session.connect".into(),
            event_timestamp: Utc::now(),
            risk_score: 5,
            quarantined: false,
        }
    }

    #[test]
    fn test_duplicate_batch_is_ignored() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();

        let batch = vec![event(0, "h0"), event(120, "h1")];
        let first = store
            .with_tx(|tx| RawEventRepo::insert_batch(tx, &batch))
            .unwrap();
        assert_eq!(first, vec![true, true]);

        let second = store
            .with_tx(|tx| RawEventRepo::insert_batch(tx, &batch))
            .unwrap();
        assert_eq!(second, vec![false, false]);
        assert_eq!(RawEventRepo::count(store.conn()).unwrap(), 2);
    }

    #[test]
    fn test_same_hash_different_source_kept() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();

        let mut a = event(0, "same-hash");
        let mut b = event(0, "same-hash");
        a.source = "/logs/sensor-a.json".into();
        b.source = "/logs/sensor-b.json".into();

        let inserted = store
            .with_tx(|tx| RawEventRepo::insert_batch(tx, &[a, b]))
            .unwrap();
        assert_eq!(inserted, vec![true, true]);
    }

    #[test]
    fn test_quarantined_count() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();

        let mut risky = event(7, "hq");
        risky.risk_score = 91;
        risky.quarantined = true;
        store
            .with_tx(|tx| RawEventRepo::insert_batch(tx, &[event(0, "h0"), risky]))
            .unwrap();
        assert_eq!(RawEventRepo::quarantined_count(store.conn()).unwrap(), 1);
    }
}
