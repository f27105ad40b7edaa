//! SSH key intelligence.
//!
//! Keys observed in `cowrie.client.fingerprint` events (and in
//! authorized_keys injection commands) are tracked by fingerprint with
//! attempt counters and session links.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};

/// One observed key offering.
#[derive(Debug, Clone)]
pub struct SshKeyObservation {
    pub key_type: String,
    pub key_data: String,
    /// SHA-256 fingerprint as emitted by Cowrie.
    pub fingerprint: String,
    pub key_hash: Option<String>,
    pub key_comment: Option<String>,
    pub key_bits: Option<i64>,
    pub session_id: String,
    pub source_ip: Option<String>,
    pub seen_at: DateTime<Utc>,
}

/// Repository for SSH key intelligence.
pub struct SshKeyRepo;

impl SshKeyRepo {
    /// Record one observation: upserts the key row, links the session,
    /// and refreshes the distinct counters.
    pub fn record(tx: &Transaction<'_>, obs: &SshKeyObservation) -> Result<()> {
        tx.execute(
            "INSERT INTO ssh_key_intelligence
             (key_type, key_data, key_fingerprint, key_hash, key_comment,
              first_seen, last_seen, total_attempts, key_bits)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 1, ?7)
             ON CONFLICT (key_fingerprint) DO UPDATE SET
                 last_seen      = MAX(ssh_key_intelligence.last_seen, excluded.last_seen),
                 first_seen     = MIN(ssh_key_intelligence.first_seen, excluded.first_seen),
                 total_attempts = ssh_key_intelligence.total_attempts + 1,
                 key_comment    = COALESCE(ssh_key_intelligence.key_comment, excluded.key_comment),
                 key_bits       = COALESCE(ssh_key_intelligence.key_bits, excluded.key_bits)",
            params![
                obs.key_type,
                obs.key_data,
                obs.fingerprint,
                obs.key_hash,
                obs.key_comment,
                obs.seen_at,
                obs.key_bits,
            ],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO session_ssh_keys (session_id, key_fingerprint, source_ip, seen_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![obs.session_id, obs.fingerprint, obs.source_ip, obs.seen_at],
        )?;
        Self::refresh_counters(tx, &obs.fingerprint)?;
        Ok(())
    }

    /// Recompute the distinct session/source counters from junctions.
    fn refresh_counters(tx: &Transaction<'_>, fingerprint: &str) -> Result<()> {
        tx.execute(
            "UPDATE ssh_key_intelligence SET
                 unique_sessions = (SELECT COUNT(DISTINCT session_id)
                                    FROM session_ssh_keys WHERE key_fingerprint = ?1),
                 unique_sources  = (SELECT COUNT(DISTINCT source_ip)
                                    FROM session_ssh_keys
                                    WHERE key_fingerprint = ?1 AND source_ip IS NOT NULL)
             WHERE key_fingerprint = ?1",
            params![fingerprint],
        )?;
        Ok(())
    }

    /// Total tracked keys.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM ssh_key_intelligence", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Attempts recorded for one fingerprint.
    pub fn attempts(conn: &Connection, fingerprint: &str) -> Result<Option<(i64, i64, i64)>> {
        use rusqlite::OptionalExtension;
        let row = conn
            .query_row(
                "SELECT total_attempts, unique_sessions, unique_sources
                 FROM ssh_key_intelligence WHERE key_fingerprint = ?1",
                params![fingerprint],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::migrate::migrate;

    fn obs(session: &str, ip: &str) -> SshKeyObservation {
        SshKeyObservation {
            key_type: "ssh-ed25519".into(),
            key_data: "AAAAC3NzaC1lZDI1NTE5AAAAIF8example".into(),
            fingerprint: "SHA256:f1e2d3".into(),
            key_hash: None,
            key_comment: Some("root@kali".into()),
            key_bits: Some(256),
            session_id: session.into(),
            source_ip: Some(ip.into()),
            seen_at: Utc::now(),
        }
    }

    #[test]
    fn test_counters_track_distinct_links() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();

        store
            .with_tx(|tx| {
                SshKeyRepo::record(tx, &obs("s1", "203.0.113.9"))?;
                SshKeyRepo::record(tx, &obs("s1", "203.0.113.9"))?;
                SshKeyRepo::record(tx, &obs("s2", "198.51.100.7"))
            })
            .unwrap();

        assert_eq!(SshKeyRepo::count(store.conn()).unwrap(), 1);
        let (attempts, sessions, sources) = SshKeyRepo::attempts(store.conn(), "SHA256:f1e2d3")
            .unwrap()
            .unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(sessions, 2);
        assert_eq!(sources, 2);
    }
}
