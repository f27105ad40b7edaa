//! Session summary aggregation.
//!
//! Counters are additive and commutative, timestamp bounds use MIN/MAX,
//! and snapshot columns are write-once via COALESCE, so concurrent
//! writers and re-ingest runs converge on the same row. Timestamps are
//! stored RFC 3339 UTC, which makes lexicographic MIN/MAX equal to
//! chronological MIN/MAX.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// Per-batch aggregate for one session, computed by the loader.
#[derive(Debug, Clone)]
pub struct SessionDelta {
    pub session_id: String,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub event_count: i64,
    pub command_count: i64,
    pub login_attempts: i64,
    pub file_downloads: i64,
    pub ssh_key_injections: i64,
    /// Highest per-event risk score seen in the batch.
    pub max_risk: u8,
    /// File this batch came from; unioned into `source_files`.
    pub source_file: String,
    /// IP of the earliest connect event in the batch, if any.
    pub source_ip: Option<String>,
}

/// A stored session summary row.
#[derive(Debug, Clone)]
pub struct SessionSummaryRow {
    pub session_id: String,
    pub first_event_at: String,
    pub last_event_at: String,
    pub event_count: i64,
    pub command_count: i64,
    pub login_attempts: i64,
    pub file_downloads: i64,
    pub ssh_key_injections: i64,
    pub unique_ssh_keys: i64,
    pub vt_flagged: bool,
    pub dshield_flagged: bool,
    pub risk_score: i64,
    pub matcher: Option<String>,
    pub source_files: Vec<String>,
    pub enrichment: Option<serde_json::Value>,
    pub source_ip: Option<String>,
    pub snapshot_asn: Option<i64>,
    pub snapshot_country: Option<String>,
    pub snapshot_ip_type: Option<String>,
    pub enrichment_at: Option<String>,
}

/// Snapshot columns to seal for a session. Only NULL columns are
/// written; a sealed snapshot is never overwritten.
#[derive(Debug, Clone)]
pub struct SnapshotPatch {
    pub asn_number: Option<i64>,
    pub country_code: Option<String>,
    pub ip_type: String,
    pub enrichment_ts: DateTime<Utc>,
}

/// Repository for session summaries.
pub struct SessionRepo;

impl SessionRepo {
    /// Fold one batch delta into the summary row.
    pub fn apply_delta(tx: &Transaction<'_>, delta: &SessionDelta) -> Result<()> {
        // source_files union happens here, inside the write transaction,
        // so the read-modify-write cannot interleave with another batch.
        let existing: Option<String> = tx
            .query_row(
                "SELECT source_files FROM session_summaries WHERE session_id = ?1",
                params![delta.session_id],
                |row| row.get(0),
            )
            .optional()?;
        let mut files: Vec<String> = match existing {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        if !files.iter().any(|f| f == &delta.source_file) {
            files.push(delta.source_file.clone());
        }
        let files_json = serde_json::to_string(&files)?;

        tx.execute(
            "INSERT INTO session_summaries
             (session_id, first_event_at, last_event_at, event_count, command_count,
              login_attempts, file_downloads, ssh_key_injections, risk_score,
              source_files, source_ip)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (session_id) DO UPDATE SET
                 first_event_at     = MIN(first_event_at, excluded.first_event_at),
                 last_event_at      = MAX(last_event_at, excluded.last_event_at),
                 event_count        = event_count + excluded.event_count,
                 command_count      = command_count + excluded.command_count,
                 login_attempts     = login_attempts + excluded.login_attempts,
                 file_downloads     = file_downloads + excluded.file_downloads,
                 ssh_key_injections = ssh_key_injections + excluded.ssh_key_injections,
                 risk_score         = MAX(risk_score, excluded.risk_score),
                 source_files       = excluded.source_files,
                 source_ip          = COALESCE(source_ip, excluded.source_ip)",
            params![
                delta.session_id,
                delta.first_event_at,
                delta.last_event_at,
                delta.event_count,
                delta.command_count,
                delta.login_attempts,
                delta.file_downloads,
                delta.ssh_key_injections,
                delta.max_risk as i64,
                files_json,
                delta.source_ip,
            ],
        )?;
        Ok(())
    }

    /// Merge keys into the session's enrichment document; existing keys
    /// are kept, the document is never replaced wholesale.
    pub fn merge_enrichment(
        tx: &Transaction<'_>,
        session_id: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        let existing: Option<Option<String>> = tx
            .query_row(
                "SELECT enrichment FROM session_summaries WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(existing) = existing else {
            return Ok(());
        };
        let mut doc: serde_json::Value = match existing {
            Some(json) => serde_json::from_str(&json)?,
            None => serde_json::json!({}),
        };
        if let (Some(target), Some(source)) = (doc.as_object_mut(), patch.as_object()) {
            for (key, value) in source {
                target.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        tx.execute(
            "UPDATE session_summaries SET enrichment = ?2 WHERE session_id = ?1",
            params![session_id, serde_json::to_string(&doc)?],
        )?;
        Ok(())
    }

    /// Seal snapshot columns. NULL columns take the patch values; a
    /// non-NULL column is left exactly as it was.
    pub fn seal_snapshot(
        tx: &Transaction<'_>,
        session_id: &str,
        patch: &SnapshotPatch,
    ) -> Result<bool> {
        let updated = tx.execute(
            "UPDATE session_summaries SET
                 snapshot_asn     = COALESCE(snapshot_asn, ?2),
                 snapshot_country = COALESCE(snapshot_country, ?3),
                 snapshot_ip_type = COALESCE(snapshot_ip_type, ?4),
                 enrichment_at    = COALESCE(enrichment_at, ?5)
             WHERE session_id = ?1 AND enrichment_at IS NULL",
            params![
                session_id,
                patch.asn_number,
                patch.country_code,
                patch.ip_type,
                patch.enrichment_ts,
            ],
        )?;
        Ok(updated > 0)
    }

    /// Sessions whose snapshot columns are still unsealed, with their
    /// source IPs, up to `limit`.
    pub fn unsealed_with_ip(conn: &Connection, limit: usize) -> Result<Vec<(String, String)>> {
        let mut stmt = conn.prepare_cached(
            "SELECT session_id, source_ip FROM session_summaries
             WHERE source_ip IS NOT NULL AND enrichment_at IS NULL
             ORDER BY session_id
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Mark the session as flagged by file-hash reputation.
    pub fn set_vt_flagged(tx: &Transaction<'_>, session_id: &str) -> Result<()> {
        tx.execute(
            "UPDATE session_summaries SET vt_flagged = 1 WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    /// Mark the session as flagged by scanner intel.
    pub fn set_dshield_flagged(tx: &Transaction<'_>, session_id: &str) -> Result<()> {
        tx.execute(
            "UPDATE session_summaries SET dshield_flagged = 1 WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    /// Flag every session originating from an IP the scanner marked
    /// malicious.
    pub fn set_dshield_flagged_by_ip(tx: &Transaction<'_>, ip: &str) -> Result<usize> {
        let updated = tx.execute(
            "UPDATE session_summaries SET dshield_flagged = 1 WHERE source_ip = ?1",
            params![ip],
        )?;
        Ok(updated)
    }

    /// Refresh the distinct-key counter from the junction table.
    pub fn refresh_unique_ssh_keys(tx: &Transaction<'_>, session_id: &str) -> Result<()> {
        tx.execute(
            "UPDATE session_summaries SET unique_ssh_keys =
                 (SELECT COUNT(*) FROM session_ssh_keys WHERE session_id = ?1)
             WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    /// Load one summary row.
    pub fn get(conn: &Connection, session_id: &str) -> Result<Option<SessionSummaryRow>> {
        let row = conn
            .query_row(
                "SELECT session_id, first_event_at, last_event_at, event_count,
                        command_count, login_attempts, file_downloads, ssh_key_injections,
                        unique_ssh_keys, vt_flagged, dshield_flagged, risk_score, matcher,
                        source_files, enrichment, source_ip, snapshot_asn, snapshot_country,
                        snapshot_ip_type, enrichment_at
                 FROM session_summaries WHERE session_id = ?1",
                params![session_id],
                |row| {
                    let source_files: String = row.get(13)?;
                    let enrichment: Option<String> = row.get(14)?;
                    Ok((
                        SessionSummaryRow {
                            session_id: row.get(0)?,
                            first_event_at: row.get(1)?,
                            last_event_at: row.get(2)?,
                            event_count: row.get(3)?,
                            command_count: row.get(4)?,
                            login_attempts: row.get(5)?,
                            file_downloads: row.get(6)?,
                            ssh_key_injections: row.get(7)?,
                            unique_ssh_keys: row.get(8)?,
                            vt_flagged: row.get(9)?,
                            dshield_flagged: row.get(10)?,
                            risk_score: row.get(11)?,
                            matcher: row.get(12)?,
                            source_files: Vec::new(),
                            enrichment: None,
                            source_ip: row.get(15)?,
                            snapshot_asn: row.get(16)?,
                            snapshot_country: row.get(17)?,
                            snapshot_ip_type: row.get(18)?,
                            enrichment_at: row.get(19)?,
                        },
                        source_files,
                        enrichment,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((mut summary, files_json, enrichment_json)) => {
                summary.source_files = serde_json::from_str(&files_json)?;
                summary.enrichment = match enrichment_json {
                    Some(json) => Some(serde_json::from_str(&json)?),
                    None => None,
                };
                Ok(Some(summary))
            }
        }
    }

    /// Total sessions.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count =
            conn.query_row("SELECT COUNT(*) FROM session_summaries", [], |row| row.get(0))?;
        Ok(count)
    }
}
