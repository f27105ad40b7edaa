//! File artifact tracking.
//!
//! Artifacts are keyed by their SHA-256 as reported in
//! `cowrie.session.file_download` events. URL samples are bounded; the
//! reputation verdict is attached later by the enrichment cascade.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// Maximum URL samples kept per artifact.
const MAX_URL_SAMPLES: usize = 10;

/// A stored file artifact row.
#[derive(Debug, Clone)]
pub struct FileArtifactRow {
    pub sha256: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub size: Option<i64>,
    pub url_samples: Vec<String>,
    pub vt_analysis: Option<serde_json::Value>,
    pub vt_flagged: Option<bool>,
}

/// Repository for file artifacts.
pub struct FileArtifactRepo;

impl FileArtifactRepo {
    /// Record a download observation.
    pub fn record(
        tx: &Transaction<'_>,
        sha256: &str,
        url: Option<&str>,
        size: Option<i64>,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let existing: Option<String> = tx
            .query_row(
                "SELECT url_samples FROM file_artifacts WHERE sha256 = ?1",
                params![sha256],
                |row| row.get(0),
            )
            .optional()?;
        let mut samples: Vec<String> = match &existing {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        if let Some(url) = url {
            if samples.len() < MAX_URL_SAMPLES && !samples.iter().any(|u| u == url) {
                samples.push(url.to_string());
            }
        }
        let samples_json = serde_json::to_string(&samples)?;

        tx.execute(
            "INSERT INTO file_artifacts (sha256, first_seen, last_seen, size, url_samples)
             VALUES (?1, ?2, ?2, ?3, ?4)
             ON CONFLICT (sha256) DO UPDATE SET
                 first_seen  = MIN(file_artifacts.first_seen, excluded.first_seen),
                 last_seen   = MAX(file_artifacts.last_seen, excluded.last_seen),
                 size        = COALESCE(file_artifacts.size, excluded.size),
                 url_samples = excluded.url_samples",
            params![sha256, seen_at, size, samples_json],
        )?;
        Ok(())
    }

    /// Attach a reputation verdict.
    pub fn set_reputation(
        tx: &Transaction<'_>,
        sha256: &str,
        analysis: &serde_json::Value,
        flagged: bool,
    ) -> Result<()> {
        tx.execute(
            "UPDATE file_artifacts SET vt_analysis = ?2, vt_flagged = ?3 WHERE sha256 = ?1",
            params![sha256, serde_json::to_string(analysis)?, flagged],
        )?;
        Ok(())
    }

    /// Hashes never checked against the reputation source.
    pub fn unchecked_hashes(conn: &Connection, limit: usize) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT sha256 FROM file_artifacts
             WHERE vt_flagged IS NULL
             ORDER BY last_seen DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Sessions that downloaded a given artifact.
    pub fn sessions_for(conn: &Connection, sha256: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT session_id FROM raw_events
             WHERE event_type = 'cowrie.session.file_download'
               AND session_id IS NOT NULL
               AND payload LIKE '%' || ?1 || '%'",
        )?;
        let rows = stmt
            .query_map(params![sha256], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Load one artifact.
    pub fn get(conn: &Connection, sha256: &str) -> Result<Option<FileArtifactRow>> {
        let row = conn
            .query_row(
                "SELECT sha256, first_seen, last_seen, size, url_samples, vt_analysis, vt_flagged
                 FROM file_artifacts WHERE sha256 = ?1",
                params![sha256],
                |row| {
                    let samples: String = row.get(4)?;
                    let analysis: Option<String> = row.get(5)?;
                    Ok((
                        FileArtifactRow {
                            sha256: row.get(0)?,
                            first_seen: row.get(1)?,
                            last_seen: row.get(2)?,
                            size: row.get(3)?,
                            url_samples: Vec::new(),
                            vt_analysis: None,
                            vt_flagged: row.get(6)?,
                        },
                        samples,
                        analysis,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((mut artifact, samples, analysis)) => {
                artifact.url_samples = serde_json::from_str(&samples)?;
                artifact.vt_analysis = match analysis {
                    Some(json) => Some(serde_json::from_str(&json)?),
                    None => None,
                };
                Ok(Some(artifact))
            }
        }
    }
}
