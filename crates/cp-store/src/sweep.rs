//! Sanitization sweeper: backfill cleaner for historical rows.
//!
//! Walks `raw_events` with cursor pagination, pre-filtered in SQL to
//! rows whose payload contains the forbidden escape pattern, confirms
//! each candidate with the shared regex, and rewrites in per-batch
//! transactions. No transaction spans batches, so interruption loses
//! at most one batch of progress and a re-run picks up where it left
//! off.

use crate::db::Store;
use crate::error::Result;
use cp_sanitize::{sanitize_stored_text, SWEEP_CONFIRM_REGEX, SWEEP_LIKE_PATTERN};
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, info};

/// Report from a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Rows whose payload would be rewritten.
    pub affected_rows: u64,

    /// Up to ten sample row ids for inspection.
    pub sample_ids: Vec<i64>,
}

/// Outcome of a real sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepOutcome {
    pub rows_scanned: u64,
    pub rows_rewritten: u64,
    pub batches: u64,
}

/// The sanitization sweeper.
pub struct Sweeper {
    batch_size: usize,
}

impl Default for Sweeper {
    fn default() -> Self {
        Sweeper { batch_size: 1_000 }
    }
}

impl Sweeper {
    pub fn new(batch_size: usize) -> Self {
        Sweeper {
            batch_size: batch_size.max(1),
        }
    }

    /// Count affected rows without touching anything.
    pub fn dry_run(&self, store: &Store) -> Result<SweepReport> {
        let mut affected = 0u64;
        let mut samples = Vec::new();
        let mut last_id = 0i64;

        loop {
            let page = self.candidate_page(store, last_id)?;
            if page.is_empty() {
                break;
            }
            last_id = page.last().map(|(id, _)| *id).unwrap_or(last_id);
            for (id, payload) in page {
                if SWEEP_CONFIRM_REGEX.is_match(&payload) {
                    affected += 1;
                    if samples.len() < 10 {
                        samples.push(id);
                    }
                }
            }
        }

        Ok(SweepReport {
            affected_rows: affected,
            sample_ids: samples,
        })
    }

    /// Rewrite affected rows. Each batch commits independently.
    pub fn run(&self, store: &mut Store) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome {
            rows_scanned: 0,
            rows_rewritten: 0,
            batches: 0,
        };
        let mut last_id = 0i64;

        loop {
            let page = self.candidate_page(store, last_id)?;
            if page.is_empty() {
                break;
            }
            last_id = page.last().map(|(id, _)| *id).unwrap_or(last_id);
            outcome.rows_scanned += page.len() as u64;

            let rewrites: Vec<(i64, String)> = page
                .into_iter()
                .filter_map(|(id, payload)| {
                    sanitize_stored_text(&payload).map(|cleaned| (id, cleaned))
                })
                .collect();
            if rewrites.is_empty() {
                continue;
            }

            let written = store.with_tx(|tx| {
                let mut stmt =
                    tx.prepare_cached("UPDATE raw_events SET payload = ?2 WHERE id = ?1")?;
                let mut written = 0u64;
                for (id, cleaned) in &rewrites {
                    written += stmt.execute(params![id, cleaned])? as u64;
                }
                Ok(written)
            })?;
            outcome.rows_rewritten += written;
            outcome.batches += 1;
            debug!(batch = outcome.batches, rows = written, "sweep batch committed");
        }

        info!(
            scanned = outcome.rows_scanned,
            rewritten = outcome.rows_rewritten,
            "sanitization sweep finished"
        );
        Ok(outcome)
    }

    /// One page of pre-filtered candidates after `last_id`.
    ///
    /// The LIKE pre-filter runs in SQL so clean rows never cross the
    /// process boundary; ESCAPE disables LIKE's own wildcard handling
    /// of the literal backslash in the pattern.
    fn candidate_page(&self, store: &Store, last_id: i64) -> Result<Vec<(i64, String)>> {
        let mut stmt = store.conn().prepare_cached(
            "SELECT id, payload FROM raw_events
             WHERE id > ?1 AND payload LIKE ?2 ESCAPE '#'
             ORDER BY id
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![last_id, SWEEP_LIKE_PATTERN, self.batch_size as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
