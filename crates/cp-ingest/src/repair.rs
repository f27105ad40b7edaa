//! Dead-letter repair pass.
//!
//! Strategies, in order of invasiveness:
//! 1. direct re-parse (the original failure may have been transient
//!    tooling, or an earlier version's validator);
//! 2. multiline stitch: run the accumulator over the stored block,
//!    recovering events from flushed fragments;
//! 3. aggressive sanitize-then-parse for payloads poisoned by control
//!    bytes or escape-text forms.
//!
//! A recovered event is promoted through the normal batch path, so
//! dedup, session aggregation, and fact extraction all apply; the DLQ
//! row is deleted only after the promotion commits. Failures just
//! increment the retry counter.

use crate::error::Result;
use crate::multiline::{MultilineItem, MultilineParser};
use crate::pipeline::{process_value, BatchWriter, WorkItem};
use cp_common::CowrieEvent;
use cp_config::SitePolicy;
use cp_sanitize::sanitize_stored_text;
use cp_store::{DeadLetterRepo, DeadLetterRow, Store};
use serde::Serialize;
use serde_json::Value;
use std::io::Cursor;
use tracing::{debug, info};

/// Result of one repair run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairOutcome {
    pub examined: u64,
    pub promoted: u64,
    pub still_dead: u64,
    /// Exhausted rows removed under the retention policy.
    pub purged: u64,
}

/// Runs repair passes over the dead-letter queue.
pub struct RepairRunner {
    policy: SitePolicy,
    ingest_id: String,
    max_retries: i64,
    page_size: usize,
}

impl RepairRunner {
    pub fn new(policy: SitePolicy, ingest_id: String) -> Self {
        let max_retries = policy.dead_letter_max_retries as i64;
        RepairRunner {
            policy,
            ingest_id,
            max_retries,
            page_size: 200,
        }
    }

    /// Repair every eligible row once.
    pub fn run(&self, store: &mut Store) -> Result<RepairOutcome> {
        let mut outcome = RepairOutcome::default();
        let mut last_id = 0i64;

        loop {
            let page =
                DeadLetterRepo::page_for_repair(store.conn(), last_id, self.max_retries, self.page_size)?;
            if page.is_empty() {
                break;
            }
            last_id = page.last().map(|row| row.id).unwrap_or(last_id);
            outcome.examined += page.len() as u64;

            let mut writer = BatchWriter::new("dead_letter_replay");
            let mut resolved = Vec::new();
            let mut retried = Vec::new();

            for row in &page {
                match self.attempt(row) {
                    Some(values) if !values.is_empty() => {
                        let mut promoted_any = false;
                        for (offset, value) in values {
                            match process_value(
                                value,
                                &row.source,
                                offset,
                                offset,
                                None,
                                &self.ingest_id,
                                &self.policy,
                            ) {
                                Ok(event) => {
                                    writer.push(WorkItem::Event(event));
                                    promoted_any = true;
                                }
                                Err((reason, _)) => {
                                    debug!(id = row.id, ?reason, "repair produced invalid event");
                                }
                            }
                        }
                        if promoted_any {
                            resolved.push(row.id);
                        } else {
                            retried.push(row.id);
                        }
                    }
                    _ => retried.push(row.id),
                }
            }

            // Promote first; resolve second. A crash in between leaves
            // the DLQ row in place and the next pass converges through
            // dedup.
            writer.flush(store)?;
            outcome.promoted += resolved.len() as u64;
            outcome.still_dead += retried.len() as u64;
            store.with_tx(|tx| {
                for id in &resolved {
                    DeadLetterRepo::resolve(tx, *id)?;
                }
                for id in &retried {
                    DeadLetterRepo::record_retry(tx, *id)?;
                }
                Ok(())
            })?;
        }

        // Site policy may bound how long exhausted rows are kept.
        if let Some(days) = self.policy.dead_letter_retention_days {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
            let max_retries = self.max_retries;
            let purged = store
                .with_tx(move |tx| DeadLetterRepo::purge_exhausted(tx, cutoff, max_retries))?;
            outcome.purged = purged as u64;
        }

        info!(
            examined = outcome.examined,
            promoted = outcome.promoted,
            still_dead = outcome.still_dead,
            purged = outcome.purged,
            "dead-letter repair finished"
        );
        Ok(outcome)
    }

    /// Try each strategy; returns recovered `(offset, value)` pairs.
    fn attempt(&self, row: &DeadLetterRow) -> Option<Vec<(i64, Value)>> {
        if let Some(value) = try_direct(&row.payload) {
            return Some(vec![(row.source_offset, value)]);
        }
        let stitched = try_stitch(&row.payload, row.source_offset);
        if !stitched.is_empty() {
            return Some(stitched);
        }
        if let Some(value) = try_aggressive(&row.payload) {
            return Some(vec![(row.source_offset, value)]);
        }
        None
    }
}

fn try_direct(raw: &str) -> Option<Value> {
    let value = serde_json::from_str::<Value>(raw).ok()?;
    CowrieEvent::validate(&value).valid.then_some(value)
}

fn try_stitch(raw: &str, base_offset: i64) -> Vec<(i64, Value)> {
    let parser = MultilineParser::new(Cursor::new(raw.to_string()), 1_000);
    parser
        .filter_map(|item| item.ok())
        .filter_map(|item| match item {
            MultilineItem::Event {
                start_offset,
                value,
            } => Some((base_offset + start_offset as i64, value)),
            MultilineItem::Rejected { .. } => None,
        })
        .collect()
}

fn try_aggressive(raw: &str) -> Option<Value> {
    let cleaned = sanitize_stored_text(raw)?;
    try_direct(&cleaned)
}
