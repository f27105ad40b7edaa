//! Status document shapes.
//!
//! The JSON shape is a stable contract: consumers may add fields,
//! producers must not remove any without a version bump.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Phases that emit status documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BulkIngest,
    DeltaIngest,
    Enrichment,
    Sanitize,
    DeadLetterReplay,
    SnapshotBackfill,
}

impl Phase {
    /// File name for this phase's document.
    pub fn file_name(&self) -> &'static str {
        match self {
            Phase::BulkIngest => "bulk_ingest.json",
            Phase::DeltaIngest => "delta_ingest.json",
            Phase::Enrichment => "enrichment.json",
            Phase::Sanitize => "sanitize.json",
            Phase::DeadLetterReplay => "dead_letter_replay.json",
            Phase::SnapshotBackfill => "snapshot_backfill.json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BulkIngest => "bulk_ingest",
            Phase::DeltaIngest => "delta_ingest",
            Phase::Enrichment => "enrichment",
            Phase::Sanitize => "sanitize",
            Phase::DeadLetterReplay => "dead_letter_replay",
            Phase::SnapshotBackfill => "snapshot_backfill",
        }
    }

    /// Every phase, for the roll-up scan.
    pub fn all() -> &'static [Phase] {
        &[
            Phase::BulkIngest,
            Phase::DeltaIngest,
            Phase::Enrichment,
            Phase::Sanitize,
            Phase::DeadLetterReplay,
            Phase::SnapshotBackfill,
        ]
    }
}

/// Last checkpoint reached, when the phase is a loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckpointInfo {
    pub source: String,
    pub source_offset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_inode: Option<String>,
}

/// Dead-letter totals carried by every document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterInfo {
    pub total: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reason: Option<String>,
}

/// One phase's status document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub phase: String,
    pub ingest_id: String,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Free-form counters: records processed / updated / skipped /
    /// errored, per-source call and failure counts, and whatever else
    /// the phase tracks. BTreeMap keeps the serialization stable.
    pub metrics: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointInfo>,
    pub dead_letter: DeadLetterInfo,
}

impl StatusDocument {
    /// Start a document for a phase.
    pub fn new(phase: Phase, ingest_id: &str) -> Self {
        let now = Utc::now();
        StatusDocument {
            phase: phase.as_str().to_string(),
            ingest_id: ingest_id.to_string(),
            started_at: now,
            last_updated: now,
            metrics: BTreeMap::new(),
            checkpoint: None,
            dead_letter: DeadLetterInfo::default(),
        }
    }

    /// Set one metric counter.
    pub fn metric(&mut self, key: &str, value: impl Into<serde_json::Value>) -> &mut Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }

    /// Increment a numeric metric, creating it at zero.
    pub fn bump(&mut self, key: &str, by: u64) -> &mut Self {
        let current = self.metrics.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
        self.metrics
            .insert(key.to_string(), serde_json::json!(current + by));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_file_names() {
        assert_eq!(Phase::BulkIngest.file_name(), "bulk_ingest.json");
        assert_eq!(Phase::Enrichment.file_name(), "enrichment.json");
    }

    #[test]
    fn test_document_shape() {
        let mut doc = StatusDocument::new(Phase::BulkIngest, "ing-20260801-000000-abcd");
        doc.metric("records_processed", 102)
            .metric("records_errored", 0);
        doc.dead_letter = DeadLetterInfo {
            total: 3,
            last_reason: Some("parse".into()),
        };

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["phase"], "bulk_ingest");
        assert_eq!(json["metrics"]["records_processed"], 102);
        assert_eq!(json["dead_letter"]["total"], 3);
        assert!(json.get("checkpoint").is_none());
    }

    #[test]
    fn test_bump_accumulates() {
        let mut doc = StatusDocument::new(Phase::DeltaIngest, "ing-x");
        doc.bump("records_processed", 10);
        doc.bump("records_processed", 5);
        assert_eq!(doc.metrics["records_processed"], serde_json::json!(15));
    }

    #[test]
    fn test_consumer_fields_roundtrip() {
        // Consumers may add fields; unknown fields must not break
        // deserialization of the known shape.
        let raw = r#"{
            "phase": "enrichment",
            "ingest_id": "ing-x",
            "started_at": "2026-08-01T00:00:00Z",
            "last_updated": "2026-08-01T00:05:00Z",
            "metrics": {"ips_enriched": 7},
            "dead_letter": {"total": 0},
            "monitor_annotation": "added by consumer"
        }"#;
        let doc: StatusDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.phase, "enrichment");
        assert_eq!(doc.metrics["ips_enriched"], serde_json::json!(7));
    }
}
