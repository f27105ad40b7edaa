//! Shared pipeline machinery: event processing and the batch writer.
//!
//! A file worker turns raw input into [`WorkItem`]s; the batch writer
//! folds them into the store in one transaction per flush, with the
//! checkpoint update inside that same transaction.

use crate::error::Result;
use chrono::{DateTime, Utc};
use cp_common::{payload_hash, score_event, CowrieEvent, EventKind, QUARANTINE_THRESHOLD};
use cp_config::SitePolicy;
use cp_sanitize::{sanitize_url, sanitize_value};
use cp_store::{
    CheckpointRepo, DeadLetterReason, DeadLetterRepo, FileArtifactRepo, NewRawEvent,
    PasswordObservation, PasswordRepo, RawEventRepo, SessionDelta, SessionRepo,
    SshKeyObservation, SshKeyRepo, Store,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// One unit of work flowing from file workers to the batch writer.
#[derive(Debug)]
pub enum WorkItem {
    Event(Box<ProcessedEvent>),
    Dead {
        source: String,
        offset: i64,
        reason: DeadLetterReason,
        raw: String,
    },
    /// End of one file; carries the final decompressed offset so the
    /// checkpoint lands even when every trailing event was a duplicate.
    FileDone {
        source: String,
        inode: Option<String>,
        final_offset: i64,
    },
    /// A file that could not be read to the end.
    FileFailed { source: String, detail: String },
}

/// A fully processed event ready for the store.
#[derive(Debug)]
pub struct ProcessedEvent {
    pub raw: NewRawEvent,
    /// Offset of the first byte after this event, for checkpointing.
    pub end_offset: i64,
    pub kind: EventKind,
    pub src_ip: Option<String>,
    pub facts: Vec<Fact>,
    pub sanitize_modified: bool,
}

/// Side facts extracted from an event.
#[derive(Debug)]
pub enum Fact {
    Password(PasswordObservation),
    SshKey(SshKeyObservation),
    Download {
        sha256: String,
        url: Option<String>,
        size: Option<i64>,
        seen_at: DateTime<Utc>,
    },
}

/// Turn a parsed JSON value into a processed event, or a dead-letter
/// reason when it fails validation.
#[allow(clippy::too_many_arguments)]
pub fn process_value(
    mut value: Value,
    source: &str,
    offset: i64,
    end_offset: i64,
    inode: Option<&str>,
    ingest_id: &str,
    policy: &SitePolicy,
) -> std::result::Result<Box<ProcessedEvent>, (DeadLetterReason, String)> {
    let outcome = CowrieEvent::validate(&value);
    if !outcome.valid {
        return Err((DeadLetterReason::Validation, value.to_string()));
    }

    // Sanitize only after a successful parse, never during
    // accumulation.
    let stats = sanitize_value(&mut value);

    let Some(event) = CowrieEvent::from_value(value) else {
        // Sanitization can only remove characters, but re-validate so
        // the invariant "stored events validated" is enforced in one
        // place.
        return Err((
            DeadLetterReason::Sanitize,
            "event no longer valid after sanitization".to_string(),
        ));
    };

    let ingest_at = Utc::now();
    let risk = score_event(&event);
    let session_id = event.session().map(String::from);
    let src_ip = event.src_ip().map(String::from);
    let facts = extract_facts(&event, policy);
    let kind = event.kind();
    let event_type = event.eventid().to_string();
    let event_timestamp = event.timestamp();
    let payload = event.into_payload();

    let raw = NewRawEvent {
        ingest_id: ingest_id.to_string(),
        ingest_at,
        source: source.to_string(),
        source_offset: offset,
        source_inode: inode.map(String::from),
        payload_hash: payload_hash(&payload),
        payload: payload.to_string(),
        session_id,
        event_type,
        event_timestamp,
        risk_score: risk,
        quarantined: risk >= QUARANTINE_THRESHOLD,
    };

    Ok(Box::new(ProcessedEvent {
        raw,
        end_offset,
        kind,
        src_ip,
        facts,
        sanitize_modified: !stats.is_clean(),
    }))
}

fn extract_facts(event: &CowrieEvent, policy: &SitePolicy) -> Vec<Fact> {
    let Some(session) = event.session() else {
        return Vec::new();
    };
    let seen_at = event.timestamp();
    let mut facts = Vec::new();

    match event.kind() {
        EventKind::LoginSuccess | EventKind::LoginFailed => {
            if let (Some(username), Some(password)) =
                (event.str_field("username"), event.str_field("password"))
            {
                facts.push(Fact::Password(PasswordObservation {
                    password_hash: cp_common::sha256_hex(password.as_bytes()),
                    password_text: policy
                        .retain_password_text
                        .then(|| password.to_string()),
                    username: username.to_string(),
                    session_id: session.to_string(),
                    seen_at,
                }));
            }
        }
        EventKind::ClientFingerprint => {
            if let Some(fingerprint) = event.str_field("fingerprint") {
                facts.push(Fact::SshKey(SshKeyObservation {
                    key_type: event.str_field("key_type").unwrap_or("unknown").to_string(),
                    key_data: event.str_field("key").unwrap_or_default().to_string(),
                    fingerprint: fingerprint.to_string(),
                    key_hash: event
                        .str_field("key")
                        .map(|k| cp_common::sha256_hex(k.as_bytes())),
                    key_comment: event.str_field("comment").map(String::from),
                    key_bits: event.payload().get("bits").and_then(Value::as_i64),
                    session_id: session.to_string(),
                    source_ip: event.src_ip().map(String::from),
                    seen_at,
                }));
            }
        }
        EventKind::FileDownload => {
            if let Some(shasum) = event.str_field("shasum") {
                facts.push(Fact::Download {
                    sha256: shasum.to_string(),
                    url: event.str_field("url").map(sanitize_url),
                    size: event.payload().get("size").and_then(Value::as_i64),
                    seen_at,
                });
            }
        }
        _ => {}
    }

    facts
}

/// Counters a loader reports at the end of a run.
#[derive(Debug, Default, Clone)]
pub struct BatchStats {
    pub events_parsed: u64,
    pub events_inserted: u64,
    pub duplicates: u64,
    pub dead_letters: u64,
    pub sessions_touched: u64,
    pub sanitize_modified: u64,
    pub quarantined: u64,
    pub files_failed: u64,
    pub batches_committed: u64,
}

/// Accumulates work items and flushes them transactionally.
pub struct BatchWriter {
    phase: &'static str,
    events: Vec<Box<ProcessedEvent>>,
    dead: Vec<(String, i64, DeadLetterReason, String)>,
    /// Highest end offset (and inode) seen per source.
    checkpoints: HashMap<String, (i64, Option<String>)>,
    pub stats: BatchStats,
}

impl BatchWriter {
    pub fn new(phase: &'static str) -> Self {
        BatchWriter {
            phase,
            events: Vec::new(),
            dead: Vec::new(),
            checkpoints: HashMap::new(),
            stats: BatchStats::default(),
        }
    }

    /// Buffer one work item. Returns the number of buffered events.
    pub fn push(&mut self, item: WorkItem) -> usize {
        match item {
            WorkItem::Event(event) => {
                self.stats.events_parsed += 1;
                if event.sanitize_modified {
                    self.stats.sanitize_modified += 1;
                }
                if event.raw.quarantined {
                    self.stats.quarantined += 1;
                }
                let entry = self
                    .checkpoints
                    .entry(event.raw.source.clone())
                    .or_insert((0, event.raw.source_inode.clone()));
                entry.0 = entry.0.max(event.end_offset);
                self.events.push(event);
            }
            WorkItem::Dead {
                source,
                offset,
                reason,
                raw,
            } => {
                self.stats.dead_letters += 1;
                self.dead.push((source, offset, reason, raw));
            }
            WorkItem::FileDone {
                source,
                inode,
                final_offset,
            } => {
                let entry = self.checkpoints.entry(source).or_insert((0, inode.clone()));
                entry.0 = entry.0.max(final_offset);
                entry.1 = inode;
            }
            WorkItem::FileFailed { source, detail } => {
                self.stats.files_failed += 1;
                debug!(source, detail, "file failed mid-read");
            }
        }
        self.events.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.dead.is_empty() && self.checkpoints.is_empty()
    }

    /// Flush everything buffered in one transaction.
    ///
    /// Duplicate rows are detected by the insert itself, and only the
    /// newly inserted events feed aggregates and fact tables; that is
    /// what makes re-running a file a true no-op.
    pub fn flush(&mut self, store: &mut Store) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let events = std::mem::take(&mut self.events);
        let dead = std::mem::take(&mut self.dead);
        let checkpoints = std::mem::take(&mut self.checkpoints);
        let phase = self.phase;

        let (inserted, session_count) = store.with_tx(|tx| {
            let raw_rows: Vec<NewRawEvent> =
                events.iter().map(|event| event.raw.clone()).collect();
            let inserted_flags = RawEventRepo::insert_batch(tx, &raw_rows)?;
            let fresh: Vec<&ProcessedEvent> = events
                .iter()
                .zip(&inserted_flags)
                .filter(|(_, inserted)| **inserted)
                .map(|(event, _)| event.as_ref())
                .collect();

            let deltas = compute_session_deltas(fresh.iter().copied());
            for delta in &deltas {
                SessionRepo::apply_delta(tx, delta)?;
            }

            for event in &fresh {
                for fact in &event.facts {
                    match fact {
                        Fact::Password(obs) => PasswordRepo::record(tx, obs)?,
                        Fact::SshKey(obs) => {
                            SshKeyRepo::record(tx, obs)?;
                            SessionRepo::refresh_unique_ssh_keys(tx, &obs.session_id)?;
                        }
                        Fact::Download {
                            sha256,
                            url,
                            size,
                            seen_at,
                        } => FileArtifactRepo::record(
                            tx,
                            sha256,
                            url.as_deref(),
                            *size,
                            *seen_at,
                        )?,
                    }
                }
            }

            for (source, offset, reason, raw) in &dead {
                DeadLetterRepo::push(tx, source, *offset, *reason, raw)?;
            }

            for (source, (offset, inode)) in &checkpoints {
                CheckpointRepo::put(tx, phase, source, *offset, inode.as_deref())?;
            }

            Ok((fresh.len(), deltas.len() as u64))
        })?;

        self.stats.events_inserted += inserted as u64;
        self.stats.duplicates += (events.len() - inserted) as u64;
        self.stats.sessions_touched += session_count;
        self.stats.batches_committed += 1;
        debug!(
            phase,
            events = events.len(),
            inserted,
            dead = dead.len(),
            "batch committed"
        );
        Ok(())
    }
}

/// Fold a batch's events into per-(session, source) deltas.
fn compute_session_deltas<'a>(events: impl Iterator<Item = &'a ProcessedEvent>) -> Vec<SessionDelta> {
    let mut deltas: HashMap<(String, String), SessionDelta> = HashMap::new();
    // Earliest connect timestamp per session decides the canonical IP.
    let mut connect_seen: HashMap<(String, String), DateTime<Utc>> = HashMap::new();

    for event in events {
        let Some(session_id) = event.raw.session_id.clone() else {
            continue;
        };
        let key = (session_id.clone(), event.raw.source.clone());
        let at = event.raw.event_timestamp;

        let delta = deltas.entry(key.clone()).or_insert_with(|| SessionDelta {
            session_id,
            first_event_at: at,
            last_event_at: at,
            event_count: 0,
            command_count: 0,
            login_attempts: 0,
            file_downloads: 0,
            ssh_key_injections: 0,
            max_risk: 0,
            source_file: event.raw.source.clone(),
            source_ip: None,
        });

        delta.first_event_at = delta.first_event_at.min(at);
        delta.last_event_at = delta.last_event_at.max(at);
        delta.event_count += 1;
        delta.max_risk = delta.max_risk.max(event.raw.risk_score);
        match event.kind {
            EventKind::CommandInput => delta.command_count += 1,
            EventKind::LoginSuccess | EventKind::LoginFailed => delta.login_attempts += 1,
            EventKind::FileDownload => delta.file_downloads += 1,
            EventKind::ClientFingerprint => delta.ssh_key_injections += 1,
            _ => {}
        }

        if event.kind == EventKind::SessionConnect {
            if let Some(ip) = &event.src_ip {
                let earliest = connect_seen.entry(key.clone()).or_insert(at);
                if at <= *earliest {
                    *earliest = at;
                    delta.source_ip = Some(ip.clone());
                }
            }
        }
    }

    deltas.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_store::migrate;
    use serde_json::json;

    fn policy() -> SitePolicy {
        SitePolicy::default()
    }

    fn connect(session: &str, ts: &str, ip: &str) -> Value {
        json!({
            "eventid": "cowrie.session.connect",
            "timestamp": ts,
            "session": session,
            "src_ip": ip
        })
    }

    #[test]
    fn test_process_value_builds_raw_event() {
        let processed = process_value(
            connect("s1", "2026-07-30T12:00:00Z", "203.0.113.9"),
            "/logs/a.json",
            0,
            120,
            Some("dev:1"),
            "ing-x",
            &policy(),
        )
        .unwrap();
        assert_eq!(processed.raw.source_offset, 0);
        assert_eq!(processed.end_offset, 120);
        assert_eq!(processed.raw.session_id.as_deref(), Some("s1"));
        assert_eq!(processed.raw.event_type, "cowrie.session.connect");
        assert!(!processed.raw.quarantined);
        assert_eq!(processed.raw.payload_hash.len(), 64);
    }

    #[test]
    fn test_process_value_rejects_invalid() {
        let err = process_value(
            json!({"eventid": "nope"}),
            "/logs/a.json",
            0,
            10,
            None,
            "ing-x",
            &policy(),
        )
        .unwrap_err();
        assert_eq!(err.0, DeadLetterReason::Validation);
    }

    #[test]
    fn test_login_event_yields_password_fact_without_cleartext() {
        let processed = process_value(
            json!({
                "eventid": "cowrie.login.failed",
                "timestamp": "2026-07-30T12:00:00Z",
                "session": "s1",
                "username": "root",
                "password": "123456"
            }),
            "/logs/a.json",
            0,
            80,
            None,
            "ing-x",
            &policy(),
        )
        .unwrap();
        assert_eq!(processed.facts.len(), 1);
        match &processed.facts[0] {
            Fact::Password(obs) => {
                assert_eq!(obs.username, "root");
                assert_eq!(obs.password_text, None);
                assert_eq!(obs.password_hash.len(), 64);
            }
            other => panic!("expected password fact, got {other:?}"),
        }
    }

    #[test]
    fn test_cleartext_retained_when_policy_allows() {
        let mut policy = policy();
        policy.retain_password_text = true;
        let processed = process_value(
            json!({
                "eventid": "cowrie.login.success",
                "timestamp": "2026-07-30T12:00:00Z",
                "session": "s1",
                "username": "root",
                "password": "hunter2"
            }),
            "/logs/a.json",
            0,
            80,
            None,
            "ing-x",
            &policy,
        )
        .unwrap();
        match &processed.facts[0] {
            Fact::Password(obs) => assert_eq!(obs.password_text.as_deref(), Some("hunter2")),
            other => panic!("expected password fact, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_writer_flush_and_checkpoint() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();
        let mut writer = BatchWriter::new("bulk_ingest");

        for (i, ts) in ["2026-07-30T12:00:00Z", "2026-07-30T12:00:05Z"]
            .iter()
            .enumerate()
        {
            let processed = process_value(
                connect("s1", ts, "203.0.113.9"),
                "/logs/a.json",
                (i * 100) as i64,
                ((i + 1) * 100) as i64,
                Some("dev:1"),
                "ing-x",
                &policy(),
            )
            .unwrap();
            writer.push(WorkItem::Event(processed));
        }
        writer.push(WorkItem::Dead {
            source: "/logs/a.json".into(),
            offset: 230,
            reason: DeadLetterReason::Parse,
            raw: "{torn".into(),
        });
        writer.flush(&mut store).unwrap();

        assert_eq!(writer.stats.events_inserted, 2);
        assert_eq!(writer.stats.dead_letters, 1);
        assert_eq!(writer.stats.sessions_touched, 1);

        let cp = CheckpointRepo::get(store.conn(), "bulk_ingest", "/logs/a.json")
            .unwrap()
            .unwrap();
        assert_eq!(cp.source_offset, 200);

        let summary = SessionRepo::get(store.conn(), "s1").unwrap().unwrap();
        assert_eq!(summary.event_count, 2);
        assert_eq!(summary.source_ip.as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_deltas_pick_earliest_connect_ip() {
        let later = process_value(
            connect("s1", "2026-07-30T13:00:00Z", "198.51.100.7"),
            "/logs/a.json",
            0,
            50,
            None,
            "ing-x",
            &policy(),
        )
        .unwrap();
        let earlier = process_value(
            connect("s1", "2026-07-30T12:00:00Z", "203.0.113.9"),
            "/logs/a.json",
            50,
            100,
            None,
            "ing-x",
            &policy(),
        )
        .unwrap();

        let deltas = compute_session_deltas([later.as_ref(), earlier.as_ref()].into_iter());
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].source_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(deltas[0].event_count, 2);
    }
}
