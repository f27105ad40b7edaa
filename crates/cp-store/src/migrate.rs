//! Versioned, idempotent, self-healing schema evolution.
//!
//! Rules every step obeys:
//! - Existence is checked before anything is created; running the full
//!   chain twice is a no-op.
//! - No step assumes its predecessors fully succeeded. Partial
//!   artifacts are either repaired (drop-and-recreate where the table
//!   holds only derived data) or reported with the documented recovery
//!   procedure.
//! - Foreign-keyed columns must match the referenced column's declared
//!   type exactly; step 16 validates this before sealing the version.
//! - Data backfills run in 1,000-row batches, one transaction each, so
//!   an interrupted backfill resumes instead of replaying.
//!
//! The advisory lock is a pair of `schema_state` rows claimed in an
//! IMMEDIATE transaction; a competing migrator fails fast with the
//! holder's identity instead of deadlocking.

use crate::db::Store;
use crate::error::{Result, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{info, warn};

/// Version the code expects after a full migration run.
pub const TARGET_VERSION: i64 = cp_common::SCHEMA_VERSION;

/// Rows per backfill batch.
const BACKFILL_BATCH: usize = 1_000;

/// Read the current schema version; 0 when the store is untouched.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_state')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_state WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Fail unless the store is exactly at [`TARGET_VERSION`].
pub fn require_current(conn: &Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found != TARGET_VERSION {
        return Err(StoreError::VersionMismatch {
            found,
            expected: TARGET_VERSION,
        });
    }
    Ok(())
}

/// Run all outstanding migrations on `store`.
pub fn migrate(store: &mut Store, holder: &str) -> Result<MigrationReport> {
    Migrator::new(store).run(holder)
}

/// Outcome of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: i64,
    pub to_version: i64,
    pub steps_applied: Vec<String>,
}

/// One migration step.
struct Step {
    version: i64,
    name: &'static str,
    /// Documented cleanup procedure, named in partial-state errors.
    recovery: &'static str,
    body: StepBody,
}

enum StepBody {
    /// Runs inside one transaction together with the version bump.
    Ddl(fn(&Transaction<'_>) -> Result<()>),
    /// Manages its own per-batch transactions; must be idempotent so an
    /// interrupted run can simply re-execute.
    Batched(fn(&mut Store) -> Result<()>),
}

/// The schema migrator. Single-threaded by contract; concurrency is
/// excluded by the advisory lock.
pub struct Migrator<'a> {
    store: &'a mut Store,
}

impl<'a> Migrator<'a> {
    pub fn new(store: &'a mut Store) -> Self {
        Migrator { store }
    }

    /// Apply every step above the current version, in order.
    pub fn run(&mut self, holder: &str) -> Result<MigrationReport> {
        self.bootstrap()?;
        self.acquire_lock(holder)?;
        let outcome = self.run_locked();
        // The lock is released on both success and failure; partial
        // state stays visible for the documented recovery.
        if let Err(release) = self.release_lock(holder) {
            warn!(error = %release, "failed to release migration lock");
        }
        outcome
    }

    fn run_locked(&mut self) -> Result<MigrationReport> {
        let from_version = schema_version(self.store.conn())?;
        let mut applied = Vec::new();

        for step in steps() {
            if step.version <= from_version {
                continue;
            }
            info!(version = step.version, name = step.name, "applying migration step");
            let version = step.version;
            let result = match step.body {
                StepBody::Ddl(apply) => self.store.with_tx(|tx| {
                    apply(tx)?;
                    set_version(tx, version)
                }),
                StepBody::Batched(apply) => apply(self.store)
                    .and_then(|_| self.store.with_tx(|tx| set_version(tx, version))),
            };
            if let Err(err) = result {
                return Err(annotate_step_failure(version, step.recovery, err));
            }
            applied.push(format!("v{} {}", step.version, step.name));
        }

        Ok(MigrationReport {
            from_version,
            to_version: schema_version(self.store.conn())?,
            steps_applied: applied,
        })
    }

    /// Create schema_state itself; the one piece of DDL that cannot be
    /// a step because steps are recorded in it.
    fn bootstrap(&mut self) -> Result<()> {
        self.store.with_tx(|tx| {
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_state (
                     key   TEXT PRIMARY KEY,
                     value TEXT NOT NULL
                 );
                 INSERT OR IGNORE INTO schema_state (key, value) VALUES ('schema_version', '0');",
            )?;
            Ok(())
        })
    }

    fn acquire_lock(&mut self, holder: &str) -> Result<()> {
        let holder = holder.to_string();
        self.store.with_tx(move |tx| {
            let existing: Option<(String, String)> = tx
                .query_row(
                    "SELECT h.value, s.value
                     FROM schema_state h, schema_state s
                     WHERE h.key = 'migration_lock_holder' AND s.key = 'migration_lock_since'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((existing_holder, since)) = existing {
                return Err(StoreError::MigrationLockHeld {
                    holder: existing_holder,
                    since,
                });
            }
            let now = chrono::Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO schema_state (key, value) VALUES ('migration_lock_holder', ?1)",
                params![holder],
            )?;
            tx.execute(
                "INSERT INTO schema_state (key, value) VALUES ('migration_lock_since', ?1)",
                params![now],
            )?;
            Ok(())
        })
    }

    fn release_lock(&mut self, holder: &str) -> Result<()> {
        let holder = holder.to_string();
        self.store.with_tx(move |tx| {
            tx.execute(
                "DELETE FROM schema_state
                 WHERE key IN ('migration_lock_holder', 'migration_lock_since')
                   AND EXISTS (SELECT 1 FROM schema_state
                               WHERE key = 'migration_lock_holder' AND value = ?1)",
                params![holder],
            )?;
            Ok(())
        })
    }
}

/// Attach the step's documented recovery procedure to a failure.
///
/// Type-mismatch, lock, and transient-busy errors keep their own
/// shapes; anything else failing mid-step is, by definition, partial
/// state.
fn annotate_step_failure(version: i64, recovery: &'static str, err: StoreError) -> StoreError {
    match err {
        caught @ (StoreError::FkTypeMismatch { .. }
        | StoreError::MigrationLockHeld { .. }
        | StoreError::PartialState { .. }
        | StoreError::Busy(_)) => caught,
        other => StoreError::PartialState {
            version,
            detail: other.to_string(),
            recovery: recovery.to_string(),
        },
    }
}

fn set_version(tx: &Transaction<'_>, version: i64) -> Result<()> {
    tx.execute(
        "UPDATE schema_state SET value = ?1 WHERE key = 'schema_version'",
        params![version.to_string()],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Introspection helpers
// ---------------------------------------------------------------------------

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![table],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2)",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn declared_type(conn: &Connection, table: &str, column: &str) -> Result<Option<String>> {
    let declared: Option<String> = conn
        .query_row(
            "SELECT type FROM pragma_table_info(?1) WHERE name = ?2",
            params![table, column],
            |row| row.get(0),
        )
        .optional()?;
    Ok(declared)
}

fn index_exists(conn: &Connection, index: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
        params![index],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Compare a foreign-key column's declared type with its referent.
fn validate_fk_type(
    conn: &Connection,
    table: &str,
    column: &str,
    ref_table: &str,
    ref_column: &str,
) -> Result<()> {
    let found = declared_type(conn, table, column)?.unwrap_or_default();
    let expected = declared_type(conn, ref_table, ref_column)?.unwrap_or_default();
    if found != expected {
        return Err(StoreError::FkTypeMismatch {
            table: table.to_string(),
            column: column.to_string(),
            found,
            ref_table: ref_table.to_string(),
            ref_column: ref_column.to_string(),
            expected,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Step catalog
// ---------------------------------------------------------------------------

fn steps() -> Vec<Step> {
    vec![
        Step {
            version: 1,
            name: "create raw_events",
            recovery: "DROP TABLE raw_events and re-run migrate (log re-ingest restores it)",
            body: StepBody::Ddl(step_raw_events),
        },
        Step {
            version: 2,
            name: "index raw_events",
            recovery: "DROP INDEX idx_raw_events_session / idx_raw_events_ts and re-run migrate",
            body: StepBody::Ddl(step_raw_event_indexes),
        },
        Step {
            version: 3,
            name: "create session_summaries",
            recovery: "DROP TABLE session_summaries and re-run migrate (aggregates rebuild on re-ingest)",
            body: StepBody::Ddl(step_session_summaries),
        },
        Step {
            version: 4,
            name: "create dead_letter_events",
            recovery: "DROP TABLE dead_letter_events and re-run migrate",
            body: StepBody::Ddl(step_dead_letter),
        },
        Step {
            version: 5,
            name: "create ingest_checkpoints",
            recovery: "DROP TABLE ingest_checkpoints and re-run migrate (loaders restart from offset 0)",
            body: StepBody::Ddl(step_checkpoints),
        },
        Step {
            version: 6,
            name: "create ssh_key_intelligence",
            recovery: "DROP TABLE ssh_key_intelligence, session_ssh_keys and re-run migrate",
            body: StepBody::Ddl(step_ssh_keys),
        },
        Step {
            version: 7,
            name: "create password_tracking",
            recovery: "DROP TABLE password_tracking, session_passwords and re-run migrate",
            body: StepBody::Ddl(step_passwords),
        },
        Step {
            version: 8,
            name: "create file_artifacts",
            recovery: "DROP TABLE file_artifacts and re-run migrate",
            body: StepBody::Ddl(step_file_artifacts),
        },
        Step {
            version: 9,
            name: "create enrichment_cache",
            recovery: "DROP TABLE enrichment_cache and re-run migrate (cache rebuilds on demand)",
            body: StepBody::Ddl(step_enrichment_cache),
        },
        Step {
            version: 10,
            name: "secondary indexes",
            recovery: "DROP INDEX idx_cache_expires / idx_sessions_source_ip and re-run migrate",
            body: StepBody::Ddl(step_secondary_indexes),
        },
        Step {
            version: 11,
            name: "add raw_events risk columns",
            recovery: "no action needed; the step re-checks column presence",
            body: StepBody::Ddl(step_risk_columns),
        },
        Step {
            version: 12,
            name: "backfill raw_events risk defaults",
            recovery: "re-run migrate; the backfill resumes where it stopped",
            body: StepBody::Batched(step_risk_backfill),
        },
        Step {
            version: 13,
            name: "create asn_inventory",
            recovery: "DROP TABLE asn_inventory and re-run migrate (rebuilt by enrichment)",
            body: StepBody::Ddl(step_asn_inventory),
        },
        Step {
            version: 14,
            name: "create ip_inventory",
            recovery: "DROP TABLE ip_inventory and re-run migrate (rebuilt by enrichment)",
            body: StepBody::Ddl(step_ip_inventory),
        },
        Step {
            version: 15,
            name: "add ip_inventory provenance columns",
            recovery: "DROP TABLE ip_inventory and re-run migrate (rebuilt by enrichment)",
            body: StepBody::Ddl(step_ip_provenance),
        },
        Step {
            version: 16,
            name: "add session snapshot columns",
            recovery: "DROP TABLE ip_inventory and re-run migrate; snapshot columns are only ever NULL-filled",
            body: StepBody::Ddl(step_session_snapshots),
        },
    ]
}

fn step_raw_events(tx: &Transaction<'_>) -> Result<()> {
    if table_exists(tx, "raw_events")? {
        return Ok(());
    }
    tx.execute_batch(
        "CREATE TABLE raw_events (
             id              INTEGER PRIMARY KEY AUTOINCREMENT,
             ingest_id       TEXT NOT NULL,
             ingest_at       TEXT NOT NULL,
             source          TEXT NOT NULL,
             source_offset   INTEGER NOT NULL,
             source_inode    TEXT,
             payload         TEXT NOT NULL,
             payload_hash    TEXT NOT NULL,
             session_id      TEXT,
             event_type      TEXT NOT NULL,
             event_timestamp TEXT NOT NULL,
             UNIQUE (source, source_offset, payload_hash)
         );",
    )?;
    Ok(())
}

fn step_raw_event_indexes(tx: &Transaction<'_>) -> Result<()> {
    if !index_exists(tx, "idx_raw_events_session")? {
        tx.execute_batch(
            "CREATE INDEX idx_raw_events_session ON raw_events (session_id);",
        )?;
    }
    if !index_exists(tx, "idx_raw_events_ts")? {
        tx.execute_batch(
            "CREATE INDEX idx_raw_events_ts ON raw_events (event_timestamp);",
        )?;
    }
    Ok(())
}

fn step_session_summaries(tx: &Transaction<'_>) -> Result<()> {
    if table_exists(tx, "session_summaries")? {
        return Ok(());
    }
    tx.execute_batch(
        "CREATE TABLE session_summaries (
             session_id         TEXT PRIMARY KEY,
             first_event_at     TEXT NOT NULL,
             last_event_at      TEXT NOT NULL,
             event_count        INTEGER NOT NULL DEFAULT 0,
             command_count      INTEGER NOT NULL DEFAULT 0,
             login_attempts     INTEGER NOT NULL DEFAULT 0,
             file_downloads     INTEGER NOT NULL DEFAULT 0,
             ssh_key_injections INTEGER NOT NULL DEFAULT 0,
             unique_ssh_keys    INTEGER NOT NULL DEFAULT 0,
             vt_flagged         INTEGER NOT NULL DEFAULT 0,
             dshield_flagged    INTEGER NOT NULL DEFAULT 0,
             risk_score         INTEGER NOT NULL DEFAULT 0,
             matcher            TEXT,
             source_files       TEXT NOT NULL DEFAULT '[]',
             enrichment         TEXT,
             source_ip          TEXT
         );",
    )?;
    Ok(())
}

fn step_dead_letter(tx: &Transaction<'_>) -> Result<()> {
    if table_exists(tx, "dead_letter_events")? {
        return Ok(());
    }
    tx.execute_batch(
        "CREATE TABLE dead_letter_events (
             id              INTEGER PRIMARY KEY AUTOINCREMENT,
             source          TEXT NOT NULL,
             source_offset   INTEGER NOT NULL,
             reason          TEXT NOT NULL,
             payload         TEXT NOT NULL,
             retry_count     INTEGER NOT NULL DEFAULT 0,
             created_at      TEXT NOT NULL,
             last_retried_at TEXT
         );
         CREATE INDEX idx_dead_letter_source ON dead_letter_events (source, source_offset);",
    )?;
    Ok(())
}

fn step_checkpoints(tx: &Transaction<'_>) -> Result<()> {
    if table_exists(tx, "ingest_checkpoints")? {
        return Ok(());
    }
    tx.execute_batch(
        "CREATE TABLE ingest_checkpoints (
             phase         TEXT NOT NULL,
             source        TEXT NOT NULL,
             source_offset INTEGER NOT NULL,
             source_inode  TEXT,
             updated_at    TEXT NOT NULL,
             PRIMARY KEY (phase, source)
         );",
    )?;
    Ok(())
}

fn step_ssh_keys(tx: &Transaction<'_>) -> Result<()> {
    if !table_exists(tx, "ssh_key_intelligence")? {
        tx.execute_batch(
            "CREATE TABLE ssh_key_intelligence (
                 id              INTEGER PRIMARY KEY AUTOINCREMENT,
                 key_type        TEXT NOT NULL,
                 key_data        TEXT NOT NULL,
                 key_fingerprint TEXT NOT NULL UNIQUE,
                 key_hash        TEXT,
                 key_comment     TEXT,
                 first_seen      TEXT NOT NULL,
                 last_seen       TEXT NOT NULL,
                 total_attempts  INTEGER NOT NULL DEFAULT 0,
                 unique_sources  INTEGER NOT NULL DEFAULT 0,
                 unique_sessions INTEGER NOT NULL DEFAULT 0,
                 key_bits        INTEGER
             );",
        )?;
    }
    if !table_exists(tx, "session_ssh_keys")? {
        tx.execute_batch(
            "CREATE TABLE session_ssh_keys (
                 session_id      TEXT NOT NULL,
                 key_fingerprint TEXT NOT NULL,
                 source_ip       TEXT,
                 seen_at         TEXT NOT NULL,
                 UNIQUE (session_id, key_fingerprint)
             );",
        )?;
    }
    Ok(())
}

fn step_passwords(tx: &Transaction<'_>) -> Result<()> {
    if !table_exists(tx, "password_tracking")? {
        tx.execute_batch(
            "CREATE TABLE password_tracking (
                 id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                 password_hash        TEXT NOT NULL UNIQUE,
                 password_text        TEXT,
                 first_seen           TEXT NOT NULL,
                 last_seen            TEXT NOT NULL,
                 times_seen           INTEGER NOT NULL DEFAULT 0,
                 unique_sessions      INTEGER NOT NULL DEFAULT 0,
                 breached             INTEGER,
                 breach_prevalence    INTEGER,
                 last_breach_check_at TEXT
             );",
        )?;
    }
    if !table_exists(tx, "session_passwords")? {
        tx.execute_batch(
            "CREATE TABLE session_passwords (
                 session_id    TEXT NOT NULL,
                 password_hash TEXT NOT NULL,
                 username      TEXT NOT NULL,
                 seen_at       TEXT NOT NULL,
                 UNIQUE (session_id, password_hash, username)
             );",
        )?;
    }
    Ok(())
}

fn step_file_artifacts(tx: &Transaction<'_>) -> Result<()> {
    if table_exists(tx, "file_artifacts")? {
        return Ok(());
    }
    tx.execute_batch(
        "CREATE TABLE file_artifacts (
             sha256      TEXT PRIMARY KEY,
             first_seen  TEXT NOT NULL,
             last_seen   TEXT NOT NULL,
             size        INTEGER,
             url_samples TEXT NOT NULL DEFAULT '[]',
             vt_analysis TEXT,
             vt_flagged  INTEGER
         );",
    )?;
    Ok(())
}

fn step_enrichment_cache(tx: &Transaction<'_>) -> Result<()> {
    if table_exists(tx, "enrichment_cache")? {
        return Ok(());
    }
    tx.execute_batch(
        "CREATE TABLE enrichment_cache (
             id              INTEGER PRIMARY KEY AUTOINCREMENT,
             service         TEXT NOT NULL,
             cache_key       TEXT NOT NULL,
             cache_key_hash  TEXT NOT NULL,
             payload         TEXT,
             response_status TEXT NOT NULL,
             created_at      TEXT NOT NULL,
             accessed_at     TEXT NOT NULL,
             expires_at      TEXT,
             api_latency_ms  INTEGER,
             hit_count       INTEGER NOT NULL DEFAULT 0,
             UNIQUE (service, cache_key_hash)
         );",
    )?;
    Ok(())
}

fn step_secondary_indexes(tx: &Transaction<'_>) -> Result<()> {
    if !index_exists(tx, "idx_cache_expires")? {
        tx.execute_batch("CREATE INDEX idx_cache_expires ON enrichment_cache (expires_at);")?;
    }
    if !index_exists(tx, "idx_sessions_source_ip")? {
        tx.execute_batch(
            "CREATE INDEX idx_sessions_source_ip ON session_summaries (source_ip);",
        )?;
    }
    Ok(())
}

fn step_risk_columns(tx: &Transaction<'_>) -> Result<()> {
    if !column_exists(tx, "raw_events", "risk_score")? {
        tx.execute_batch("ALTER TABLE raw_events ADD COLUMN risk_score INTEGER;")?;
    }
    if !column_exists(tx, "raw_events", "quarantined")? {
        tx.execute_batch("ALTER TABLE raw_events ADD COLUMN quarantined INTEGER;")?;
    }
    Ok(())
}

fn step_risk_backfill(store: &mut Store) -> Result<()> {
    loop {
        let updated = store.with_tx(|tx| {
            let updated = tx.execute(
                "UPDATE raw_events
                 SET risk_score = COALESCE(risk_score, 0),
                     quarantined = COALESCE(quarantined, 0)
                 WHERE id IN (
                     SELECT id FROM raw_events
                     WHERE risk_score IS NULL OR quarantined IS NULL
                     ORDER BY id
                     LIMIT ?1
                 )",
                params![BACKFILL_BATCH as i64],
            )?;
            Ok(updated)
        })?;
        if updated == 0 {
            return Ok(());
        }
        info!(rows = updated, "risk backfill batch committed");
    }
}

fn step_asn_inventory(tx: &Transaction<'_>) -> Result<()> {
    if table_exists(tx, "asn_inventory")? {
        return Ok(());
    }
    tx.execute_batch(
        "CREATE TABLE asn_inventory (
             asn_number   INTEGER PRIMARY KEY,
             asn_org      TEXT,
             country_hint TEXT,
             first_seen   TEXT NOT NULL,
             last_seen    TEXT NOT NULL
         );",
    )?;
    Ok(())
}

/// Columns ip_inventory must carry for the enrichment cascade.
const IP_INVENTORY_REQUIRED: [&str; 8] = [
    "ip_address",
    "country_code",
    "asn_number",
    "asn_org",
    "ip_type",
    "first_seen",
    "last_seen",
    "enrichment_ts",
];

fn create_ip_inventory(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        "CREATE TABLE ip_inventory (
             ip_address    TEXT PRIMARY KEY CHECK (length(ip_address) <= 45),
             country_code  TEXT,
             asn_number    INTEGER REFERENCES asn_inventory (asn_number),
             asn_org       TEXT,
             ip_type       TEXT NOT NULL DEFAULT 'unknown',
             first_seen    TEXT NOT NULL,
             last_seen     TEXT NOT NULL,
             enrichment_ts TEXT
         );",
    )?;
    Ok(())
}

/// Create ip_inventory, or repair a half-created one.
///
/// The table holds only derived enrichment state, so drop-and-recreate
/// is the documented recovery for any shape drift.
fn ensure_ip_inventory(tx: &Transaction<'_>, step_version: i64) -> Result<()> {
    if !table_exists(tx, "ip_inventory")? {
        create_ip_inventory(tx)?;
        return Ok(());
    }
    let mut missing = Vec::new();
    for column in IP_INVENTORY_REQUIRED {
        if !column_exists(tx, "ip_inventory", column)? {
            missing.push(column);
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    warn!(
        step = step_version,
        missing = ?missing,
        "ip_inventory exists with missing columns; dropping and recreating"
    );
    tx.execute_batch("DROP TABLE ip_inventory;")?;
    create_ip_inventory(tx)?;
    Ok(())
}

fn step_ip_inventory(tx: &Transaction<'_>) -> Result<()> {
    ensure_ip_inventory(tx, 14)
}

fn step_ip_provenance(tx: &Transaction<'_>) -> Result<()> {
    ensure_ip_inventory(tx, 15)?;
    for column in [
        "geo_source",
        "geo_ts",
        "asn_source",
        "asn_ts",
        "type_source",
        "type_ts",
    ] {
        if !column_exists(tx, "ip_inventory", column)? {
            tx.execute_batch(&format!(
                "ALTER TABLE ip_inventory ADD COLUMN {column} TEXT;"
            ))?;
        }
    }
    if !index_exists(tx, "idx_ip_inventory_type")? {
        tx.execute_batch("CREATE INDEX idx_ip_inventory_type ON ip_inventory (ip_type);")?;
    }
    Ok(())
}

fn step_session_snapshots(tx: &Transaction<'_>) -> Result<()> {
    // Never assume step 14/15 landed intact on this store.
    ensure_ip_inventory(tx, 16)?;

    // snapshot_ip_type is a regular column filled by the snapshot
    // builder; the database never generates it.
    for (column, decl) in [
        ("snapshot_asn", "INTEGER"),
        ("snapshot_country", "TEXT"),
        ("snapshot_ip_type", "TEXT"),
        ("enrichment_at", "TEXT"),
    ] {
        if !column_exists(tx, "session_summaries", column)? {
            tx.execute_batch(&format!(
                "ALTER TABLE session_summaries ADD COLUMN {column} {decl};"
            ))?;
        }
    }

    // FK alignment: the referencing columns must match the referent's
    // declared type exactly, no implicit casts.
    validate_fk_type(tx, "session_summaries", "source_ip", "ip_inventory", "ip_address")?;
    validate_fk_type(tx, "ip_inventory", "asn_number", "asn_inventory", "asn_number")?;
    validate_fk_type(
        tx,
        "session_summaries",
        "snapshot_asn",
        "asn_inventory",
        "asn_number",
    )?;
    Ok(())
}
