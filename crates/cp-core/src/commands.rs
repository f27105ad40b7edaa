//! Command implementations, one function per verb.
//!
//! Every function takes the resolved config, does its work through
//! the library crates, prints a JSON payload to stdout, and returns
//! the exit code. Errors bubble as `cp_common::Error` and are mapped
//! to exit codes in `main`.

use crate::exit_codes::ExitCode;
use chrono::Utc;
use cp_common::{Error, IngestId};
use cp_config::CoreConfig;
use cp_enrich::{EnrichContext, Enricher, SnapshotBuilder};
use cp_ingest::{BulkLoader, DeltaLoader, RepairRunner};
use cp_status::{Phase, StatusDocument, StatusEmitter};
use cp_store::{migrate, DeadLetterRepo, Store, Sweeper};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

type CmdResult = Result<ExitCode, Error>;

/// Wire Ctrl-C to a drain-and-exit flag.
fn shutdown_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    // A second Ctrl-C kills the process the normal way; the handler
    // only requests a drain.
    let _ = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    });
    flag
}

fn print_payload(payload: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(payload).unwrap_or_else(|_| "{}".into()));
}

pub fn bulk_ingest(config: CoreConfig, files: Vec<PathBuf>) -> CmdResult {
    let ingest_id = IngestId::new();
    let mut loader = BulkLoader::new(config, ingest_id.to_string()).map_err(Error::from)?;
    let shutdown = shutdown_flag();
    let report = loader
        .run_with_shutdown(&files, &shutdown)
        .map_err(Error::from)?;
    print_payload(&serde_json::json!({
        "ingest_id": ingest_id.to_string(),
        "files": report.files,
        "events_inserted": report.stats.events_inserted,
        "duplicates": report.stats.duplicates,
        "dead_letters": report.stats.dead_letters,
        "sessions_touched": report.stats.sessions_touched,
        "quarantined": report.stats.quarantined,
    }));
    Ok(ExitCode::Success)
}

pub fn delta_ingest(config: CoreConfig, files: Vec<PathBuf>) -> CmdResult {
    let ingest_id = IngestId::new();
    let mut loader = DeltaLoader::new(config, ingest_id.to_string()).map_err(Error::from)?;
    let shutdown = shutdown_flag();
    let report = loader
        .run_with_shutdown(&files, &shutdown)
        .map_err(Error::from)?;
    print_payload(&serde_json::json!({
        "ingest_id": ingest_id.to_string(),
        "files": report.files,
        "events_inserted": report.stats.events_inserted,
        "duplicates": report.stats.duplicates,
        "dead_letters": report.stats.dead_letters,
    }));
    Ok(ExitCode::Success)
}

pub fn run_migrate(config: CoreConfig) -> CmdResult {
    let mut store = Store::open(&config.database_path).map_err(Error::from)?;
    let holder = format!("cp-core@{}", std::process::id());
    let report = migrate::migrate(&mut store, &holder).map_err(Error::from)?;
    print_payload(&serde_json::json!({
        "from_version": report.from_version,
        "to_version": report.to_version,
        "steps_applied": report.steps_applied,
    }));
    Ok(ExitCode::Success)
}

pub fn enrich_refresh(config: CoreConfig, stale_only: bool, limit: usize) -> CmdResult {
    let ingest_id = IngestId::new();
    let store = Store::open(&config.database_path).map_err(Error::from)?;
    migrate::require_current(store.conn()).map_err(Error::from)?;
    let ctx = EnrichContext::from_config(&config).map_err(Error::from)?;
    let mut enricher = Enricher::new(store, &ctx);

    let report = enricher.refresh(stale_only, limit).map_err(Error::from)?;

    let emitter = StatusEmitter::new(&config.status_dir)
        .map_err(|err| Error::Config(err.to_string()))?;
    let mut doc = StatusDocument::new(Phase::Enrichment, &ingest_id.to_string());
    doc.metric("ips_enriched", report.enriched)
        .metric("ips_fresh", report.fresh)
        .metric("ips_unanswered", report.unanswered)
        .metric("ips_errored", report.errored)
        .metric("files_checked", report.files_checked)
        .metric("passwords_checked", report.passwords_checked);
    for (source, calls) in &enricher.counters.calls {
        doc.metric(&format!("calls_{source}"), *calls);
    }
    for (source, failures) in &enricher.counters.failures {
        doc.metric(&format!("failures_{source}"), *failures);
    }
    doc.dead_letter.total = DeadLetterRepo::total(enricher.store().conn()).unwrap_or(0);
    emitter.emit_lossy(Phase::Enrichment, &mut doc);

    print_payload(&serde_json::json!({
        "enriched": report.enriched,
        "fresh": report.fresh,
        "unanswered": report.unanswered,
        "errored": report.errored,
        "files_checked": report.files_checked,
        "passwords_checked": report.passwords_checked,
    }));
    Ok(ExitCode::Success)
}

pub fn sanitize(config: CoreConfig, dry_run: bool, batch_size: usize) -> CmdResult {
    let mut store = Store::open(&config.database_path).map_err(Error::from)?;
    migrate::require_current(store.conn()).map_err(Error::from)?;
    let sweeper = Sweeper::new(batch_size);

    if dry_run {
        let report = sweeper.dry_run(&store).map_err(Error::from)?;
        print_payload(&serde_json::json!({
            "dry_run": true,
            "affected_rows": report.affected_rows,
            "sample_ids": report.sample_ids,
        }));
        return Ok(ExitCode::Success);
    }

    let outcome = sweeper.run(&mut store).map_err(Error::from)?;
    let emitter = StatusEmitter::new(&config.status_dir)
        .map_err(|err| Error::Config(err.to_string()))?;
    let mut doc = StatusDocument::new(Phase::Sanitize, &IngestId::new().to_string());
    doc.metric("rows_scanned", outcome.rows_scanned)
        .metric("rows_rewritten", outcome.rows_rewritten)
        .metric("batches", outcome.batches);
    emitter.emit_lossy(Phase::Sanitize, &mut doc);

    print_payload(&serde_json::json!({
        "dry_run": false,
        "rows_scanned": outcome.rows_scanned,
        "rows_rewritten": outcome.rows_rewritten,
        "batches": outcome.batches,
    }));
    Ok(ExitCode::Success)
}

pub fn backfill_snapshots(config: CoreConfig) -> CmdResult {
    let mut store = Store::open(&config.database_path).map_err(Error::from)?;
    migrate::require_current(store.conn()).map_err(Error::from)?;
    let report = SnapshotBuilder::default().run(&mut store).map_err(Error::from)?;

    let emitter = StatusEmitter::new(&config.status_dir)
        .map_err(|err| Error::Config(err.to_string()))?;
    let mut doc = StatusDocument::new(Phase::SnapshotBackfill, &IngestId::new().to_string());
    doc.metric("sessions_examined", report.examined)
        .metric("sessions_sealed", report.sealed)
        .metric("awaiting_enrichment", report.awaiting_enrichment);
    emitter.emit_lossy(Phase::SnapshotBackfill, &mut doc);

    print_payload(&serde_json::json!({
        "examined": report.examined,
        "sealed": report.sealed,
        "awaiting_enrichment": report.awaiting_enrichment,
    }));
    Ok(ExitCode::Success)
}

pub fn dead_letter_replay(config: CoreConfig) -> CmdResult {
    let mut store = Store::open(&config.database_path).map_err(Error::from)?;
    migrate::require_current(store.conn()).map_err(Error::from)?;
    let runner = RepairRunner::new(config.policy.clone(), IngestId::new().to_string());
    let outcome = runner.run(&mut store).map_err(Error::from)?;

    let emitter = StatusEmitter::new(&config.status_dir)
        .map_err(|err| Error::Config(err.to_string()))?;
    let mut doc = StatusDocument::new(Phase::DeadLetterReplay, &IngestId::new().to_string());
    doc.metric("examined", outcome.examined)
        .metric("promoted", outcome.promoted)
        .metric("still_dead", outcome.still_dead);
    doc.dead_letter.total = DeadLetterRepo::total(store.conn()).unwrap_or(0);
    emitter.emit_lossy(Phase::DeadLetterReplay, &mut doc);

    print_payload(&serde_json::json!({
        "examined": outcome.examined,
        "promoted": outcome.promoted,
        "still_dead": outcome.still_dead,
    }));
    Ok(ExitCode::Success)
}

pub fn check_health(config: CoreConfig) -> CmdResult {
    let mut problems = Vec::new();

    let schema = match Store::open(&config.database_path) {
        Ok(store) => match migrate::schema_version(store.conn()) {
            Ok(version) => {
                if version != cp_common::SCHEMA_VERSION {
                    problems.push(format!(
                        "schema at {version}, expected {}; run 'cp-core migrate'",
                        cp_common::SCHEMA_VERSION
                    ));
                }
                Some(version)
            }
            Err(err) => {
                problems.push(format!("schema read failed: {err}"));
                None
            }
        },
        Err(err) => {
            problems.push(format!("database unavailable: {err}"));
            None
        }
    };

    for (name, dir) in [
        ("status_dir", &config.status_dir),
        ("cache_dir", &config.cache.l3_root),
    ] {
        if let Err(err) = std::fs::create_dir_all(dir)
            .and_then(|_| {
                let probe = dir.join(".health-probe");
                std::fs::write(&probe, b"ok")?;
                std::fs::remove_file(&probe)
            })
        {
            problems.push(format!("{name} not writable: {err}"));
        }
    }

    let healthy = problems.is_empty();
    print_payload(&serde_json::json!({
        "healthy": healthy,
        "schema_version": schema,
        "checked_at": Utc::now(),
        "problems": problems,
    }));

    if healthy {
        info!("health check passed");
        Ok(ExitCode::Success)
    } else {
        Ok(ExitCode::Transient)
    }
}
