//! Bulk loader: end-to-end ingest of one or more input files.
//!
//! File workers run in parallel, one file per worker at a time, so
//! events within a source keep file order. The single batch writer
//! owns the database connection; batches flush on size, on a time
//! bound, and at end of input, with the checkpoint written inside the
//! batch transaction.

use crate::detect::open_with_buffer;
use crate::error::{IngestError, Result};
use crate::multiline::{MultilineItem, MultilineParser, RejectReason};
use crate::pipeline::{process_value, BatchStats, BatchWriter, WorkItem};
use cp_config::{CoreConfig, IngestSettings, SitePolicy};
use cp_status::{CheckpointInfo, DeadLetterInfo, Phase, StatusDocument, StatusEmitter};
use cp_store::{CheckpointRepo, DeadLetterReason, DeadLetterRepo, Store};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use std::io::{BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Final counters for one ingest run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub files: usize,
    pub stats: BatchStats,
}

/// One file scheduled for ingestion.
#[derive(Debug, Clone)]
pub(crate) struct FileJob {
    pub path: PathBuf,
    /// Stable source identity: the absolute path.
    pub source: String,
    pub inode: Option<String>,
    /// Decompressed offset to start at (0 for bulk).
    pub start_offset: i64,
}

/// The bulk loader.
pub struct BulkLoader {
    config: CoreConfig,
    store: Store,
    emitter: StatusEmitter,
    ingest_id: String,
}

impl BulkLoader {
    /// Open the store and status directory from the injected config.
    pub fn new(config: CoreConfig, ingest_id: String) -> Result<Self> {
        let store = Store::open(&config.database_path)?;
        cp_store::migrate::require_current(store.conn())?;
        let emitter = StatusEmitter::new(&config.status_dir)
            .map_err(|err| IngestError::Io(std::io::Error::other(err.to_string())))?;
        Ok(BulkLoader {
            config,
            store,
            emitter,
            ingest_id,
        })
    }

    /// Ingest the given files from the beginning.
    pub fn run(&mut self, files: &[PathBuf]) -> Result<IngestReport> {
        let shutdown = Arc::new(AtomicBool::new(false));
        self.run_with_shutdown(files, &shutdown)
    }

    /// Ingest with an external shutdown flag; a set flag drains
    /// in-flight batches, flushes checkpoints, and returns early.
    pub fn run_with_shutdown(
        &mut self,
        files: &[PathBuf],
        shutdown: &Arc<AtomicBool>,
    ) -> Result<IngestReport> {
        let jobs = enumerate_files(files)?;
        run_pipeline(
            &mut self.store,
            &self.config,
            &self.emitter,
            &self.ingest_id,
            Phase::BulkIngest,
            jobs,
            shutdown,
        )
    }
}

/// Expand and deterministically order the input set.
///
/// Identity is `(path, inode, size)`; a missing file aborts the run
/// before any work starts.
pub(crate) fn enumerate_files(files: &[PathBuf]) -> Result<Vec<FileJob>> {
    let mut jobs = Vec::with_capacity(files.len());
    for path in files {
        let metadata = std::fs::metadata(path).map_err(|_| IngestError::NotFound {
            path: path.display().to_string(),
        })?;
        if !metadata.is_file() {
            return Err(IngestError::NotFound {
                path: path.display().to_string(),
            });
        }
        let source = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.clone())
            .display()
            .to_string();
        jobs.push(FileJob {
            path: path.clone(),
            source,
            inode: file_inode(path, &metadata),
            start_offset: 0,
        });
    }
    jobs.sort_by(|a, b| a.source.cmp(&b.source));
    jobs.dedup_by(|a, b| a.source == b.source);
    Ok(jobs)
}

#[cfg(unix)]
pub(crate) fn file_inode(_path: &Path, metadata: &std::fs::Metadata) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    Some(format!("{}:{}", metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
pub(crate) fn file_inode(_path: &Path, metadata: &std::fs::Metadata) -> Option<String> {
    // No stable inode off unix; fall back to length so truncation is
    // still detectable.
    Some(format!("len:{}", metadata.len()))
}

/// Shared pipeline runner for the bulk and delta loaders.
pub(crate) fn run_pipeline(
    store: &mut Store,
    config: &CoreConfig,
    emitter: &StatusEmitter,
    ingest_id: &str,
    phase: Phase,
    jobs: Vec<FileJob>,
    shutdown: &Arc<AtomicBool>,
) -> Result<IngestReport> {
    let file_count = jobs.len();
    let workers = config.ingest.parser_workers.min(file_count.max(1));
    let (job_tx, job_rx) = bounded::<FileJob>(file_count.max(1));
    let (out_tx, out_rx) = bounded::<WorkItem>(config.ingest.channel_capacity);

    for job in jobs {
        // Capacity equals job count, so this cannot block.
        job_tx
            .send(job)
            .map_err(|_| IngestError::WorkerPanic("job channel closed early".into()))?;
    }
    drop(job_tx);

    let phase_name: &'static str = phase.as_str();
    let mut doc = StatusDocument::new(phase, ingest_id);
    let mut writer = BatchWriter::new(phase_name);

    std::thread::scope(|scope| -> Result<()> {
        for _ in 0..workers {
            let job_rx: Receiver<FileJob> = job_rx.clone();
            let out_tx: Sender<WorkItem> = out_tx.clone();
            let settings = &config.ingest;
            let policy = &config.policy;
            let shutdown = Arc::clone(shutdown);
            let ingest_id = ingest_id.to_string();
            scope.spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    process_file(&job, settings, policy, &ingest_id, &out_tx, &shutdown);
                }
            });
        }
        drop(out_tx);

        write_loop(store, config, emitter, &mut doc, &mut writer, &out_rx, shutdown)
    })?;

    let report = IngestReport {
        files: file_count,
        stats: writer.stats.clone(),
    };
    info!(
        phase = phase_name,
        files = report.files,
        inserted = report.stats.events_inserted,
        duplicates = report.stats.duplicates,
        dead_letters = report.stats.dead_letters,
        "ingest run finished"
    );
    Ok(report)
}

/// The batch writer loop: the only stage that touches the database.
fn write_loop(
    store: &mut Store,
    config: &CoreConfig,
    emitter: &StatusEmitter,
    doc: &mut StatusDocument,
    writer: &mut BatchWriter,
    out_rx: &Receiver<WorkItem>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    let flush_every = Duration::from_secs(config.ingest.batch_flush_secs.max(1));
    let mut last_flush = Instant::now();
    let mut last_checkpoint: Option<CheckpointInfo> = None;

    loop {
        match out_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(item) => {
                if let WorkItem::Event(event) = &item {
                    last_checkpoint = Some(CheckpointInfo {
                        source: event.raw.source.clone(),
                        source_offset: event.end_offset,
                        source_inode: event.raw.source_inode.clone(),
                    });
                }
                let buffered = writer.push(item);
                if buffered >= config.ingest.batch_size
                    || last_flush.elapsed() >= flush_every
                {
                    writer.flush(store)?;
                    emit_status(store, emitter, doc, writer, &last_checkpoint);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) || last_flush.elapsed() >= flush_every {
                    writer.flush(store)?;
                    emit_status(store, emitter, doc, writer, &last_checkpoint);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                writer.flush(store)?;
                emit_status(store, emitter, doc, writer, &last_checkpoint);
                return Ok(());
            }
        }
    }
}

fn emit_status(
    store: &Store,
    emitter: &StatusEmitter,
    doc: &mut StatusDocument,
    writer: &BatchWriter,
    checkpoint: &Option<CheckpointInfo>,
) {
    let stats = &writer.stats;
    doc.metric("records_processed", stats.events_parsed)
        .metric("records_inserted", stats.events_inserted)
        .metric("records_skipped", stats.duplicates)
        .metric("records_errored", stats.dead_letters)
        .metric("sessions_touched", stats.sessions_touched)
        .metric("sanitize_modified", stats.sanitize_modified)
        .metric("quarantined", stats.quarantined)
        .metric("files_failed", stats.files_failed)
        .metric("batches_committed", stats.batches_committed);
    doc.checkpoint = checkpoint.clone();
    doc.dead_letter = DeadLetterInfo {
        total: DeadLetterRepo::total(store.conn()).unwrap_or(0),
        last_reason: DeadLetterRepo::last_reason(store.conn()).unwrap_or(None),
    };
    let phase = match doc.phase.as_str() {
        "delta_ingest" => Phase::DeltaIngest,
        _ => Phase::BulkIngest,
    };
    emitter.emit_lossy(phase, doc);
}

/// Stream one file, sending work items in file order.
fn process_file(
    job: &FileJob,
    settings: &IngestSettings,
    policy: &SitePolicy,
    ingest_id: &str,
    out_tx: &Sender<WorkItem>,
    shutdown: &Arc<AtomicBool>,
) {
    // Multiline stays opt-in: detection only warns, it never switches
    // modes on its own.
    if !settings.multiline_json && job.start_offset == 0 {
        if let Ok(report) = crate::detect::detect_format(&job.path) {
            if report.format == crate::detect::FileFormat::MultilineJson {
                warn!(
                    source = %job.source,
                    confidence = report.confidence,
                    "input looks pretty-printed; lines will dead-letter without --multiline-json"
                );
            }
        }
    }

    let result = if settings.multiline_json {
        process_multiline(job, settings, policy, ingest_id, out_tx, shutdown)
    } else {
        process_lines(job, settings, policy, ingest_id, out_tx, shutdown)
    };
    if let Err(err) = result {
        // Read failures inside a compressed stream are almost always a
        // truncated or corrupt archive, not a disk problem.
        let err = match err {
            IngestError::Io(io) if is_compressed_name(&job.source) => {
                IngestError::Decompression {
                    path: job.source.clone(),
                    detail: io.to_string(),
                }
            }
            other => other,
        };
        warn!(source = %job.source, error = %err, "file aborted");
        let _ = out_tx.send(WorkItem::FileFailed {
            source: job.source.clone(),
            detail: err.to_string(),
        });
    }
}

fn open_at_offset(
    job: &FileJob,
    settings: &IngestSettings,
) -> Result<Box<dyn BufRead + Send>> {
    let mut reader = open_with_buffer(&job.path, settings.read_buffer_bytes)?;
    if job.start_offset > 0 {
        // Offsets are decompressed-stream positions, so skipping is a
        // bounded read-and-discard regardless of the container format.
        std::io::copy(
            &mut reader.by_ref().take(job.start_offset as u64),
            &mut std::io::sink(),
        )?;
    }
    Ok(reader)
}

fn process_lines(
    job: &FileJob,
    settings: &IngestSettings,
    policy: &SitePolicy,
    ingest_id: &str,
    out_tx: &Sender<WorkItem>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    let mut reader = open_at_offset(job, settings)?;
    let mut offset = job.start_offset;
    let mut line = String::new();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        let start = offset;
        offset += n as i64;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let item = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => match process_value(
                value,
                &job.source,
                start,
                offset,
                job.inode.as_deref(),
                ingest_id,
                policy,
            ) {
                Ok(event) => WorkItem::Event(event),
                Err((reason, raw)) => WorkItem::Dead {
                    source: job.source.clone(),
                    offset: start,
                    reason,
                    raw,
                },
            },
            Err(_) => WorkItem::Dead {
                source: job.source.clone(),
                offset: start,
                reason: DeadLetterReason::Parse,
                raw: trimmed.to_string(),
            },
        };
        if out_tx.send(item).is_err() {
            return Ok(());
        }
    }

    let _ = out_tx.send(WorkItem::FileDone {
        source: job.source.clone(),
        inode: job.inode.clone(),
        final_offset: offset,
    });
    Ok(())
}

fn process_multiline(
    job: &FileJob,
    settings: &IngestSettings,
    policy: &SitePolicy,
    ingest_id: &str,
    out_tx: &Sender<WorkItem>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    let reader = open_at_offset(job, settings)?;
    let mut parser = MultilineParser::new(reader, settings.multiline_max_lines);
    let base = job.start_offset;

    while let Some(item) = parser.next() {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let end_offset = base + parser.offset() as i64;
        let work = match item? {
            MultilineItem::Event {
                start_offset,
                value,
            } => match process_value(
                value,
                &job.source,
                base + start_offset as i64,
                end_offset,
                job.inode.as_deref(),
                ingest_id,
                policy,
            ) {
                Ok(event) => WorkItem::Event(event),
                Err((reason, raw)) => WorkItem::Dead {
                    source: job.source.clone(),
                    offset: base + start_offset as i64,
                    reason,
                    raw,
                },
            },
            MultilineItem::Rejected {
                start_offset,
                raw,
                reason,
            } => WorkItem::Dead {
                source: job.source.clone(),
                offset: base + start_offset as i64,
                reason: match reason {
                    RejectReason::Unparseable => DeadLetterReason::Parse,
                    RejectReason::Invalid => DeadLetterReason::Validation,
                },
                raw,
            },
        };
        if out_tx.send(work).is_err() {
            return Ok(());
        }
    }

    let final_offset = base + parser.offset() as i64;
    let _ = out_tx.send(WorkItem::FileDone {
        source: job.source.clone(),
        inode: job.inode.clone(),
        final_offset,
    });
    Ok(())
}

/// Reconcile a job against a stored checkpoint: detect rotation and
/// truncation, otherwise resume after the recorded offset.
pub(crate) fn resume_offset(
    store: &Store,
    phase: &str,
    source: &str,
    inode: Option<&str>,
    current_size: u64,
) -> Result<i64> {
    let Some(checkpoint) = CheckpointRepo::get(store.conn(), phase, source)? else {
        return Ok(0);
    };
    if checkpoint.source_inode.as_deref() != inode {
        info!(source, "inode changed; file rotated, restarting from 0");
        return Ok(0);
    }
    // Size below the checkpoint means truncation or rotation-in-place.
    // Only comparable for uncompressed inputs, where the checkpoint
    // offset is a file offset; compressed files never shrink below
    // their decompressed checkpoint here because size is the on-disk
    // size. Err on the side of re-reading: dedup makes that safe.
    if (current_size as i64) < checkpoint.source_offset && !is_compressed_name(source) {
        info!(source, "size regressed; file truncated, restarting from 0");
        return Ok(0);
    }
    Ok(checkpoint.source_offset)
}

fn is_compressed_name(source: &str) -> bool {
    source.ends_with(".gz") || source.ends_with(".bz2")
}
