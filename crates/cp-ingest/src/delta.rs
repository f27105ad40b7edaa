//! Delta loader: resumable incremental ingestion.
//!
//! Identical to the bulk pipeline, except each file starts at its
//! stored checkpoint offset. Rotation (inode change) and truncation
//! (size regression) reset the offset to zero; duplicate suppression
//! in the raw event log makes the occasional re-read harmless.

use crate::bulk::{enumerate_files, resume_offset, run_pipeline, IngestReport};
use crate::error::{IngestError, Result};
use cp_config::CoreConfig;
use cp_status::{Phase, StatusEmitter};
use cp_store::Store;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::debug;

/// The delta loader.
pub struct DeltaLoader {
    config: CoreConfig,
    store: Store,
    emitter: StatusEmitter,
    ingest_id: String,
}

impl DeltaLoader {
    /// Open the store and status directory from the injected config.
    pub fn new(config: CoreConfig, ingest_id: String) -> Result<Self> {
        let store = Store::open(&config.database_path)?;
        cp_store::migrate::require_current(store.conn())?;
        let emitter = StatusEmitter::new(&config.status_dir)
            .map_err(|err| IngestError::Io(std::io::Error::other(err.to_string())))?;
        Ok(DeltaLoader {
            config,
            store,
            emitter,
            ingest_id,
        })
    }

    /// Ingest only bytes past each file's checkpoint.
    pub fn run(&mut self, files: &[PathBuf]) -> Result<IngestReport> {
        let shutdown = Arc::new(AtomicBool::new(false));
        self.run_with_shutdown(files, &shutdown)
    }

    /// Resumable run with an external shutdown flag.
    pub fn run_with_shutdown(
        &mut self,
        files: &[PathBuf],
        shutdown: &Arc<AtomicBool>,
    ) -> Result<IngestReport> {
        let mut jobs = enumerate_files(files)?;
        for job in &mut jobs {
            let size = std::fs::metadata(&job.path).map(|m| m.len()).unwrap_or(0);
            job.start_offset = resume_offset(
                &self.store,
                Phase::DeltaIngest.as_str(),
                &job.source,
                job.inode.as_deref(),
                size,
            )?;
            debug!(
                source = %job.source,
                offset = job.start_offset,
                "delta resume point"
            );
        }
        run_pipeline(
            &mut self.store,
            &self.config,
            &self.emitter,
            &self.ingest_id,
            Phase::DeltaIngest,
            jobs,
            shutdown,
        )
    }
}
