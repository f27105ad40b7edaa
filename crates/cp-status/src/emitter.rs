//! Atomic status document writer.

use crate::document::{Phase, StatusDocument};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from status emission.
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes status documents under one directory.
pub struct StatusEmitter {
    dir: PathBuf,
}

impl StatusEmitter {
    /// Create an emitter, ensuring the directory exists.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StatusError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(StatusEmitter { dir })
    }

    /// The status directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one phase document and refresh the aggregate roll-up.
    ///
    /// Failures are returned but callers normally just log them:
    /// status is advisory and must never stall a pipeline.
    pub fn emit(&self, phase: Phase, doc: &mut StatusDocument) -> Result<(), StatusError> {
        doc.last_updated = Utc::now();
        self.write_atomic(phase.file_name(), doc)?;
        self.roll_up()?;
        debug!(phase = phase.as_str(), "status document written");
        Ok(())
    }

    /// Emit, swallowing (but logging) failures. The lossy variant used
    /// inside hot loops.
    pub fn emit_lossy(&self, phase: Phase, doc: &mut StatusDocument) {
        if let Err(err) = self.emit(phase, doc) {
            warn!(phase = phase.as_str(), error = %err, "status emission failed");
        }
    }

    /// Rebuild `status.json` from every present phase document.
    fn roll_up(&self) -> Result<(), StatusError> {
        #[derive(Serialize)]
        struct RollUp {
            last_updated: chrono::DateTime<Utc>,
            phases: serde_json::Map<String, serde_json::Value>,
        }

        let mut phases = serde_json::Map::new();
        for phase in Phase::all() {
            let path = self.dir.join(phase.file_name());
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            // A phase document that fails to parse is skipped rather
            // than poisoning the roll-up.
            match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => {
                    phases.insert(phase.as_str().to_string(), value);
                }
                Err(err) => {
                    warn!(phase = phase.as_str(), error = %err, "unparseable phase document");
                }
            }
        }

        let roll_up = RollUp {
            last_updated: Utc::now(),
            phases,
        };
        self.write_atomic("status.json", &roll_up)
    }

    /// Write JSON to `<dir>/<name>` via temp file + rename.
    fn write_atomic(&self, name: &str, value: &impl Serialize) -> Result<(), StatusError> {
        let final_path = self.dir.join(name);
        let tmp_path = self.dir.join(format!(".{name}.tmp"));

        let json = serde_json::to_vec_pretty(value)?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}
