//! Last-run record of a task
//!
//! Current format: `last_run.json` holding `at`, `exitcode` and `session_id`.
//! Legacy format: a `last_run_retcode` file holding the exit code, its mtime
//! standing for the run timestamp. Readers try the formats newest first; the
//! legacy format is never written.

use crate::errors::StateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const RECORD_FILE: &str = "last_run.json";
pub const LEGACY_RETCODE_FILE: &str = "last_run_retcode";

/// Outcome of the last task run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub at: DateTime<Utc>,
    pub exitcode: i32,
    #[serde(default)]
    pub session_id: String,
}

type Reader = fn(&Path) -> Result<Option<LastRun>, StateError>;

/// Newest format first
const READERS: &[(&str, Reader)] = &[("json", read_record), ("legacy", read_legacy)];

/// Last-run storage in a task's private directory
#[derive(Debug, Clone)]
pub struct LastRunStore {
    dir: PathBuf,
}

impl LastRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    /// Load the newest available record; `None` when the task never ran
    pub fn load(&self) -> Result<Option<LastRun>, StateError> {
        for (format, reader) in READERS {
            if let Some(last_run) = reader(&self.dir)? {
                debug!(format, exitcode = last_run.exitcode, "Loaded last run record");
                return Ok(Some(last_run));
            }
        }
        Ok(None)
    }

    /// Persist atomically through a temp file and rename
    pub fn save(&self, last_run: &LastRun) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StateError::io(&self.dir, e))?;
        let path = self.record_path();
        let content = serde_json::to_string_pretty(last_run).map_err(|e| StateError::Json {
            path: path.display().to_string(),
            source: e,
        })?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, content).map_err(|e| StateError::io(&temp_path, e))?;
        std::fs::rename(&temp_path, &path).map_err(|e| StateError::io(&path, e))?;

        debug!(
            exitcode = last_run.exitcode,
            session_id = %last_run.session_id,
            "Wrote last run record to {}",
            path.display()
        );
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, StateError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StateError::io(path, e)),
    }
}

fn read_record(dir: &Path) -> Result<Option<LastRun>, StateError> {
    let path = dir.join(RECORD_FILE);
    let Some(content) = read_optional(&path)? else {
        return Ok(None);
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StateError::Json {
            path: path.display().to_string(),
            source: e,
        })
}

fn read_legacy(dir: &Path) -> Result<Option<LastRun>, StateError> {
    let path = dir.join(LEGACY_RETCODE_FILE);
    let Some(content) = read_optional(&path)? else {
        return Ok(None);
    };
    let Ok(exitcode) = content.trim().parse::<i32>() else {
        debug!("Ignoring unparseable legacy retcode file {}", path.display());
        return Ok(None);
    };
    let modified = std::fs::metadata(&path)
        .and_then(|m| m.modified())
        .map_err(|e| StateError::io(&path, e))?;
    Ok(Some(LastRun {
        at: DateTime::<Utc>::from(modified),
        exitcode,
        session_id: String::new(),
    }))
}
