//! Run-file concurrency tracker
//!
//! One file per in-flight task execution, named by the executing pid and
//! holding the session id. Independent processes agree on how many instances
//! of a task run by counting the live entries of the task's run directory.
//!
//! A run-file is stale when its pid has no `/proc` entry, or when the file was
//! written before that pid's process started (the pid was reused).

use crate::errors::StateError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// View of the OS process table
pub trait ProcessTable: Send + Sync + std::fmt::Debug {
    fn is_alive(&self, pid: u32) -> bool;

    /// Process start time in seconds since the epoch
    fn start_time(&self, pid: u32) -> Option<u64>;
}

/// Process table backed by `/proc`
#[derive(Debug, Clone, Default)]
pub struct ProcFs;

impl ProcessTable for ProcFs {
    fn is_alive(&self, pid: u32) -> bool {
        Path::new("/proc").join(pid.to_string()).exists()
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system.process(pid).map(|p| p.start_time())
    }
}

/// Why a run-file does not count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staleness {
    Exited,
    PidReused,
}

/// Run directory of one task
#[derive(Debug, Clone)]
pub struct RunDir {
    path: PathBuf,
    table: Arc<dyn ProcessTable>,
}

impl RunDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_table(path, Arc::new(ProcFs))
    }

    pub fn with_table(path: impl Into<PathBuf>, table: Arc<dyn ProcessTable>) -> Self {
        Self {
            path: path.into(),
            table,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_for(&self, pid: u32) -> PathBuf {
        self.path.join(pid.to_string())
    }

    /// Live run-files
    pub fn count(&self) -> Result<usize, StateError> {
        self.scan(false)
    }

    /// Live run-files, deleting the stale ones
    pub fn count_and_clean(&self) -> Result<usize, StateError> {
        self.scan(true)
    }

    fn scan(&self, clean: bool) -> Result<usize, StateError> {
        let entries = match std::fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StateError::io(&self.path, e)),
        };

        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| StateError::io(&self.path, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| StateError::io(&path, e))?;
            if file_type.is_dir() {
                warn!(path = %path.display(), "Skipping unexpected directory in run dir");
                continue;
            }
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                debug!(path = %path.display(), "Skipping non-pid run dir entry");
                continue;
            };

            match self.staleness(&path, pid) {
                None => count += 1,
                Some(reason) if clean => {
                    info!(pid, reason = ?reason, "Removing stale run file {}", path.display());
                    match std::fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(StateError::io(&path, e)),
                    }
                }
                Some(reason) => {
                    debug!(pid, reason = ?reason, "Ignoring stale run file {}", path.display());
                }
            }
        }
        Ok(count)
    }

    fn staleness(&self, path: &Path, pid: u32) -> Option<Staleness> {
        if !self.table.is_alive(pid) {
            return Some(Staleness::Exited);
        }
        let written = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())?;
        let started = self.table.start_time(pid)?;
        // Start times have one second granularity
        if written + 1 < started {
            return Some(Staleness::PidReused);
        }
        None
    }

    /// Register the current process
    pub fn create(&self, session_id: &str) -> Result<RunFile, StateError> {
        self.create_for(std::process::id(), session_id)
    }

    /// Register `pid`
    pub fn create_for(&self, pid: u32, session_id: &str) -> Result<RunFile, StateError> {
        std::fs::create_dir_all(&self.path).map_err(|e| StateError::io(&self.path, e))?;
        let path = self.file_for(pid);
        std::fs::write(&path, format!("{}\n", session_id)).map_err(|e| StateError::io(&path, e))?;
        debug!(pid, session_id, "Created run file {}", path.display());
        Ok(RunFile { path: Some(path) })
    }

    /// Unregister the current process
    pub fn remove(&self) -> Result<(), StateError> {
        remove_if_exists(&self.file_for(std::process::id()))
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StateError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed run file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StateError::io(path, e)),
    }
}

/// Registered run-file, removed when dropped
#[derive(Debug)]
pub struct RunFile {
    path: Option<PathBuf>,
}

impl RunFile {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Remove now, reporting failures
    pub fn remove(mut self) -> Result<(), StateError> {
        match self.path.take() {
            Some(path) => remove_if_exists(&path),
            None => Ok(()),
        }
    }
}

impl Drop for RunFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = remove_if_exists(&path) {
                warn!(error = %e, "Failed to remove run file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Table with fixed liveness and start times
    #[derive(Debug, Default)]
    struct FakeTable {
        started: HashMap<u32, u64>,
    }

    impl ProcessTable for FakeTable {
        fn is_alive(&self, pid: u32) -> bool {
            self.started.contains_key(&pid)
        }

        fn start_time(&self, pid: u32) -> Option<u64> {
            self.started.get(&pid).copied()
        }
    }

    fn now_secs() -> u64 {
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn test_missing_dir_counts_zero() {
        let dir = TempDir::new().unwrap();
        let run_dir = RunDir::new(dir.path().join("run"));
        assert_eq!(run_dir.count().unwrap(), 0);
        assert_eq!(run_dir.count_and_clean().unwrap(), 0);
    }

    #[test]
    fn test_pid_reuse_is_stale() {
        let dir = TempDir::new().unwrap();
        let table = FakeTable {
            started: HashMap::from([(100, 0), (200, now_secs() + 3600)]),
        };
        let run_dir = RunDir::with_table(dir.path(), Arc::new(table));
        std::mem::forget(run_dir.create_for(100, "s1").unwrap());
        std::mem::forget(run_dir.create_for(200, "s2").unwrap());

        assert_eq!(run_dir.count().unwrap(), 1);
        assert!(dir.path().join("200").exists());
        assert_eq!(run_dir.count_and_clean().unwrap(), 1);
        assert!(!dir.path().join("200").exists());
        assert!(dir.path().join("100").exists());
    }

    #[test]
    fn test_subdirectories_and_foreign_names_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("12345")).unwrap();
        std::fs::write(dir.path().join("README"), "x").unwrap();
        let table = FakeTable {
            started: HashMap::from([(12345, 0)]),
        };
        let run_dir = RunDir::with_table(dir.path(), Arc::new(table));

        assert_eq!(run_dir.count_and_clean().unwrap(), 0);
        assert!(dir.path().join("12345").is_dir());
        assert!(dir.path().join("README").exists());
    }

    #[test]
    fn test_run_file_guard_removes_on_drop() {
        let dir = TempDir::new().unwrap();
        let run_dir = RunDir::new(dir.path());
        let guard = run_dir.create("session-1").unwrap();
        let path = guard.path().unwrap().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "session-1\n");
        assert_eq!(run_dir.count().unwrap(), 1);

        drop(guard);
        assert!(!path.exists());
        assert_eq!(run_dir.count().unwrap(), 0);
        run_dir.remove().unwrap();
    }

    #[test]
    fn test_proc_table_sees_current_process() {
        let table = ProcFs;
        let pid = std::process::id();
        assert!(table.is_alive(pid));
        let started = table.start_time(pid).expect("start time of self");
        assert!(started <= now_secs() + 1);
        assert!(!table.is_alive(999_999_999));
    }
}
