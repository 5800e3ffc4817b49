//! Error types and handling
//!
//! The taxonomy follows the failure classes of the execution engine:
//! configuration problems (including namespace references), engine invocation
//! failures, run concurrency, confirmation and on-disk state. Each class has its
//! own enum; all of them are wrapped in [`VesselError`] for unified handling.

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file parsing error
    #[error("Failed to parse configuration file: {message}")]
    Parsing { message: String },

    /// Configuration validation error
    #[error("Configuration validation error: {message}")]
    Validation { message: String },

    /// Configuration file I/O error
    #[error("Failed to read configuration file")]
    Io(#[from] std::io::Error),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },

    /// Malformed resource identifier
    #[error("Invalid resource id '{rid}': expected <group>#<index>")]
    InvalidRid { rid: String },

    /// A volume source directory could not be created
    #[error("Failed to create mount source directory {path}")]
    MountSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A secret or config key could not be decoded
    #[error("Failed to decode {kind} key {name}/{key}: {message}")]
    KeyDecode {
        kind: String,
        name: String,
        key: String,
        message: String,
    },

    /// One entry of a retcode mapping is malformed (non-fatal when collected)
    #[error("Invalid retcode mapping entry '{entry}': {message}")]
    RetcodeEntry { entry: String, message: String },

    /// A non-empty retcode mapping had no valid entry at all
    #[error("Retcode mapping '{mapping}' has no valid entry")]
    EmptyRetcodes { mapping: String },
}

/// Namespace reference resolution errors
#[derive(Error, Debug)]
pub enum NamespaceError {
    /// The reference is neither a keyword, an engine idiom nor a resource id
    #[error("{kind}: invalid namespace reference '{value}'")]
    Parse { kind: String, value: String },

    /// The referenced sibling resource does not exist in the object
    #[error("{kind}: resource {rid} not found")]
    MissingResource { kind: String, rid: String },

    /// The referenced sibling exists but has no container to join
    #[error("{kind}: resource {rid} does not support namespace sharing")]
    NotJoinable { kind: String, rid: String },
}

/// Container engine invocation errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine binary could not be found
    #[error("Container engine '{binary}' is not installed or not accessible")]
    NotInstalled { binary: String },

    /// Spawning the engine process failed
    #[error("Failed to execute {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Engine exited non-zero
    #[error("{command} exited with code {code}: {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Engine was terminated by a signal
    #[error("{command} was terminated by a signal")]
    Signaled { command: String },

    /// The engine reported that its target does not exist
    #[error("No such {target}")]
    NotFound {
        target: String,
        #[source]
        source: Box<EngineError>,
    },

    /// The caller cancelled the operation
    #[error("{command} cancelled")]
    Cancelled { command: String },

    /// The process deadline expired and the engine process was killed
    #[error("{command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// Inspect output could not be decoded
    #[error("Failed to parse {binary} inspect output: {message}")]
    InspectParse { binary: String, message: String },
}

/// Task concurrency errors
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// The task already runs at its configured parallelism
    #[error("{rid} is already running {count} times (max_parallel={max})")]
    AlreadyRunning { rid: String, count: usize, max: usize },

    /// The run lock is held by another process and no wait was allowed
    #[error("Run lock {path} is held by another process")]
    LockBusy { path: String },

    /// The run lock could not be acquired in time
    #[error("Timed out after {secs}s waiting for run lock {path}")]
    LockTimeout { path: String, secs: u64 },
}

/// Task run confirmation errors
#[derive(Error, Debug)]
pub enum ConfirmError {
    /// Confirmation required but the run originates from the scheduler
    #[error("{rid}: run requires confirmation and cannot be confirmed from a scheduled run")]
    Scheduled { rid: String },

    /// Confirmation required but no terminal is attached
    #[error("{rid}: run requires confirmation and no terminal is attached")]
    NoTty { rid: String },

    /// The operator answered something other than the affirmative
    #[error("{rid}: run aborted (answer was '{answer}')")]
    Declined { rid: String, answer: String },

    /// No answer arrived in time
    #[error("{rid}: timed out after {secs}s waiting for confirmation")]
    Timeout { rid: String, secs: u64 },
}

/// On-disk state errors (run files, last-run records, locks)
#[derive(Error, Debug)]
pub enum StateError {
    /// Filesystem operation failed
    #[error("I/O error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Record could not be (de)serialized
    #[error("Invalid record {path}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum VesselError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Namespace resolution errors
    #[error("Namespace error: {0}")]
    Namespace(#[from] NamespaceError),

    /// Container engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Concurrency errors
    #[error("Concurrency error: {0}")]
    Concurrency(#[from] ConcurrencyError),

    /// Confirmation errors
    #[error("Confirmation error: {0}")]
    Confirm(#[from] ConfirmError),

    /// State persistence errors
    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl VesselError {
    /// True when the engine reported that the target container or image is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Engine(EngineError::NotFound { .. }))
    }

    /// True when the caller cancelled the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Engine(EngineError::Cancelled { .. }))
    }
}

/// Convenience type alias for Results with VesselError
pub type Result<T> = std::result::Result<T, VesselError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::InvalidRid {
            rid: "container".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid resource id 'container': expected <group>#<index>"
        );

        let error = ConfigError::EmptyRetcodes {
            mapping: "x:y".to_string(),
        };
        assert_eq!(error.to_string(), "Retcode mapping 'x:y' has no valid entry");
    }

    #[test]
    fn test_namespace_error_names_missing_rid() {
        let error = NamespaceError::MissingResource {
            kind: "netns".to_string(),
            rid: "container#9".to_string(),
        };
        assert_eq!(error.to_string(), "netns: resource container#9 not found");
    }

    #[test]
    fn test_concurrency_error_display() {
        let error = ConcurrencyError::AlreadyRunning {
            rid: "task#1".to_string(),
            count: 2,
            max: 2,
        };
        assert_eq!(
            error.to_string(),
            "task#1 is already running 2 times (max_parallel=2)"
        );
    }

    #[test]
    fn test_not_found_wraps_exit_failure() {
        let exit = EngineError::Exit {
            command: "docker container stop x".to_string(),
            code: 1,
            stderr: "Error: No such container: x".to_string(),
        };
        let err: VesselError = EngineError::NotFound {
            target: "container x".to_string(),
            source: Box::new(exit),
        }
        .into();

        assert!(err.is_not_found());
        assert!(!err.is_cancelled());
        let engine = err.source().expect("engine source");
        assert!(engine.source().is_some());
    }

    #[test]
    fn test_vessel_error_from_domain_errors() {
        let err: VesselError = ConfirmError::NoTty {
            rid: "task#1".to_string(),
        }
        .into();
        assert!(matches!(err, VesselError::Confirm(_)));

        let err: VesselError = ConcurrencyError::LockBusy {
            path: "/x".to_string(),
        }
        .into();
        assert!(matches!(err, VesselError::Concurrency(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err = VesselError::Engine(EngineError::NotInstalled {
            binary: "docker".to_string(),
        });
        let anyhow_error = anyhow::Error::from(err);
        assert!(anyhow_error.to_string().contains("Engine error"));
    }
}
