//! Container engine variants
//!
//! Every engine family supplies a small capability set: argument shaping
//! (flag spellings, option aliases, namespace idioms), not-found
//! classification and inspect parsing. The lifecycle state machine lives once
//! in [`crate::lifecycle`] and is shared by all of them.

mod docker;
mod podman;
mod podman_remote;

pub use docker::DockerCli;
pub use podman::PodmanCli;
pub use podman_remote::PodmanRemote;

use crate::args::Args;
use crate::errors::EngineError;
use crate::inspect::{InspectSnapshot, RawInspect};
use crate::namespace::NamespaceKind;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variable overriding the docker binary
pub const DOCKER_BIN_ENV: &str = "VESSEL_DOCKER_BIN";
/// Environment variable overriding the podman binary
pub const PODMAN_BIN_ENV: &str = "VESSEL_PODMAN_BIN";

/// Engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    Docker,
    Podman,
    PodmanRemote,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
            Self::PodmanRemote => "podman-remote",
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = crate::errors::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            "podman-remote" => Ok(Self::PodmanRemote),
            _ => Err(crate::errors::ConfigError::Validation {
                message: format!(
                    "Unknown engine: {}. Supported engines: docker, podman, podman-remote",
                    s
                ),
            }),
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spelling of the `container stop` timeout flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTimeoutFlag {
    Time,
    Timeout,
}

impl StopTimeoutFlag {
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Time => "--time",
            Self::Timeout => "--timeout",
        }
    }
}

/// Declared engine capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub stop_timeout_flag: StopTimeoutFlag,
    /// Flag spelling for resolver options
    pub dns_option_flag: &'static str,
}

/// Terminal sub-state a caller can block on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    NotRunning,
    Removed,
}

impl std::fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRunning => f.write_str("not-running"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// Engine-specific behavior consumed by the lifecycle executor
pub trait Engine: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> EngineKind;

    /// Binary invoked for every sub-command
    fn binary(&self) -> &str;

    /// Arguments placed before the sub-command
    fn global_args(&self) -> Args {
        Args::new()
    }

    fn capabilities(&self) -> Capabilities;

    /// Short or legacy option spellings rewritten to their canonical form in
    /// user-supplied `run_args`
    fn user_arg_aliases(&self) -> &'static [(&'static str, &'static str)];

    /// True when `value` is an engine idiom for `kind` to pass through verbatim
    fn namespace_passthrough(&self, kind: NamespaceKind, value: &str) -> bool;

    /// `--condition` value for `container wait`, `None` when the engine cannot
    /// wait on that condition natively
    fn wait_condition(&self, condition: WaitCondition) -> Option<&'static str>;

    /// True when a failed invocation means the target does not exist
    fn is_not_found(&self, code: Option<i32>, stderr: &str) -> bool;

    /// Decode `container inspect` output
    fn parse_inspect(&self, stdout: &str) -> Result<Option<InspectSnapshot>, EngineError> {
        parse_inspect_document(self.binary(), stdout)
    }
}

/// Decode an inspect document that is either a single object or an array of
/// them. Empty output, `null` and `[]` all mean absent.
pub(crate) fn parse_inspect_document(
    binary: &str,
    stdout: &str,
) -> Result<Option<InspectSnapshot>, EngineError> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value =
        serde_json::from_str(stdout).map_err(|e| EngineError::InspectParse {
            binary: binary.to_string(),
            message: e.to_string(),
        })?;
    let document = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Array(mut items) => {
            if items.is_empty() {
                return Ok(None);
            }
            items.swap_remove(0)
        }
        other => other,
    };
    let raw: RawInspect =
        serde_json::from_value(document).map_err(|e| EngineError::InspectParse {
            binary: binary.to_string(),
            message: e.to_string(),
        })?;
    Ok(Some(raw.into()))
}

/// Case-insensitive "no such ..." detection shared by the engines
pub(crate) fn mentions_no_such(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    ["no such container", "no such object", "no such image"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

/// Namespace values every engine understands
pub(crate) fn common_passthrough(value: &str) -> bool {
    value.starts_with("container:")
}

/// Engine selection from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Engine family; detected from `PATH` when unset
    #[serde(default)]
    pub engine: Option<EngineKind>,
    /// Declared engine version, used to pick flag spellings
    #[serde(default)]
    pub engine_version: Option<String>,
    /// Service URL of a remote podman endpoint
    #[serde(default)]
    pub engine_url: Option<String>,
}

/// Locate an executable named `binary` in a `PATH`-style search list
pub fn find_in_path(binary: &str, path: Option<&OsStr>) -> Option<PathBuf> {
    let path = path?;
    std::env::split_paths(path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Default engine family: docker when its binary is on the search path,
/// podman otherwise
pub fn detect_default_engine(path: Option<&OsStr>) -> EngineKind {
    if find_in_path("docker", path).is_some() {
        EngineKind::Docker
    } else {
        EngineKind::Podman
    }
}

/// Build the engine binding selected by `options`
pub fn create_engine(options: &EngineOptions) -> Arc<dyn Engine> {
    let kind = options
        .engine
        .unwrap_or_else(|| detect_default_engine(std::env::var_os("PATH").as_deref()));
    let docker_bin = std::env::var(DOCKER_BIN_ENV).unwrap_or_else(|_| "docker".to_string());
    let podman_bin = std::env::var(PODMAN_BIN_ENV).unwrap_or_else(|_| "podman".to_string());
    debug!(engine = %kind, "Selected container engine");

    match kind {
        EngineKind::Docker => Arc::new(
            DockerCli::with_path(docker_bin).with_version(options.engine_version.as_deref()),
        ),
        EngineKind::Podman => Arc::new(PodmanCli::with_path(podman_bin)),
        EngineKind::PodmanRemote => {
            Arc::new(PodmanRemote::with_path(podman_bin).with_url(options.engine_url.clone()))
        }
    }
}
