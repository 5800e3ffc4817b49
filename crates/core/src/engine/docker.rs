//! Docker CLI engine

use super::{
    common_passthrough, mentions_no_such, Capabilities, Engine, EngineKind, StopTimeoutFlag,
    WaitCondition,
};
use crate::namespace::NamespaceKind;

/// First docker release accepting `container stop --timeout`
const TIMEOUT_FLAG_SINCE: u32 = 23;

const ALIASES: &[(&str, &str)] = &[
    ("-e", "--env"),
    ("-v", "--volume"),
    ("-l", "--label"),
    ("-h", "--hostname"),
    ("-u", "--user"),
    ("-w", "--workdir"),
    ("--net", "--network"),
    ("--dns-opt", "--dns-option"),
];

/// Docker CLI binding
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    /// Major version declared in configuration
    major_version: Option<u32>,
}

impl DockerCli {
    pub fn with_path(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            major_version: None,
        }
    }

    /// Record the declared engine version (`"24.0.7"`); unparseable values are
    /// treated as undeclared
    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.major_version = version
            .and_then(|v| v.trim().trim_start_matches('v').split('.').next())
            .and_then(|major| major.parse().ok());
        self
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::with_path("docker")
    }
}

impl Engine for DockerCli {
    fn kind(&self) -> EngineKind {
        EngineKind::Docker
    }

    fn binary(&self) -> &str {
        &self.binary
    }

    fn capabilities(&self) -> Capabilities {
        let stop_timeout_flag = match self.major_version {
            Some(major) if major >= TIMEOUT_FLAG_SINCE => StopTimeoutFlag::Timeout,
            _ => StopTimeoutFlag::Time,
        };
        Capabilities {
            stop_timeout_flag,
            dns_option_flag: "--dns-option",
        }
    }

    fn user_arg_aliases(&self) -> &'static [(&'static str, &'static str)] {
        ALIASES
    }

    fn namespace_passthrough(&self, kind: NamespaceKind, value: &str) -> bool {
        if common_passthrough(value) {
            return true;
        }
        match kind {
            NamespaceKind::Net => matches!(value, "bridge" | "default"),
            NamespaceKind::Ipc => matches!(value, "private" | "shareable"),
            NamespaceKind::Pid | NamespaceKind::Uts | NamespaceKind::User => false,
        }
    }

    fn wait_condition(&self, _condition: WaitCondition) -> Option<&'static str> {
        // The docker CLI waits for the container to stop and has no condition flag
        None
    }

    fn is_not_found(&self, _code: Option<i32>, stderr: &str) -> bool {
        mentions_no_such(stderr)
    }
}
