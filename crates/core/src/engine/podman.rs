//! Podman CLI engine

use super::{
    common_passthrough, mentions_no_such, Capabilities, Engine, EngineKind, StopTimeoutFlag,
    WaitCondition,
};
use crate::namespace::NamespaceKind;

/// Exit status podman uses for "no such container/image"
pub(crate) const EXIT_NOT_FOUND: i32 = 125;

pub(crate) const ALIASES: &[(&str, &str)] = &[
    ("-e", "--env"),
    ("-v", "--volume"),
    ("-l", "--label"),
    ("-h", "--hostname"),
    ("-u", "--user"),
    ("-w", "--workdir"),
    ("--net", "--network"),
    ("--dns-option", "--dns-opt"),
];

/// Podman namespace idioms, shared with the remote binding
pub(crate) fn podman_passthrough(kind: NamespaceKind, value: &str) -> bool {
    if common_passthrough(value) || value.starts_with("ns:") {
        return true;
    }
    match kind {
        NamespaceKind::Net => {
            matches!(value, "bridge" | "private")
                || value.starts_with("slirp4netns")
                || value.starts_with("pasta")
        }
        NamespaceKind::Ipc => matches!(value, "private" | "shareable"),
        NamespaceKind::Pid | NamespaceKind::Uts => value == "private",
        NamespaceKind::User => {
            matches!(value, "auto" | "keep-id" | "nomap" | "private")
                || value.starts_with("auto:")
                || value.starts_with("keep-id:")
        }
    }
}

pub(crate) fn podman_wait_condition(condition: WaitCondition) -> Option<&'static str> {
    match condition {
        WaitCondition::NotRunning => Some("stopped"),
        WaitCondition::Removed => Some("removing"),
    }
}

pub(crate) fn podman_capabilities() -> Capabilities {
    Capabilities {
        stop_timeout_flag: StopTimeoutFlag::Time,
        dns_option_flag: "--dns-opt",
    }
}

/// Podman CLI binding
#[derive(Debug, Clone)]
pub struct PodmanCli {
    binary: String,
}

impl PodmanCli {
    pub fn with_path(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for PodmanCli {
    fn default() -> Self {
        Self::with_path("podman")
    }
}

impl Engine for PodmanCli {
    fn kind(&self) -> EngineKind {
        EngineKind::Podman
    }

    fn binary(&self) -> &str {
        &self.binary
    }

    fn capabilities(&self) -> Capabilities {
        podman_capabilities()
    }

    fn user_arg_aliases(&self) -> &'static [(&'static str, &'static str)] {
        ALIASES
    }

    fn namespace_passthrough(&self, kind: NamespaceKind, value: &str) -> bool {
        podman_passthrough(kind, value)
    }

    fn wait_condition(&self, condition: WaitCondition) -> Option<&'static str> {
        podman_wait_condition(condition)
    }

    fn is_not_found(&self, code: Option<i32>, stderr: &str) -> bool {
        match code {
            Some(EXIT_NOT_FOUND) => stderr.trim().is_empty() || mentions_no_such(stderr),
            // `rm` reports a missing container with status 1
            Some(1) => stderr.to_lowercase().contains("no such container"),
            _ => false,
        }
    }
}
