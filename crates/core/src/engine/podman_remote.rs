//! Podman service binding
//!
//! Drives a podman API service through the podman client in remote mode. The
//! service reports failures as wrapped error values whose text carries the
//! library sentinel (`no such container`, `no such image`); the client exit
//! status is not a reliable not-found signal in this mode.

use super::podman::{podman_capabilities, podman_passthrough, podman_wait_condition, ALIASES};
use super::{mentions_no_such, Capabilities, Engine, EngineKind, WaitCondition};
use crate::args::Args;
use crate::namespace::NamespaceKind;

#[derive(Debug, Clone)]
pub struct PodmanRemote {
    binary: String,
    url: Option<String>,
}

impl PodmanRemote {
    pub fn with_path(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            url: None,
        }
    }

    /// Service URL (`unix:///run/podman/podman.sock`, `ssh://...`); the
    /// client default connection is used when unset
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url.filter(|u| !u.trim().is_empty());
        self
    }
}

impl Default for PodmanRemote {
    fn default() -> Self {
        Self::with_path("podman")
    }
}

impl Engine for PodmanRemote {
    fn kind(&self) -> EngineKind {
        EngineKind::PodmanRemote
    }

    fn binary(&self) -> &str {
        &self.binary
    }

    fn global_args(&self) -> Args {
        let mut args = Args::new();
        args.word("--remote");
        if let Some(ref url) = self.url {
            args.option_value("--url", url.clone());
        }
        args
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

    fn is_not_found(&self, _code: Option<i32>, stderr: &str) -> bool {
        mentions_no_such(stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_args_carry_url() {
        let remote = PodmanRemote::default().with_url(Some("unix:///run/podman/podman.sock".into()));
        assert_eq!(
            remote.global_args().to_argv(),
            vec!["--remote", "--url", "unix:///run/podman/podman.sock"]
        );
        let remote = PodmanRemote::default().with_url(Some(" ".into()));
        assert_eq!(remote.global_args().to_argv(), vec!["--remote"]);
    }

    #[test]
    fn test_not_found_uses_sentinel_text() {
        let remote = PodmanRemote::default();
        assert!(remote.is_not_found(
            Some(125),
            "Error: no container with name or ID \"x\" found: no such container"
        ));
        assert!(remote.is_not_found(Some(1), "Error: x: no such image"));
        assert!(!remote.is_not_found(Some(125), ""));
    }

    #[test]
    fn test_parse_inspect_accepts_bare_object() {
        let remote = PodmanRemote::default();
        let snapshot = remote
            .parse_inspect(r#"{"Id": "c1", "State": {"Running": false, "ExitCode": 3}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.exit_code, 3);
        assert!(!snapshot.running);
    }
}
