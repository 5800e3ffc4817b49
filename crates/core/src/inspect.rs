//! Container inspect snapshots and their per-resource cache
//!
//! Engines emit structurally similar inspect documents. Each engine variant
//! decodes its own shape (see [`Engine::parse_inspect`](crate::engine::Engine::parse_inspect))
//! into the engine-agnostic [`InspectSnapshot`]. The cache distinguishes "never
//! inspected" from "inspected and absent".

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Engine-agnostic projection of an engine container's state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectSnapshot {
    pub id: String,
    pub running: bool,
    pub pid: i64,
    pub exit_code: i32,
    pub status: String,
    pub auto_remove: bool,
    pub sandbox_key: String,
}

/// Inspect document shape shared by the engines. Every field is optional and
/// `null` tolerant.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub(crate) struct RawInspect {
    id: Option<String>,
    state: Option<RawState>,
    host_config: Option<RawHostConfig>,
    network_settings: Option<RawNetworkSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawState {
    running: Option<bool>,
    pid: Option<i64>,
    exit_code: Option<i32>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawHostConfig {
    auto_remove: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawNetworkSettings {
    sandbox_key: Option<String>,
}

impl From<RawInspect> for InspectSnapshot {
    fn from(raw: RawInspect) -> Self {
        let state = raw.state.unwrap_or_default();
        Self {
            id: raw.id.unwrap_or_default(),
            running: state.running.unwrap_or_default(),
            pid: state.pid.unwrap_or_default(),
            exit_code: state.exit_code.unwrap_or_default(),
            status: state.status.unwrap_or_default(),
            auto_remove: raw
                .host_config
                .and_then(|h| h.auto_remove)
                .unwrap_or_default(),
            sandbox_key: raw
                .network_settings
                .and_then(|n| n.sandbox_key)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum CacheState {
    #[default]
    NotInspected,
    Inspected(Option<InspectSnapshot>),
}

/// Last inspect result of one container, replaced wholesale on refresh
#[derive(Debug, Default)]
pub struct InspectCache {
    state: Mutex<CacheState>,
}

impl InspectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result; `None` when never inspected, `Some(None)` when inspected
    /// and absent
    pub fn get(&self) -> Option<Option<InspectSnapshot>> {
        match &*self.lock() {
            CacheState::NotInspected => None,
            CacheState::Inspected(snapshot) => Some(snapshot.clone()),
        }
    }

    pub fn store(&self, snapshot: Option<InspectSnapshot>) {
        *self.lock() = CacheState::Inspected(snapshot);
    }

    /// Forget the cached result so the next read triggers a refresh
    pub fn invalidate(&self) {
        *self.lock() = CacheState::NotInspected;
    }

    pub fn is_inspected(&self) -> bool {
        !matches!(*self.lock(), CacheState::NotInspected)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // State is replaced wholesale, a poisoned guard still holds a coherent value
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_inspect_full_document() {
        let raw: RawInspect = serde_json::from_str(
            r#"{
                "Id": "abc123",
                "State": {"Running": true, "Pid": 4242, "ExitCode": 0, "Status": "running"},
                "HostConfig": {"AutoRemove": true},
                "NetworkSettings": {"SandboxKey": "/var/run/docker/netns/abc"}
            }"#,
        )
        .unwrap();
        let snapshot = InspectSnapshot::from(raw);
        assert_eq!(snapshot.id, "abc123");
        assert!(snapshot.running);
        assert_eq!(snapshot.pid, 4242);
        assert!(snapshot.auto_remove);
        assert_eq!(snapshot.sandbox_key, "/var/run/docker/netns/abc");
    }

    #[test]
    fn test_raw_inspect_tolerates_missing_and_null_fields() {
        let raw: RawInspect =
            serde_json::from_str(r#"{"Id": "x", "State": null, "HostConfig": {}}"#).unwrap();
        let snapshot = InspectSnapshot::from(raw);
        assert_eq!(snapshot.id, "x");
        assert!(!snapshot.running);
        assert_eq!(snapshot.pid, 0);
        assert!(!snapshot.auto_remove);
        assert!(snapshot.sandbox_key.is_empty());
    }

    #[test]
    fn test_cache_distinguishes_not_inspected_from_absent() {
        let cache = InspectCache::new();
        assert_eq!(cache.get(), None);
        assert!(!cache.is_inspected());

        cache.store(None);
        assert_eq!(cache.get(), Some(None));
        assert!(cache.is_inspected());

        cache.store(Some(InspectSnapshot {
            id: "abc".to_string(),
            ..Default::default()
        }));
        assert_eq!(cache.get().flatten().map(|s| s.id), Some("abc".to_string()));

        cache.invalidate();
        assert_eq!(cache.get(), None);
    }
}
