//! Object configuration
//!
//! An object is described by a TOML document: its identity, its private
//! variable directory and an ordered table of resources keyed by resource id.
//! The resource id group selects the resource kind (`container#...`,
//! `task#...`); other groups are kept as passive graph members.
//!
//! ```toml
//! namespace = "ns1"
//! name = "app"
//! var_dir = "/var/lib/vessel/ns1/app"
//!
//! [resources."container#1"]
//! image = "registry.example.com/web:1.4"
//! netns = ""
//!
//! [resources."task#backup"]
//! image = "busybox"
//! command = "sh -c 'tar czf /backup/data.tgz /data'"
//! netns = "container#1"
//! max_parallel = 1
//! retcodes = "0:up 1:down 2:warn"
//! ```
//!
//! Durations are integer seconds.

use crate::args::{FlagPolicies, FlagPolicy};
use crate::container::ContainerResource;
use crate::engine::{create_engine, EngineOptions};
use crate::env::{DirKeyStore, KeyStore};
use crate::errors::{ConfigError, Result, VesselError};
use crate::graph::{PassiveResource, ResourceGraph};
use crate::identity::{ObjectPath, ResourceId};
use crate::task::TaskResource;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Resource group driven as a long-lived container
pub const CONTAINER_GROUP: &str = "container";
/// Resource group driven as a one-shot task
pub const TASK_GROUP: &str = "task";

/// Image pull policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    /// Pull only when the image is not in the local store
    #[default]
    Missing,
    Always,
    Never,
}

/// How a task's resource status reflects its runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPolicy {
    /// Map the last run's exit code through the retcode table
    #[default]
    LastRun,
    /// Report not-applicable
    None,
}

/// Declarative configuration of a container-backed resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub image: String,
    /// Container name override
    pub name: Option<String>,
    pub pull: PullPolicy,

    pub entrypoint: Option<String>,
    /// Command, split with shell quoting rules
    pub command: Option<String>,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub privileged: bool,
    pub init: bool,
    pub tty: bool,
    pub interactive: bool,
    pub detach: bool,
    pub remove: bool,
    pub read_only: bool,
    pub cgroup_parent: Option<String>,
    pub stop_signal: Option<String>,

    pub devices: Vec<String>,
    pub volumes: Vec<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub dns_options: Vec<String>,
    pub labels: IndexMap<String, String>,

    /// `NAME=value` entries
    pub env: Vec<String>,
    /// `NAME=<secret>/<key>` or `<secret>/*` entries
    pub secrets_env: Vec<String>,
    /// `NAME=<config>/<key>` or `<config>/*` entries
    pub configs_env: Vec<String>,

    /// Free-form `container run` arguments, split with shell quoting rules
    pub run_args: String,
    /// Per-flag reconciliation of `run_args` with computed flags
    pub run_args_policy: IndexMap<String, FlagPolicy>,

    pub netns: String,
    pub pidns: String,
    pub ipcns: String,
    pub utsns: String,
    pub userns: String,

    pub pull_timeout: Option<u64>,
    pub start_timeout: Option<u64>,
    pub stop_timeout: Option<u64>,

    #[serde(flatten)]
    pub engine: EngineOptions,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            name: None,
            pull: PullPolicy::default(),
            entrypoint: None,
            command: None,
            hostname: None,
            user: None,
            workdir: None,
            privileged: false,
            init: false,
            tty: false,
            interactive: false,
            detach: true,
            remove: false,
            read_only: false,
            cgroup_parent: None,
            stop_signal: None,
            devices: Vec::new(),
            volumes: Vec::new(),
            dns: Vec::new(),
            dns_search: Vec::new(),
            dns_options: Vec::new(),
            labels: IndexMap::new(),
            env: Vec::new(),
            secrets_env: Vec::new(),
            configs_env: Vec::new(),
            run_args: String::new(),
            run_args_policy: IndexMap::new(),
            netns: String::new(),
            pidns: String::new(),
            ipcns: String::new(),
            utsns: String::new(),
            userns: String::new(),
            pull_timeout: None,
            start_timeout: None,
            stop_timeout: None,
            engine: EngineOptions::default(),
        }
    }
}

impl ContainerConfig {
    /// Flag reconciliation policies with the configured overrides applied
    pub fn flag_policies(&self) -> FlagPolicies {
        self.run_args_policy
            .iter()
            .fold(FlagPolicies::default(), |policies, (option, policy)| {
                policies.with(option.clone(), *policy)
            })
    }

    pub fn pull_timeout(&self) -> Option<Duration> {
        seconds(self.pull_timeout)
    }

    pub fn start_timeout(&self) -> Option<Duration> {
        seconds(self.start_timeout)
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        seconds(self.stop_timeout)
    }
}

fn seconds(value: Option<u64>) -> Option<Duration> {
    value.filter(|s| *s > 0).map(Duration::from_secs)
}

fn default_max_parallel() -> usize {
    1
}

fn default_lock_timeout() -> u64 {
    10
}

fn default_confirm_timeout() -> u64 {
    30
}

/// Declarative configuration of a task resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(flatten)]
    pub container: ContainerConfig,
    /// Exit code to status mapping, e.g. `"0:up 1:down"`
    #[serde(default)]
    pub retcodes: String,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Runs must be confirmed by an operator
    #[serde(default)]
    pub confirmation: bool,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout: u64,
    /// Bound on a whole run; unset or zero means unbounded
    #[serde(default)]
    pub run_timeout: Option<u64>,
    #[serde(default)]
    pub check: CheckPolicy,
    /// Wait for the run lock this long; zero fails immediately when held
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            container: ContainerConfig::default(),
            retcodes: String::new(),
            max_parallel: default_max_parallel(),
            confirmation: false,
            confirm_timeout: default_confirm_timeout(),
            run_timeout: None,
            check: CheckPolicy::default(),
            lock_timeout: default_lock_timeout(),
        }
    }
}

/// Object document as read from disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    pub var_dir: PathBuf,
    /// Secret and config store root; `<var_dir>/../store` when unset
    #[serde(default)]
    pub store_root: Option<PathBuf>,
    #[serde(default)]
    pub resources: IndexMap<String, toml::Value>,
}

impl ObjectConfig {
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading object configuration from {}", path.display());
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ObjectConfig = toml::from_str(content).map_err(|e| ConfigError::Parsing {
            message: e.to_string(),
        })?;
        if config.name.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "object name must not be empty".to_string(),
            }
            .into());
        }
        Ok(config)
    }

    pub fn path(&self) -> ObjectPath {
        ObjectPath::new(self.namespace.clone(), self.name.clone())
    }

    /// Secret and config store of the object's namespace
    pub fn store_dir(&self) -> PathBuf {
        let root = self.store_root.clone().unwrap_or_else(|| {
            self.var_dir
                .parent()
                .unwrap_or(&self.var_dir)
                .join("store")
        });
        root.join(&self.path().namespace)
    }

    /// Private directory of a resource
    pub fn resource_var_dir(&self, rid: &ResourceId) -> PathBuf {
        self.var_dir.join(rid.to_string())
    }

    /// Instantiate every resource and register it in the object's graph
    pub fn build(&self) -> Result<Object> {
        let path = self.path();
        let store: Arc<dyn KeyStore> = Arc::new(DirKeyStore::new(self.store_dir()));
        let mut object = Object {
            graph: ResourceGraph::new(path.clone()),
            containers: IndexMap::new(),
            tasks: IndexMap::new(),
        };

        for (key, value) in &self.resources {
            let rid: ResourceId = key.parse()?;
            match rid.group() {
                CONTAINER_GROUP => {
                    let config: ContainerConfig = decode_section(&rid, value)?;
                    let engine = create_engine(&config.engine);
                    let resource = Arc::new(ContainerResource::new(
                        path.clone(),
                        rid.clone(),
                        config,
                        engine,
                        store.clone(),
                    )?);
                    object.graph.insert(resource.clone());
                    object.containers.insert(rid, resource);
                }
                TASK_GROUP => {
                    let config: TaskConfig = decode_section(&rid, value)?;
                    let engine = create_engine(&config.container.engine);
                    let resource = Arc::new(TaskResource::new(
                        path.clone(),
                        rid.clone(),
                        config,
                        engine,
                        store.clone(),
                        self.resource_var_dir(&rid),
                    )?);
                    object.graph.insert(resource.clone());
                    object.tasks.insert(rid, resource);
                }
                _ => object.graph.insert(Arc::new(PassiveResource::new(rid))),
            }
        }
        debug!(object = %path, resources = object.graph.len(), "Built object resources");
        Ok(object)
    }
}

fn decode_section<T: serde::de::DeserializeOwned>(
    rid: &ResourceId,
    value: &toml::Value,
) -> std::result::Result<T, ConfigError> {
    value.clone().try_into().map_err(|e: toml::de::Error| ConfigError::Validation {
        message: format!("{}: {}", rid, e),
    })
}

/// Instantiated resources of an object
#[derive(Debug)]
pub struct Object {
    pub graph: ResourceGraph,
    pub containers: IndexMap<ResourceId, Arc<ContainerResource>>,
    pub tasks: IndexMap<ResourceId, Arc<TaskResource>>,
}

impl Object {
    pub fn container(&self, rid: &ResourceId) -> Option<&Arc<ContainerResource>> {
        self.containers.get(rid)
    }

    pub fn task(&self, rid: &ResourceId) -> Option<&Arc<TaskResource>> {
        self.tasks.get(rid)
    }

    /// Resolve a resource id that must name a container or task
    pub fn require(&self, rid: &str) -> Result<ResourceId> {
        let rid: ResourceId = rid.parse()?;
        if self.containers.contains_key(&rid) || self.tasks.contains_key(&rid) {
            Ok(rid)
        } else {
            Err(VesselError::Config(ConfigError::Validation {
                message: format!("no container or task resource {}", rid),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;

    const OBJECT: &str = r#"
namespace = "ns1"
name = "app"
var_dir = "/var/lib/vessel/ns1/app"

[resources."container#1"]
image = "nginx:1.25"
engine = "docker"
engine_version = "24.0.7"
stop_timeout = 15
labels = { tier = "web" }
run_args_policy = { "--user" = "prefer_user" }

[resources."ip#1"]
ipname = "10.0.0.2"

[resources."task#backup"]
image = "busybox"
engine = "podman"
command = "sh -c 'echo done'"
max_parallel = 2
retcodes = "0:up 1:warn"
check = "none"
"#;

    #[test]
    fn test_parse_object() {
        let config = ObjectConfig::from_toml_str(OBJECT).unwrap();
        assert_eq!(config.path().to_string(), "ns1/app");
        assert_eq!(config.resources.len(), 3);
        assert_eq!(
            config.store_dir(),
            PathBuf::from("/var/lib/vessel/ns1/store/ns1")
        );

        let rid: ResourceId = "container#1".parse().unwrap();
        let container: ContainerConfig =
            decode_section(&rid, &config.resources["container#1"]).unwrap();
        assert!(container.detach);
        assert_eq!(container.engine.engine, Some(EngineKind::Docker));
        assert_eq!(container.stop_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(container.flag_policies().policy("--user"), FlagPolicy::PreferUser);

        let rid: ResourceId = "task#backup".parse().unwrap();
        let task: TaskConfig = decode_section(&rid, &config.resources["task#backup"]).unwrap();
        assert_eq!(task.max_parallel, 2);
        assert_eq!(task.check, CheckPolicy::None);
        assert_eq!(task.lock_timeout, 10);
        assert_eq!(task.container.image, "busybox");
    }

    #[test]
    fn test_build_graph() {
        let object = ObjectConfig::from_toml_str(OBJECT).unwrap().build().unwrap();
        assert_eq!(object.graph.len(), 3);
        assert_eq!(object.containers.len(), 1);
        assert_eq!(object.tasks.len(), 1);
        assert!(object.require("task#backup").is_ok());
        assert!(object.require("ip#1").is_err());
        assert!(object.require("bogus").is_err());
    }

    #[test]
    fn test_invalid_documents() {
        assert!(ObjectConfig::from_toml_str("name = ").is_err());
        assert!(ObjectConfig::from_toml_str("name = \"\"\nvar_dir = \"/x\"").is_err());

        let bad_rid = "name = \"a\"\nvar_dir = \"/x\"\n[resources.\"container\"]\nimage = \"x\"";
        let err = ObjectConfig::from_toml_str(bad_rid).unwrap().build().unwrap_err();
        assert!(matches!(err, VesselError::Config(ConfigError::InvalidRid { .. })));

        let bad_field = "name = \"a\"\nvar_dir = \"/x\"\n[resources.\"container#1\"]\nimage = 3";
        let err = ObjectConfig::from_toml_str(bad_field).unwrap().build().unwrap_err();
        assert!(err.to_string().contains("container#1"));
    }
}
