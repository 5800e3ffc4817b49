//! Object and resource identity
//!
//! Container names and labels are derived deterministically from the owning
//! object's namespace and name plus the resource id, so repeated runs address
//! the same external container.

use crate::errors::ConfigError;
use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

/// Namespace whose objects render without a namespace prefix
pub const ROOT_NAMESPACE: &str = "root";

/// Label keys stamped on every container
pub const LABEL_PATH: &str = "vessel.path";
pub const LABEL_NAMESPACE: &str = "vessel.namespace";
pub const LABEL_NAME: &str = "vessel.name";
pub const LABEL_RID: &str = "vessel.rid";

/// Identity of the object owning a set of resources
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath {
    pub namespace: String,
    pub name: String,
}

impl ObjectPath {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: if namespace.is_empty() {
                ROOT_NAMESPACE.to_string()
            } else {
                namespace
            },
            name: name.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.namespace == ROOT_NAMESPACE
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Resource identifier within an object, e.g. `container#1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    group: String,
    index: String,
}

impl ResourceId {
    /// Driver group, the part before `#`
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Index within the group, the part after `#`
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Form usable inside container names (`container#1` -> `container.1`)
    pub fn dotted(&self) -> String {
        format!("{}.{}", self.group, self.index)
    }

    /// True when the string looks like a resource id, valid or not
    pub fn looks_like(s: &str) -> bool {
        s.contains('#')
    }
}

impl FromStr for ResourceId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidRid { rid: s.to_string() };
        let (group, index) = s.split_once('#').ok_or_else(invalid)?;
        let valid_part = |p: &str| {
            !p.is_empty()
                && p.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        if !valid_part(group) || !valid_part(index) {
            return Err(invalid());
        }
        Ok(Self {
            group: group.to_string(),
            index: index.to_string(),
        })
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.group, self.index)
    }
}

/// Deterministic container name for a resource of an object
pub fn container_name(path: &ObjectPath, rid: &ResourceId) -> String {
    if path.is_root() {
        format!("{}.{}", path.name, rid.dotted())
    } else {
        format!("{}..{}.{}", path.namespace, path.name, rid.dotted())
    }
}

/// Identity labels for a resource's container
pub fn labels(path: &ObjectPath, rid: &ResourceId) -> IndexMap<String, String> {
    let mut labels = IndexMap::new();
    labels.insert(LABEL_PATH.to_string(), path.to_string());
    labels.insert(LABEL_NAMESPACE.to_string(), path.namespace.clone());
    labels.insert(LABEL_NAME.to_string(), path.name.clone());
    labels.insert(LABEL_RID.to_string(), rid.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_parse() {
        let rid: ResourceId = "container#1".parse().unwrap();
        assert_eq!(rid.group(), "container");
        assert_eq!(rid.index(), "1");
        assert_eq!(rid.to_string(), "container#1");
        assert_eq!(rid.dotted(), "container.1");

        let rid: ResourceId = "task#nightly-backup".parse().unwrap();
        assert_eq!(rid.index(), "nightly-backup");
    }

    #[test]
    fn test_resource_id_rejects_malformed() {
        for bad in ["container", "#1", "container#", "con tainer#1", "a#b#c"] {
            assert!(bad.parse::<ResourceId>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_container_name_namespaced() {
        let path = ObjectPath::new("ns1", "app");
        let rid: ResourceId = "container#1".parse().unwrap();
        assert_eq!(container_name(&path, &rid), "ns1..app.container.1");
    }

    #[test]
    fn test_container_name_root_namespace() {
        let path = ObjectPath::new("", "app");
        let rid: ResourceId = "task#2".parse().unwrap();
        assert_eq!(path.to_string(), "app");
        assert_eq!(container_name(&path, &rid), "app.task.2");
    }

    #[test]
    fn test_labels() {
        let path = ObjectPath::new("ns1", "app");
        let rid: ResourceId = "container#1".parse().unwrap();
        let labels = labels(&path, &rid);
        assert_eq!(labels.get(LABEL_PATH).unwrap(), "ns1/app");
        assert_eq!(labels.get(LABEL_RID).unwrap(), "container#1");
        assert_eq!(labels.len(), 4);
    }
}
