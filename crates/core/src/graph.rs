//! Resource graph of an object
//!
//! The graph is a read-only registry of the resources declared by one object,
//! indexed by resource id. It is injected wherever a resource needs to look up
//! a sibling (namespace sharing) instead of living in global state.

use crate::identity::{ObjectPath, ResourceId};
use indexmap::IndexMap;
use std::sync::Arc;

/// Capability of resources backed by an addressable container
pub trait ContainerIdentity {
    /// Name of the engine container backing the resource
    fn container_name(&self) -> String;
}

/// A resource declared by an object
pub trait Resource: Send + Sync {
    /// Resource id within the owning object
    fn rid(&self) -> &ResourceId;

    /// Driver name, e.g. `container.docker` or `task.podman`
    fn driver(&self) -> String;

    /// Container identity, for resources other containers may join
    fn container_identity(&self) -> Option<&dyn ContainerIdentity> {
        None
    }
}

/// Lookup of sibling resources by id
pub trait ResourceLookup {
    fn find(&self, rid: &ResourceId) -> Option<Arc<dyn Resource>>;
}

/// Ordered registry of an object's resources
#[derive(Clone)]
pub struct ResourceGraph {
    path: ObjectPath,
    resources: IndexMap<ResourceId, Arc<dyn Resource>>,
}

impl ResourceGraph {
    pub fn new(path: ObjectPath) -> Self {
        Self {
            path,
            resources: IndexMap::new(),
        }
    }

    /// Register a resource, replacing any previous one with the same id
    pub fn insert(&mut self, resource: Arc<dyn Resource>) {
        self.resources.insert(resource.rid().clone(), resource);
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resource ids in declaration order
    pub fn rids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }
}

impl ResourceLookup for ResourceGraph {
    fn find(&self, rid: &ResourceId) -> Option<Arc<dyn Resource>> {
        self.resources.get(rid).cloned()
    }
}

impl std::fmt::Debug for ResourceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGraph")
            .field("path", &self.path)
            .field("rids", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Resource the engine does not drive, kept in the graph so references to it
/// resolve to a precise error instead of "not found"
#[derive(Debug, Clone)]
pub struct PassiveResource {
    rid: ResourceId,
}

impl PassiveResource {
    pub fn new(rid: ResourceId) -> Self {
        Self { rid }
    }
}

impl Resource for PassiveResource {
    fn rid(&self) -> &ResourceId {
        &self.rid
    }

    fn driver(&self) -> String {
        self.rid.group().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_lookup() {
        let mut graph = ResourceGraph::new(ObjectPath::new("ns1", "app"));
        let rid: ResourceId = "ip#1".parse().unwrap();
        graph.insert(Arc::new(PassiveResource::new(rid.clone())));

        let found = graph.find(&rid).expect("registered resource");
        assert_eq!(found.driver(), "ip");
        assert!(found.container_identity().is_none());
        assert!(graph.find(&"ip#2".parse().unwrap()).is_none());
        assert_eq!(graph.len(), 1);
    }
}
