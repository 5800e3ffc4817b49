//! Namespace sharing references
//!
//! A container may own its namespaces, share the host's, or join those of a
//! sibling resource of the same object (`container#1`). Sibling container names
//! embed the owning object's identity and are only computed at resolution time,
//! through the sibling's [`ContainerIdentity`](crate::graph::ContainerIdentity)
//! capability.

use crate::engine::Engine;
use crate::errors::NamespaceError;
use crate::graph::ResourceLookup;
use crate::identity::ResourceId;
use std::fmt;
use tracing::debug;

/// Namespace kinds a container can share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Net,
    Pid,
    Ipc,
    Uts,
    User,
}

impl NamespaceKind {
    pub const ALL: [NamespaceKind; 5] = [Self::Net, Self::Pid, Self::Ipc, Self::Uts, Self::User];

    /// Configuration keyword
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Net => "netns",
            Self::Pid => "pidns",
            Self::Ipc => "ipcns",
            Self::Uts => "utsns",
            Self::User => "userns",
        }
    }

    /// Engine `run` flag
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Net => "--network",
            Self::Pid => "--pid",
            Self::Ipc => "--ipc",
            Self::Uts => "--uts",
            Self::User => "--userns",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Parsed namespace reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceRef {
    /// Not configured; the container owns the namespace
    Unset,
    /// Explicit `none`
    None,
    /// Share the host namespace
    Host,
    /// Join the namespace of a sibling resource
    Resource(ResourceId),
    /// Engine-specific value passed through verbatim (`keep-id`, `ns:/path`...)
    Raw(String),
}

impl NamespaceRef {
    /// Parse a configured value for a namespace kind
    pub fn parse(
        kind: NamespaceKind,
        value: &str,
        engine: &dyn Engine,
    ) -> Result<Self, NamespaceError> {
        let value = value.trim();
        match value {
            "" => return Ok(Self::Unset),
            "none" => return Ok(Self::None),
            "host" => return Ok(Self::Host),
            _ => {}
        }
        if engine.namespace_passthrough(kind, value) {
            return Ok(Self::Raw(value.to_string()));
        }
        if ResourceId::looks_like(value) {
            return value
                .parse::<ResourceId>()
                .map(Self::Resource)
                .map_err(|_| NamespaceError::Parse {
                    kind: kind.to_string(),
                    value: value.to_string(),
                });
        }
        Err(NamespaceError::Parse {
            kind: kind.to_string(),
            value: value.to_string(),
        })
    }

    /// True for references that keep the container in its own namespace
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Unset | Self::None)
    }
}

/// Resolve a configured namespace value into the engine flag value.
///
/// Returns `Ok(None)` for an unset reference. Only sibling references consult
/// the resource lookup.
pub fn resolve(
    kind: NamespaceKind,
    value: &str,
    lookup: &dyn ResourceLookup,
    engine: &dyn Engine,
) -> Result<Option<String>, NamespaceError> {
    let resolved = match NamespaceRef::parse(kind, value, engine)? {
        NamespaceRef::Unset => None,
        NamespaceRef::None => Some("none".to_string()),
        NamespaceRef::Host => Some("host".to_string()),
        NamespaceRef::Raw(raw) => Some(raw),
        NamespaceRef::Resource(rid) => {
            let sibling = lookup
                .find(&rid)
                .ok_or_else(|| NamespaceError::MissingResource {
                    kind: kind.to_string(),
                    rid: rid.to_string(),
                })?;
            let identity =
                sibling
                    .container_identity()
                    .ok_or_else(|| NamespaceError::NotJoinable {
                        kind: kind.to_string(),
                        rid: rid.to_string(),
                    })?;
            Some(format!("container:{}", identity.container_name()))
        }
    };
    debug!(kind = %kind, value, resolved = ?resolved, "Resolved namespace reference");
    Ok(resolved)
}
