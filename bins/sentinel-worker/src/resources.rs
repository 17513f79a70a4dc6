// Target-side resources created during a run.
// Registered by cases, consumed once by the cleanup phase, never persisted.

use crate::target::GuestKind;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    Vm { vmid: u32 },
    Container { vmid: u32 },
    /// Snapshot of a guest. The parent's kind was resolved when it was taken.
    Snapshot { guest: GuestKind, vmid: u32 },
    /// Registered by a case this worker has no teardown for.
    Other(String),
}

impl ResourceKind {
    /// Dependent kinds sort first so they are gone before their parents.
    fn cleanup_priority(&self) -> u8 {
        match self {
            ResourceKind::Snapshot { .. } => 0,
            ResourceKind::Vm { .. } | ResourceKind::Container { .. } => 1,
            ResourceKind::Other(_) => 2,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ResourceKind::Vm { .. } => "VM",
            ResourceKind::Container { .. } => "Container",
            ResourceKind::Snapshot { .. } => "Snapshot",
            ResourceKind::Other(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedResource {
    pub kind: ResourceKind,
    /// Node the resource lives on
    pub location: String,
    pub identifier: String,
    pub display_name: String,
}

impl ManagedResource {
    pub fn vm(node: &str, vmid: u32, name: &str) -> Self {
        Self {
            kind: ResourceKind::Vm { vmid },
            location: node.to_string(),
            identifier: vmid.to_string(),
            display_name: name.to_string(),
        }
    }

    pub fn container(node: &str, vmid: u32, hostname: &str) -> Self {
        Self {
            kind: ResourceKind::Container { vmid },
            location: node.to_string(),
            identifier: vmid.to_string(),
            display_name: hostname.to_string(),
        }
    }

    pub fn snapshot(node: &str, guest: GuestKind, vmid: u32, name: &str) -> Self {
        Self {
            kind: ResourceKind::Snapshot { guest, vmid },
            location: node.to_string(),
            identifier: name.to_string(),
            display_name: name.to_string(),
        }
    }
}

impl fmt::Display for ManagedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' (ID/Name: {}) on {}",
            self.kind.label(),
            self.display_name,
            self.identifier,
            self.location
        )
    }
}

/// Creation history of one run, in registration order.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: Vec<ManagedResource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: ManagedResource) {
        self.resources.push(resource);
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ManagedResource> {
        self.resources.iter()
    }

    /// Empty the registry, returning resources in deletion order:
    /// dependent kinds first, newest first within a kind.
    pub fn drain_for_cleanup(&mut self) -> Vec<ManagedResource> {
        let mut ordered: Vec<_> = self.resources.drain(..).rev().collect();
        // Stable sort keeps reverse registration order inside each priority.
        ordered.sort_by_key(|r| r.kind.cleanup_priority());
        ordered
    }
}
