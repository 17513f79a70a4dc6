/// Simulated Target - In-Memory Managed Infrastructure
///
/// Stands in for a live cluster: guests, snapshots and storages live in a
/// process-local map. It enforces the same dependency constraint a real
/// hypervisor does: a guest that still has snapshots cannot be deleted.
///
/// Nodes are created on first use, so any configured node name is valid.

use crate::target::{
    ClusterResource, ContainerSpec, GuestKind, GuestStatus, NodeStatus, SnapshotInfo,
    StorageInfo, TargetAdapter, TargetError, TargetSession, VmSpec,
};
use async_trait::async_trait;
use sentinel_common::types::TargetProfile;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SIMULATED_VERSION: &str = "sim-pve-8.1";

#[derive(Debug, Clone)]
struct SimGuest {
    kind: GuestKind,
    name: String,
    running: bool,
    snapshots: Vec<SnapshotInfo>,
}

#[derive(Debug, Default)]
struct SimState {
    /// (node, vmid) -> guest
    guests: BTreeMap<(String, u32), SimGuest>,
}

/// Adapter handing out sessions onto one shared simulated cluster
#[derive(Clone, Default)]
pub struct SimulatedTarget {
    state: Arc<Mutex<SimState>>,
    unreachable: bool,
}

impl SimulatedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// A target whose `connect` always fails.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub async fn guest_count(&self) -> usize {
        self.state.lock().await.guests.len()
    }
}

#[async_trait]
impl TargetAdapter for SimulatedTarget {
    async fn connect(&self, profile: &TargetProfile) -> Result<Arc<dyn TargetSession>, TargetError> {
        if self.unreachable {
            return Err(TargetError::Connection(format!(
                "{}:{} is unreachable",
                profile.host, profile.port
            )));
        }

        info!(
            host = %profile.host,
            port = profile.port,
            user = %format!("{}@{}", profile.username, profile.realm),
            verify_ssl = profile.verify_ssl,
            "Connected to simulated target"
        );

        Ok(Arc::new(SimulatedSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct SimulatedSession {
    state: Arc<Mutex<SimState>>,
}

fn guest_not_found(node: &str, kind: GuestKind, vmid: u32) -> TargetError {
    TargetError::NotFound {
        node: node.to_string(),
        what: format!("{} guest {}", kind, vmid),
    }
}

impl SimState {
    fn guest_mut(&mut self, node: &str, kind: GuestKind, vmid: u32) -> Result<&mut SimGuest, TargetError> {
        match self.guests.get_mut(&(node.to_string(), vmid)) {
            Some(guest) if guest.kind == kind => Ok(guest),
            _ => Err(guest_not_found(node, kind, vmid)),
        }
    }

    fn insert_guest(&mut self, node: &str, vmid: u32, guest: SimGuest) -> Result<(), TargetError> {
        let key = (node.to_string(), vmid);
        if self.guests.contains_key(&key) {
            return Err(TargetError::Rejected(format!("guest {} already exists", vmid)));
        }
        self.guests.insert(key, guest);
        Ok(())
    }
}

fn status_of(vmid: u32, guest: &SimGuest) -> GuestStatus {
    GuestStatus {
        vmid,
        name: guest.name.clone(),
        kind: guest.kind,
        status: if guest.running { "running" } else { "stopped" }.to_string(),
    }
}

#[async_trait]
impl TargetSession for SimulatedSession {
    async fn version(&self) -> Result<String, TargetError> {
        Ok(SIMULATED_VERSION.to_string())
    }

    async fn list_resources(&self) -> Result<Vec<ClusterResource>, TargetError> {
        let state = self.state.lock().await;
        Ok(state
            .guests
            .iter()
            .map(|((node, vmid), guest)| ClusterResource {
                id: format!("{}/{}", guest.kind, vmid),
                kind: guest.kind.to_string(),
                node: node.clone(),
                status: Some(status_of(*vmid, guest).status),
            })
            .collect())
    }

    async fn node_status(&self, node: &str) -> Result<NodeStatus, TargetError> {
        let state = self.state.lock().await;
        let running = state
            .guests
            .iter()
            .filter(|((n, _), g)| n == node && g.running)
            .count() as u64;
        Ok(NodeStatus {
            node: node.to_string(),
            status: "online".to_string(),
            cpu: 0.1,
            max_cpu: 4,
            memory_used: (1 + running) * 1024 * 1024 * 1024,
            memory_total: 16 * 1024 * 1024 * 1024,
        })
    }

    async fn list_storage(&self, _node: &str) -> Result<Vec<StorageInfo>, TargetError> {
        Ok(vec![
            StorageInfo {
                storage: "local".to_string(),
                kind: "dir".to_string(),
                content: "images,iso,vztmpl,backup,snippets".to_string(),
                total_bytes: 100 * 1024u64.pow(3),
                used_bytes: 20 * 1024u64.pow(3),
            },
            StorageInfo {
                storage: "local-lvm".to_string(),
                kind: "lvmthin".to_string(),
                content: "images,rootdir".to_string(),
                total_bytes: 200 * 1024u64.pow(3),
                used_bytes: 50 * 1024u64.pow(3),
            },
        ])
    }

    async fn guest_kind(&self, node: &str, vmid: u32) -> Result<Option<GuestKind>, TargetError> {
        let state = self.state.lock().await;
        Ok(state.guests.get(&(node.to_string(), vmid)).map(|g| g.kind))
    }

    async fn create_vm(&self, node: &str, spec: &VmSpec) -> Result<(), TargetError> {
        debug!(node, vmid = spec.vmid, name = %spec.name, "Simulated VM create");
        self.state.lock().await.insert_guest(
            node,
            spec.vmid,
            SimGuest {
                kind: GuestKind::Qemu,
                name: spec.name.clone(),
                running: false,
                snapshots: Vec::new(),
            },
        )
    }

    async fn create_container(&self, node: &str, spec: &ContainerSpec) -> Result<(), TargetError> {
        debug!(node, vmid = spec.vmid, hostname = %spec.hostname, "Simulated container create");
        self.state.lock().await.insert_guest(
            node,
            spec.vmid,
            SimGuest {
                kind: GuestKind::Lxc,
                name: spec.hostname.clone(),
                running: false,
                snapshots: Vec::new(),
            },
        )
    }

    async fn guest_status(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<GuestStatus, TargetError> {
        let mut state = self.state.lock().await;
        let guest = state.guest_mut(node, kind, vmid)?;
        Ok(status_of(vmid, guest))
    }

    async fn set_guest_running(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u32,
        running: bool,
    ) -> Result<GuestStatus, TargetError> {
        let mut state = self.state.lock().await;
        let guest = state.guest_mut(node, kind, vmid)?;
        guest.running = running;
        Ok(status_of(vmid, guest))
    }

    async fn delete_guest(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<(), TargetError> {
        let mut state = self.state.lock().await;
        let guest = state.guest_mut(node, kind, vmid)?;
        if !guest.snapshots.is_empty() {
            return Err(TargetError::Rejected(format!(
                "{} guest {} still has {} snapshot(s)",
                kind,
                vmid,
                guest.snapshots.len()
            )));
        }
        state.guests.remove(&(node.to_string(), vmid));
        Ok(())
    }

    async fn create_snapshot(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u32,
        name: &str,
        description: &str,
    ) -> Result<(), TargetError> {
        let mut state = self.state.lock().await;
        let guest = state.guest_mut(node, kind, vmid)?;
        if guest.snapshots.iter().any(|s| s.name == name) {
            return Err(TargetError::Rejected(format!("snapshot '{}' already exists", name)));
        }
        guest.snapshots.push(SnapshotInfo {
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(())
    }

    async fn list_snapshots(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u32,
    ) -> Result<Vec<SnapshotInfo>, TargetError> {
        let mut state = self.state.lock().await;
        Ok(state.guest_mut(node, kind, vmid)?.snapshots.clone())
    }

    async fn delete_snapshot(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u32,
        name: &str,
    ) -> Result<(), TargetError> {
        let mut state = self.state.lock().await;
        let guest = state.guest_mut(node, kind, vmid)?;
        let before = guest.snapshots.len();
        guest.snapshots.retain(|s| s.name != name);
        if guest.snapshots.len() == before {
            return Err(TargetError::NotFound {
                node: node.to_string(),
                what: format!("snapshot '{}' of guest {}", name, vmid),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> TargetProfile {
        TargetProfile {
            host: "pve.lab".to_string(),
            port: 8006,
            username: "root".to_string(),
            realm: "pam".to_string(),
            verify_ssl: false,
            node: "pve1".to_string(),
        }
    }

    fn vm(vmid: u32) -> VmSpec {
        VmSpec {
            vmid,
            name: format!("vm-{}", vmid),
            memory_mb: 512,
            cores: 1,
        }
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        let target = SimulatedTarget::unreachable();
        let err = target.connect(&profile()).await.err().unwrap();
        assert!(matches!(err, TargetError::Connection(_)));
    }

    #[tokio::test]
    async fn test_guest_with_snapshot_cannot_be_deleted() {
        let target = SimulatedTarget::new();
        let session = target.connect(&profile()).await.unwrap();
        session.create_vm("pve1", &vm(9000)).await.unwrap();
        session
            .create_snapshot("pve1", GuestKind::Qemu, 9000, "s1", "")
            .await
            .unwrap();

        let err = session.delete_guest("pve1", GuestKind::Qemu, 9000).await.unwrap_err();
        assert!(matches!(err, TargetError::Rejected(_)));

        session
            .delete_snapshot("pve1", GuestKind::Qemu, 9000, "s1")
            .await
            .unwrap();
        session.delete_guest("pve1", GuestKind::Qemu, 9000).await.unwrap();
        assert_eq!(target.guest_count().await, 0);
    }

    #[tokio::test]
    async fn test_guest_kind_lookup() {
        let target = SimulatedTarget::new();
        let session = target.connect(&profile()).await.unwrap();
        session.create_vm("pve1", &vm(9001)).await.unwrap();
        session
            .create_container(
                "pve1",
                &ContainerSpec {
                    vmid: 8001,
                    hostname: "ct-8001".to_string(),
                    template: None,
                    memory_mb: 256,
                },
            )
            .await
            .unwrap();

        assert_eq!(session.guest_kind("pve1", 9001).await.unwrap(), Some(GuestKind::Qemu));
        assert_eq!(session.guest_kind("pve1", 8001).await.unwrap(), Some(GuestKind::Lxc));
        assert_eq!(session.guest_kind("pve1", 1).await.unwrap(), None);

        // Addressing a guest with the wrong kind is a lookup miss
        let err = session.guest_status("pve1", GuestKind::Lxc, 9001).await.unwrap_err();
        assert!(matches!(err, TargetError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_vmid_rejected() {
        let target = SimulatedTarget::new();
        let session = target.connect(&profile()).await.unwrap();
        session.create_vm("pve1", &vm(9002)).await.unwrap();
        assert!(session.create_vm("pve1", &vm(9002)).await.is_err());
    }
}
