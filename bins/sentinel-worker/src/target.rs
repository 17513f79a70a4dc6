/// Target Adapter - Abstraction over the Managed Infrastructure
///
/// **Core Responsibility:**
/// Expose the operations cases perform against the target, per resource kind.
///
/// **Critical Architectural Boundary:**
/// - Adapter knows HOW to talk to the target (protocol, auth, transport)
/// - Adapter does NOT know about runs, cases or verdicts
/// - Every operation returns a structured value or a `TargetError`
///
/// The coordinator receives an adapter by injection, so the simulated target
/// and test doubles are interchangeable with a real client.

use async_trait::async_trait;
use sentinel_common::types::TargetProfile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Guest flavour on the target. Resolved once per guest via
/// [`TargetSession::guest_kind`] and carried from there on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestKind::Qemu => write!(f, "qemu"),
            GuestKind::Lxc => write!(f, "lxc"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TargetError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{what} not found on node {node}")]
    NotFound { node: String, what: String },

    #[error("target rejected operation: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterResource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub node: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node: String,
    pub status: String,
    pub cpu: f64,
    pub max_cpu: u32,
    pub memory_used: u64,
    pub memory_total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub storage: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuestStatus {
    pub vmid: u32,
    pub name: String,
    pub kind: GuestKind,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VmSpec {
    pub vmid: u32,
    pub name: String,
    pub memory_mb: u32,
    pub cores: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerSpec {
    pub vmid: u32,
    pub hostname: String,
    pub template: Option<String>,
    pub memory_mb: u32,
}

/// An authenticated session against one target.
#[async_trait]
pub trait TargetSession: Send + Sync {
    async fn version(&self) -> Result<String, TargetError>;

    async fn list_resources(&self) -> Result<Vec<ClusterResource>, TargetError>;

    async fn node_status(&self, node: &str) -> Result<NodeStatus, TargetError>;

    async fn list_storage(&self, node: &str) -> Result<Vec<StorageInfo>, TargetError>;

    /// Capability lookup: which kind of guest owns `vmid`, if any.
    async fn guest_kind(&self, node: &str, vmid: u32) -> Result<Option<GuestKind>, TargetError>;

    async fn create_vm(&self, node: &str, spec: &VmSpec) -> Result<(), TargetError>;

    async fn create_container(&self, node: &str, spec: &ContainerSpec) -> Result<(), TargetError>;

    async fn guest_status(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u32,
    ) -> Result<GuestStatus, TargetError>;

    async fn set_guest_running(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u32,
        running: bool,
    ) -> Result<GuestStatus, TargetError>;

    async fn delete_guest(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<(), TargetError>;

    async fn create_snapshot(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u32,
        name: &str,
        description: &str,
    ) -> Result<(), TargetError>;

    async fn list_snapshots(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u32,
    ) -> Result<Vec<SnapshotInfo>, TargetError>;

    async fn delete_snapshot(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u32,
        name: &str,
    ) -> Result<(), TargetError>;
}

/// Factory for sessions. `connect` failing aborts the whole suite.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    async fn connect(&self, profile: &TargetProfile) -> Result<Arc<dyn TargetSession>, TargetError>;
}
