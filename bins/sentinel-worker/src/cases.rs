/// Built-in Case Implementations
///
/// **Core Responsibility:**
/// Map each catalog entry (see `sentinel_common::catalog`) to a case body that
/// drives the target session and reports a `CaseOutcome`.
///
/// **Contract for case bodies:**
/// - `Ok(CaseOutcome { success: true, .. })`  → the check passed
/// - `Ok(CaseOutcome { success: false, .. })` → the target answered, but wrongly
/// - `Err(..)`                                → the operation itself failed
///
/// Every case that creates something on the target registers it in the
/// `SuiteContext` registry so the cleanup phase can remove it later.

use crate::executor::CaseOutcome;
use crate::resources::{ManagedResource, ResourceKind, ResourceRegistry};
use crate::target::{ContainerSpec, GuestKind, TargetSession, VmSpec};
use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use sentinel_common::catalog::{
    CONTAINER_MANAGEMENT, NODE, RESOURCE_DISCOVERY, SNAPSHOT_MANAGEMENT, STORAGE_MANAGEMENT,
    VM_MANAGEMENT,
};
use sentinel_common::types::GuestDefaults;
use serde_json::json;

const DEFAULT_LXC_TEMPLATE: &str = "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst";

/// Mutable state shared by the cases of one run.
pub struct SuiteContext<'a> {
    pub session: &'a dyn TargetSession,
    pub node: &'a str,
    pub guests: &'a GuestDefaults,
    pub registry: ResourceRegistry,
    /// Guest the snapshot cases operate on, resolved once
    snapshot_guest: Option<(GuestKind, u32)>,
}

impl<'a> SuiteContext<'a> {
    pub fn new(session: &'a dyn TargetSession, node: &'a str, guests: &'a GuestDefaults) -> Self {
        Self {
            session,
            node,
            guests,
            registry: ResourceRegistry::new(),
            snapshot_guest: None,
        }
    }

    /// First id in `start..=end` no guest on the node holds. VMs and
    /// containers share one id space on the target.
    async fn allocate_id(&self, what: &str, start: u32, end: u32) -> anyhow::Result<u32> {
        for vmid in start..=end {
            if self.session.guest_kind(self.node, vmid).await?.is_none() {
                return Ok(vmid);
            }
        }
        bail!("No free {} id in range {}..={} on node {}", what, start, end, self.node)
    }

    /// The VM this run created, else the first id of the VM range.
    fn vm_under_test(&self) -> u32 {
        self.registry
            .iter()
            .rev()
            .find_map(|r| match r.kind {
                ResourceKind::Vm { vmid } => Some(vmid),
                _ => None,
            })
            .unwrap_or(self.guests.vm_id_range_start)
    }

    /// The newest guest this run created, else the first id of the VM range.
    fn snapshot_candidate(&self) -> u32 {
        self.registry
            .iter()
            .rev()
            .find_map(|r| match r.kind {
                ResourceKind::Vm { vmid } | ResourceKind::Container { vmid } => Some(vmid),
                _ => None,
            })
            .unwrap_or(self.guests.vm_id_range_start)
    }

    /// Resolve which kind of guest the snapshot cases target. Looked up on the
    /// session the first time and reused afterwards.
    async fn snapshot_guest(&mut self) -> anyhow::Result<(GuestKind, u32)> {
        if let Some(guest) = self.snapshot_guest {
            return Ok(guest);
        }

        let vmid = self.snapshot_candidate();
        let kind = self
            .session
            .guest_kind(self.node, vmid)
            .await?
            .ok_or_else(|| anyhow!("Guest {} not found on node {}", vmid, self.node))?;

        self.snapshot_guest = Some((kind, vmid));
        Ok((kind, vmid))
    }
}

/// Run the case identified by `(category, name)`.
pub async fn run_case(
    ctx: &mut SuiteContext<'_>,
    category: &str,
    name: &str,
) -> anyhow::Result<CaseOutcome> {
    match (category, name) {
        (RESOURCE_DISCOVERY, "List Resources") => list_resources(ctx).await,
        (NODE, "Node Status") => node_status(ctx).await,
        (VM_MANAGEMENT, "Create VM") => create_vm(ctx).await,
        (VM_MANAGEMENT, "Get VM Status") => get_vm_status(ctx).await,
        (VM_MANAGEMENT, "Start VM") => set_vm_running(ctx, true).await,
        (VM_MANAGEMENT, "Stop VM") => set_vm_running(ctx, false).await,
        (CONTAINER_MANAGEMENT, "Create Container") => create_container(ctx).await,
        (SNAPSHOT_MANAGEMENT, "Create Snapshot") => create_snapshot(ctx).await,
        (SNAPSHOT_MANAGEMENT, "List Snapshots") => list_snapshots(ctx).await,
        (STORAGE_MANAGEMENT, "List Storage") => list_storage(ctx).await,
        _ => bail!("No implementation for case '{}' in category '{}'", name, category),
    }
}

async fn list_resources(ctx: &mut SuiteContext<'_>) -> anyhow::Result<CaseOutcome> {
    let version = ctx.session.version().await?;
    let resources = ctx.session.list_resources().await?;

    Ok(CaseOutcome::pass(format!(
        "Found {} cluster resources (target version {}).",
        resources.len(),
        version
    ))
    .with_data(&resources))
}

async fn node_status(ctx: &mut SuiteContext<'_>) -> anyhow::Result<CaseOutcome> {
    let status = ctx.session.node_status(ctx.node).await?;

    let outcome = if status.status == "online" {
        CaseOutcome::pass(format!("Node {} is online.", status.node))
    } else {
        CaseOutcome::fail(format!("Node {} reports status '{}'.", status.node, status.status))
            .with_error(format!("expected 'online', got '{}'", status.status))
    };
    Ok(outcome.with_data(&status))
}

async fn create_vm(ctx: &mut SuiteContext<'_>) -> anyhow::Result<CaseOutcome> {
    let vmid = ctx
        .allocate_id("VM", ctx.guests.vm_id_range_start, ctx.guests.vm_id_range_end)
        .await?;
    let spec = VmSpec {
        vmid,
        name: format!("sentinel-test-{}", vmid),
        memory_mb: ctx.guests.vm_memory_mb,
        cores: ctx.guests.vm_cores,
    };

    ctx.session
        .create_vm(ctx.node, &spec)
        .await
        .with_context(|| format!("creating VM {}", spec.vmid))?;
    ctx.registry
        .register(ManagedResource::vm(ctx.node, spec.vmid, &spec.name));

    Ok(CaseOutcome::pass(format!("VM {} (ID: {}) created.", spec.name, spec.vmid)).with_data(&spec))
}

async fn get_vm_status(ctx: &mut SuiteContext<'_>) -> anyhow::Result<CaseOutcome> {
    let status = ctx
        .session
        .guest_status(ctx.node, GuestKind::Qemu, ctx.vm_under_test())
        .await?;

    Ok(CaseOutcome::pass(format!("VM {} status is {}.", status.vmid, status.status)).with_data(&status))
}

async fn set_vm_running(ctx: &mut SuiteContext<'_>, running: bool) -> anyhow::Result<CaseOutcome> {
    let vmid = ctx.vm_under_test();
    let expected = if running { "running" } else { "stopped" };
    let status = ctx
        .session
        .set_guest_running(ctx.node, GuestKind::Qemu, vmid, running)
        .await?;

    let outcome = if status.status == expected {
        CaseOutcome::pass(format!("VM {} is {}.", vmid, expected))
    } else {
        CaseOutcome::fail(format!("VM {} did not reach '{}'.", vmid, expected))
            .with_error(format!("status after request: '{}'", status.status))
    };
    Ok(outcome.with_data(&status))
}

async fn create_container(ctx: &mut SuiteContext<'_>) -> anyhow::Result<CaseOutcome> {
    let vmid = ctx
        .allocate_id("container", ctx.guests.lxc_id_range_start, ctx.guests.lxc_id_range_end)
        .await?;
    let spec = ContainerSpec {
        vmid,
        hostname: format!("sentinel-ct-{}", vmid),
        template: Some(
            ctx.guests
                .lxc_template
                .clone()
                .unwrap_or_else(|| DEFAULT_LXC_TEMPLATE.to_string()),
        ),
        memory_mb: ctx.guests.lxc_memory_mb,
    };

    ctx.session
        .create_container(ctx.node, &spec)
        .await
        .with_context(|| format!("creating container {}", spec.vmid))?;
    ctx.registry
        .register(ManagedResource::container(ctx.node, spec.vmid, &spec.hostname));

    Ok(CaseOutcome::pass(format!(
        "Container {} (ID: {}) created.",
        spec.hostname, spec.vmid
    ))
    .with_data(&spec))
}

async fn create_snapshot(ctx: &mut SuiteContext<'_>) -> anyhow::Result<CaseOutcome> {
    let (kind, vmid) = ctx.snapshot_guest().await?;
    let name = format!("sentinel-snap-{}", Utc::now().timestamp());

    ctx.session
        .create_snapshot(ctx.node, kind, vmid, &name, "Snapshot taken by sentinel run")
        .await?;
    ctx.registry
        .register(ManagedResource::snapshot(ctx.node, kind, vmid, &name));

    Ok(CaseOutcome::pass(format!("Snapshot {} of {} guest {} created.", name, kind, vmid))
        .with_data(&json!({ "vmid": vmid, "kind": kind, "snapshot": name })))
}

async fn list_snapshots(ctx: &mut SuiteContext<'_>) -> anyhow::Result<CaseOutcome> {
    let (kind, vmid) = ctx.snapshot_guest().await?;
    let snapshots = ctx.session.list_snapshots(ctx.node, kind, vmid).await?;

    Ok(CaseOutcome::pass(format!(
        "Found {} snapshots for {} guest {}.",
        snapshots.len(),
        kind,
        vmid
    ))
    .with_data(&snapshots))
}

async fn list_storage(ctx: &mut SuiteContext<'_>) -> anyhow::Result<CaseOutcome> {
    let storages = ctx.session.list_storage(ctx.node).await?;

    if storages.is_empty() {
        return Ok(CaseOutcome::fail(format!("No storage found on node {}.", ctx.node)));
    }
    Ok(CaseOutcome::pass(format!(
        "Found {} storages on node {}.",
        storages.len(),
        ctx.node
    ))
    .with_data(&storages))
}
