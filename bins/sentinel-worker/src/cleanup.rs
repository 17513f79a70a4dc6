/// Resource Cleanup Phase
///
/// Tears down everything a run registered as created, in dependency-safe
/// order (see `ResourceRegistry::drain_for_cleanup`). Each deletion is an
/// ordinary case under the "Cleanup" category, so a failed teardown shows up
/// as a fail/error result instead of disappearing.

use crate::executor::{CaseExecutor, CaseOutcome};
use crate::resources::{ManagedResource, ResourceKind, ResourceRegistry};
use crate::target::{GuestKind, TargetSession};
use sentinel_common::error::StoreError;
use tracing::info;

pub const CLEANUP_CATEGORY: &str = "Cleanup";

/// Delete every registered resource and clear the registry.
///
/// An empty registry is a no-op: nothing is executed and nothing recorded.
pub async fn cleanup(
    executor: &CaseExecutor<'_>,
    session: &dyn TargetSession,
    registry: &mut ResourceRegistry,
) -> Result<(), StoreError> {
    if registry.is_empty() {
        return Ok(());
    }

    let ordered = registry.drain_for_cleanup();
    info!(resources = ordered.len(), "Cleanup phase starting");

    for resource in &ordered {
        let name = format!("Delete {}", resource);
        executor
            .execute(CLEANUP_CATEGORY, &name, || delete_resource(session, resource))
            .await?;
    }

    info!("Cleanup phase finished");
    Ok(())
}

async fn delete_resource(
    session: &dyn TargetSession,
    resource: &ManagedResource,
) -> anyhow::Result<CaseOutcome> {
    let node = resource.location.as_str();

    match &resource.kind {
        ResourceKind::Vm { vmid } => {
            session.delete_guest(node, GuestKind::Qemu, *vmid).await?;
            Ok(CaseOutcome::pass(format!("VM {} deleted.", resource.display_name)))
        }
        ResourceKind::Container { vmid } => {
            session.delete_guest(node, GuestKind::Lxc, *vmid).await?;
            Ok(CaseOutcome::pass(format!(
                "Container {} deleted.",
                resource.display_name
            )))
        }
        ResourceKind::Snapshot { guest, vmid } => {
            session
                .delete_snapshot(node, *guest, *vmid, &resource.identifier)
                .await?;
            Ok(CaseOutcome::pass(format!(
                "Snapshot {} of {} guest {} deleted.",
                resource.display_name, guest, vmid
            )))
        }
        ResourceKind::Other(kind) => Ok(CaseOutcome::fail(format!(
            "Unknown resource type \"{}\" for cleanup.",
            kind
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedTarget;
    use crate::target::{TargetAdapter, VmSpec};
    use sentinel_common::store::{MemoryStore, ResultStore};
    use sentinel_common::types::{CaseStatus, TargetProfile};
    use uuid::Uuid;

    fn profile() -> TargetProfile {
        TargetProfile {
            host: "pve.lab".to_string(),
            port: 8006,
            username: "root".to_string(),
            realm: "pam".to_string(),
            verify_ssl: true,
            node: "pve1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_registry_is_noop() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);
        let target = SimulatedTarget::new();
        let session = target.connect(&profile()).await.unwrap();
        let mut registry = ResourceRegistry::new();

        cleanup(&executor, session.as_ref(), &mut registry).await.unwrap();

        assert!(store.results(run_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_removed_before_vm() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);
        let target = SimulatedTarget::new();
        let session = target.connect(&profile()).await.unwrap();

        session
            .create_vm(
                "pve1",
                &VmSpec {
                    vmid: 101,
                    name: "v1".to_string(),
                    memory_mb: 512,
                    cores: 1,
                },
            )
            .await
            .unwrap();
        session
            .create_snapshot("pve1", GuestKind::Qemu, 101, "s1", "")
            .await
            .unwrap();

        let mut registry = ResourceRegistry::new();
        registry.register(ManagedResource::vm("pve1", 101, "v1"));
        registry.register(ManagedResource::snapshot("pve1", GuestKind::Qemu, 101, "s1"));

        cleanup(&executor, session.as_ref(), &mut registry).await.unwrap();

        let results = store.results(run_id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].name.starts_with("Delete Snapshot 's1'"));
        assert!(results[1].name.starts_with("Delete VM 'v1'"));
        assert!(results.iter().all(|r| r.status == CaseStatus::Pass));
        assert!(results.iter().all(|r| r.category == CLEANUP_CATEGORY));
        assert!(registry.is_empty());
        assert_eq!(target.guest_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_deletion_is_recorded_not_silent() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);
        let target = SimulatedTarget::new();
        let session = target.connect(&profile()).await.unwrap();

        // Registered but never created on the target
        let mut registry = ResourceRegistry::new();
        registry.register(ManagedResource::vm("pve1", 404, "ghost"));

        cleanup(&executor, session.as_ref(), &mut registry).await.unwrap();

        let results = store.results(run_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CaseStatus::Error);
        assert!(results[0].message.contains("not found"));
    }

    #[tokio::test]
    async fn test_unknown_kind_fails() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);
        let target = SimulatedTarget::new();
        let session = target.connect(&profile()).await.unwrap();

        let mut registry = ResourceRegistry::new();
        registry.register(ManagedResource {
            kind: ResourceKind::Other("pool".to_string()),
            location: "pve1".to_string(),
            identifier: "pool-a".to_string(),
            display_name: "pool-a".to_string(),
        });

        cleanup(&executor, session.as_ref(), &mut registry).await.unwrap();

        let results = store.results(run_id).await.unwrap();
        assert_eq!(results[0].status, CaseStatus::Fail);
        assert!(results[0].message.contains("Unknown resource type \"pool\""));
    }
}
