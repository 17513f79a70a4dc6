// Built-in case catalog.
// This is the authoritative list of (category, case) identifiers a
// configuration may select. The worker maps each entry to an implementation.

pub const RESOURCE_DISCOVERY: &str = "Resource Discovery";
pub const NODE: &str = "Node";
pub const VM_MANAGEMENT: &str = "VM Management";
pub const CONTAINER_MANAGEMENT: &str = "Container Management";
pub const SNAPSHOT_MANAGEMENT: &str = "Snapshot Management";
pub const STORAGE_MANAGEMENT: &str = "Storage Management";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseDescriptor {
    pub category: &'static str,
    pub name: &'static str,
    /// Creates, mutates or deletes target-side resources
    pub destructive: bool,
}

const fn case(category: &'static str, name: &'static str, destructive: bool) -> CaseDescriptor {
    CaseDescriptor {
        category,
        name,
        destructive,
    }
}

pub const CATALOG: &[CaseDescriptor] = &[
    case(RESOURCE_DISCOVERY, "List Resources", false),
    case(NODE, "Node Status", false),
    case(VM_MANAGEMENT, "Create VM", true),
    case(VM_MANAGEMENT, "Get VM Status", true),
    case(VM_MANAGEMENT, "Start VM", true),
    case(VM_MANAGEMENT, "Stop VM", true),
    case(CONTAINER_MANAGEMENT, "Create Container", true),
    case(SNAPSHOT_MANAGEMENT, "Create Snapshot", true),
    case(SNAPSHOT_MANAGEMENT, "List Snapshots", true),
    case(STORAGE_MANAGEMENT, "List Storage", false),
];

pub fn lookup(category: &str, name: &str) -> Option<&'static CaseDescriptor> {
    CATALOG
        .iter()
        .find(|c| c.category == category && c.name == name)
}

/// Distinct categories in catalog order.
pub fn categories() -> Vec<&'static str> {
    let mut seen = Vec::new();
    for entry in CATALOG {
        if !seen.contains(&entry.category) {
            seen.push(entry.category);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let create = lookup(VM_MANAGEMENT, "Create VM").unwrap();
        assert!(create.destructive);
        assert!(!lookup(NODE, "Node Status").unwrap().destructive);
        assert!(lookup(NODE, "Create VM").is_none());
        assert!(lookup("Nope", "Nothing").is_none());
    }

    #[test]
    fn test_identifiers_are_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in &CATALOG[i + 1..] {
                assert!(!(a.category == b.category && a.name == b.name), "{:?}", a);
            }
        }
    }

    #[test]
    fn test_categories_in_catalog_order() {
        assert_eq!(
            categories(),
            vec![
                RESOURCE_DISCOVERY,
                NODE,
                VM_MANAGEMENT,
                CONTAINER_MANAGEMENT,
                SNAPSHOT_MANAGEMENT,
                STORAGE_MANAGEMENT
            ]
        );
    }
}
