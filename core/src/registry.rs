//! Device registry — deduplicated, insertion-ordered record of scan results.
//!
//! Discovery events are recreated per advertisement, so the registry keeps the
//! first descriptor seen for each display name and drops later ones. Entries
//! without a display name are never merged: two nameless advertisements are
//! treated as distinct devices.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A discovered peripheral as seen at one discovery event.
///
/// Immutable once created; a re-advertising device produces a fresh
/// descriptor rather than updating an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralDescriptor {
    /// Opaque device identifier, unique within a scan session
    pub id: String,
    /// Advertised display name, if the device broadcasts one
    pub name: Option<String>,
    /// Unix timestamp (seconds) of the discovery event
    pub discovered_at: u64,
}

impl PeripheralDescriptor {
    /// Create a descriptor stamped with the current time
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            discovered_at: unix_now(),
        }
    }

    /// The display name used for deduplication, if usable as a key
    pub fn dedup_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Insertion-ordered set of discovered peripherals, keyed by display name.
///
/// Shared between the session's scan pump (writer) and the caller (reader);
/// snapshots only ever expose fully-appended entries.
pub struct DeviceRegistry {
    entries: RwLock<Vec<PeripheralDescriptor>>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Record a discovery event.
    ///
    /// Appends the descriptor unless an existing entry already carries the
    /// same non-empty display name. Returns whether the descriptor was
    /// appended. Name-keyed dedup is deliberately weaker than
    /// identifier-keyed dedup: two distinct devices sharing a name collapse
    /// to the first one seen.
    pub fn observe(&self, descriptor: PeripheralDescriptor) -> bool {
        let mut entries = self.entries.write();
        if let Some(name) = descriptor.dedup_name() {
            if entries
                .iter()
                .any(|entry| entry.dedup_name() == Some(name))
            {
                return false;
            }
        }
        entries.push(descriptor);
        true
    }

    /// Ordered copy of the current entries
    pub fn snapshot(&self) -> Vec<PeripheralDescriptor> {
        self.entries.read().clone()
    }

    /// Clear all entries; used when a fresh scan begins or the caller
    /// explicitly restarts discovery
    pub fn reset(&self) {
        self.entries.write().clear();
    }

    /// Number of recorded devices
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if no devices have been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(id: &str, name: &str) -> PeripheralDescriptor {
        PeripheralDescriptor::new(id, Some(name.to_string()))
    }

    fn unnamed(id: &str) -> PeripheralDescriptor {
        PeripheralDescriptor::new(id, None)
    }

    #[test]
    fn test_observe_appends_in_order() {
        let registry = DeviceRegistry::new();
        assert!(registry.observe(named("1", "A")));
        assert!(registry.observe(named("2", "B")));
        assert!(registry.observe(named("3", "C")));

        let ids: Vec<String> = registry.snapshot().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_duplicate_name_dropped() {
        let registry = DeviceRegistry::new();
        assert!(registry.observe(named("1", "A")));
        assert!(registry.observe(named("2", "B")));
        assert!(!registry.observe(named("3", "A")));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "1");
        assert_eq!(snapshot[0].name.as_deref(), Some("A"));
        assert_eq!(snapshot[1].id, "2");
        assert_eq!(snapshot[1].name.as_deref(), Some("B"));
    }

    #[test]
    fn test_unnamed_devices_never_merge() {
        let registry = DeviceRegistry::new();
        assert!(registry.observe(unnamed("1")));
        assert!(registry.observe(unnamed("2")));
        assert!(registry.observe(unnamed("3")));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_empty_name_treated_as_unnamed() {
        let registry = DeviceRegistry::new();
        assert!(registry.observe(named("1", "")));
        assert!(registry.observe(named("2", "")));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_named_and_unnamed_coexist() {
        let registry = DeviceRegistry::new();
        assert!(registry.observe(named("1", "A")));
        assert!(registry.observe(unnamed("2")));
        assert!(!registry.observe(named("3", "A")));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reset_clears_entries() {
        let registry = DeviceRegistry::new();
        registry.observe(named("1", "A"));
        registry.observe(named("2", "B"));
        assert_eq!(registry.len(), 2);

        registry.reset();
        assert!(registry.is_empty());

        // A name seen before the reset is admissible again
        assert!(registry.observe(named("3", "A")));
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let registry = DeviceRegistry::new();
        registry.observe(named("1", "A"));

        let snapshot = registry.snapshot();
        registry.observe(named("2", "B"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_descriptor_timestamp_populated() {
        let descriptor = named("1", "A");
        assert!(descriptor.discovered_at > 0);
    }

    #[test]
    fn test_descriptor_serde_roundtrip() {
        let descriptor = named("1", "A");
        let bytes = bincode::serialize(&descriptor).expect("serialization failed");
        let restored: PeripheralDescriptor =
            bincode::deserialize(&bytes).expect("deserialization failed");
        assert_eq!(restored, descriptor);
    }
}
