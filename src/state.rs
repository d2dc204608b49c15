use dashmap::DashMap;

use crate::model::*;
use crate::notify::{NotifyHub, Subscription};

/// Shared Equipment State Store: last-known status per equipment id with
/// per-id change notification.
///
/// Entries are created lazily on first update and never deleted; a release
/// resets them to `available`.
pub struct EquipmentStateStore {
    entries: DashMap<String, EquipmentStateEntry>,
    notify: NotifyHub<EquipmentStateEntry>,
}

impl Default for EquipmentStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EquipmentStateStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            notify: NotifyHub::new(),
        }
    }

    /// Merge `patch` into the entry for `equipment_id`, stamp it, and notify
    /// subscribers of that id. Returns the merged entry.
    pub fn update(&self, equipment_id: &str, patch: StatePatch) -> EquipmentStateEntry {
        let merged = {
            let mut entry = self
                .entries
                .entry(equipment_id.to_string())
                .or_insert_with(|| EquipmentStateEntry {
                    equipment_id: equipment_id.to_string(),
                    status: EquipmentStatus::Available,
                    job_id: None,
                    last_updated: 0,
                });
            if let Some(status) = patch.status {
                entry.status = status;
            }
            if let Some(job_id) = patch.job_id {
                entry.job_id = job_id;
            }
            entry.last_updated = now_ms();
            entry.value().clone()
        };
        // Shard lock released before fan-out.
        self.notify.send(equipment_id, &merged);
        merged
    }

    /// Apply updates in order. Each one notifies on its own; there is no
    /// multi-key atomicity.
    pub fn batch_update(&self, updates: Vec<(String, StatePatch)>) -> Vec<EquipmentStateEntry> {
        updates
            .into_iter()
            .map(|(id, patch)| self.update(&id, patch))
            .collect()
    }

    pub fn get(&self, equipment_id: &str) -> Option<EquipmentStateEntry> {
        self.entries.get(equipment_id).map(|e| e.value().clone())
    }

    pub fn contains(&self, equipment_id: &str) -> bool {
        self.entries.contains_key(equipment_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subscribe(&self, equipment_id: &str) -> Subscription<EquipmentStateEntry> {
        self.notify.subscribe(equipment_id)
    }

    pub fn subscriber_count(&self, equipment_id: &str) -> usize {
        self.notify.subscriber_count(equipment_id)
    }
}
