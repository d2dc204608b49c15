use std::collections::BTreeSet;

use tracing::warn;

use crate::inventory;
use crate::model::*;
use crate::notify::Subscription;

use super::SyncCoordinator;

impl SyncCoordinator {
    /// Freshest known status: the State Store entry if there is one, else the
    /// external store's status, else `unavailable`.
    pub async fn get_equipment_status(&self, equipment_id: &str) -> EquipmentStatus {
        if let Some(entry) = self.state.get(equipment_id) {
            return entry.status;
        }
        match inventory::lookup(self.inventory.as_ref(), equipment_id).await {
            Ok(Some(item)) => item.status.into(),
            Ok(None) => EquipmentStatus::Unavailable,
            Err(e) => {
                warn!("status lookup for {equipment_id} failed: {e}");
                EquipmentStatus::Unavailable
            }
        }
    }

    /// Every equipment id assigned to `job_id`, whether through this engine or
    /// directly in the external store. Sorted, no duplicates.
    pub async fn get_job_equipment(&self, job_id: &str) -> Vec<String> {
        let mut ids: BTreeSet<String> = self
            .registry
            .records_for_job(job_id)
            .into_iter()
            .map(|r| r.equipment_id)
            .collect();

        match inventory::list_all(self.inventory.as_ref()).await {
            Ok(items) => {
                ids.extend(
                    items
                        .into_iter()
                        .filter(|item| item.job_id.as_deref() == Some(job_id))
                        // A stale store row must not outvote a newer registry record.
                        .filter(|item| {
                            self.registry
                                .get(&item.id)
                                .is_none_or(|r| r.job_id == job_id)
                        })
                        .map(|item| item.id),
                );
            }
            Err(e) => warn!("inventory listing for job {job_id} failed, using ledger only: {e}"),
        }

        ids.into_iter().collect()
    }

    /// Ordered snapshot of active conflicts.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.conflicts()
    }

    pub fn subscribe_to_equipment_changes(&self, equipment_id: &str) -> Subscription<EquipmentStateEntry> {
        self.state.subscribe(equipment_id)
    }
}
