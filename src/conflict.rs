use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::inventory::{self, InventoryPatch, InventoryStore};
use crate::limits::CONFLICT_CHANNEL_CAPACITY;
use crate::model::*;
use crate::registry::AllocationRegistry;

/// Change feed for observers of the conflict set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictEvent {
    Raised(ConflictRecord),
    Cleared { equipment_id: String },
}

/// Active conflict set, at most one record per equipment id.
pub struct ConflictManager {
    /// equipment id → (insertion sequence, record). The sequence keeps snapshot order stable
    /// when a record is replaced.
    conflicts: DashMap<String, (u64, ConflictRecord)>,
    next_seq: AtomicU64,
    events: broadcast::Sender<ConflictEvent>,
    registry: Arc<AllocationRegistry>,
    inventory: Arc<dyn InventoryStore>,
}

impl ConflictManager {
    pub fn new(registry: Arc<AllocationRegistry>, inventory: Arc<dyn InventoryStore>) -> Self {
        Self {
            conflicts: DashMap::new(),
            next_seq: AtomicU64::new(0),
            events: broadcast::channel(CONFLICT_CHANNEL_CAPACITY).0,
            registry,
            inventory,
        }
    }

    /// Insert, replacing any record for the same equipment id in place.
    pub fn add_conflict(&self, record: ConflictRecord) {
        let id = record.equipment_id.clone();
        let replaced = {
            let mut slot = self
                .conflicts
                .entry(id.clone())
                .or_insert_with(|| (self.next_seq.fetch_add(1, Ordering::Relaxed), record.clone()));
            let seq = slot.0;
            let replaced = slot.1 != record;
            *slot = (seq, record.clone());
            replaced
        };
        info!(
            "conflict on {id}: held by {}, requested by {}{}",
            record.current_job_id,
            record.requested_job_id,
            if replaced { " (replaced)" } else { "" }
        );
        metrics::counter!(crate::observability::CONFLICTS_RAISED_TOTAL).increment(1);
        metrics::gauge!(crate::observability::CONFLICTS_ACTIVE).set(self.conflicts.len() as f64);
        let _ = self.events.send(ConflictEvent::Raised(record));
    }

    pub fn remove_conflict(&self, equipment_id: &str) -> Option<ConflictRecord> {
        let removed = self.conflicts.remove(equipment_id).map(|(_, (_, r))| r);
        if removed.is_some() {
            metrics::gauge!(crate::observability::CONFLICTS_ACTIVE).set(self.conflicts.len() as f64);
            let _ = self.events.send(ConflictEvent::Cleared {
                equipment_id: equipment_id.to_string(),
            });
        }
        removed
    }

    pub fn get(&self, equipment_id: &str) -> Option<ConflictRecord> {
        self.conflicts.get(equipment_id).map(|e| e.value().1.clone())
    }

    /// Ordered snapshot, oldest first.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        let mut all: Vec<(u64, ConflictRecord)> =
            self.conflicts.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn clear(&self) {
        let ids: Vec<String> = self.conflicts.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove_conflict(&id);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConflictEvent> {
        self.events.subscribe()
    }

    /// Apply the caller's choice.
    ///
    /// `Current` only drops the conflict. `Requested` releases the equipment from the
    /// current job in the external store, assigns it to the requesting job there, and
    /// only when both writes succeed records the new allocation and drops the conflict.
    /// The holder is re-read first: if someone other than the conflict's current job
    /// holds the equipment now, nothing is written and the conflict stays.
    /// A failed write leaves the conflict in place; a release that succeeded before a
    /// failed assign is not rolled back, and retrying the resolution is safe.
    pub async fn resolve(
        &self,
        conflict: &ConflictRecord,
        choice: ResolutionChoice,
    ) -> Result<(), EngineError> {
        let id = conflict.equipment_id.as_str();
        match self.get(id) {
            Some(active) if active.requested_job_id == conflict.requested_job_id => {}
            _ => return Err(EngineError::ConflictNotFound(id.to_string())),
        }

        match choice {
            ResolutionChoice::Current => {
                self.remove_conflict(id);
            }
            ResolutionChoice::Requested => {
                let store = self.inventory.as_ref();
                let item = inventory::lookup(store, id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

                if item.status.is_hard_unavailable() {
                    return Err(EngineError::NotAvailable(id.to_string()));
                }
                // The holder may have changed since the conflict was raised.
                let holder = self
                    .registry
                    .get(id)
                    .map(|r| r.job_id)
                    .or_else(|| item.job_id.clone().filter(|_| item.status.is_assigned()));
                if let Some(held_by) = holder
                    && held_by != conflict.current_job_id
                {
                    warn!(
                        "resolve {id}: conflict names {} but {held_by} holds it now",
                        conflict.current_job_id
                    );
                    return Err(EngineError::StaleConflict {
                        equipment_id: id.to_string(),
                        held_by,
                    });
                }

                let record = AllocationRecord::new(
                    id,
                    conflict.requested_job_id.clone(),
                    conflict.requested_job_name.clone(),
                );
                if let Err(e) = inventory::write_through(store, &item, InventoryPatch::release()).await {
                    warn!("resolve {id}: release from {} failed: {e}", conflict.current_job_id);
                    return Err(e.into());
                }
                if let Err(e) =
                    inventory::write_through(store, &item, InventoryPatch::for_record(&record)).await
                {
                    warn!(
                        "resolve {id}: released from {} but assign to {} failed: {e}",
                        conflict.current_job_id, conflict.requested_job_id
                    );
                    return Err(e.into());
                }

                self.registry.set_allocation(record);
                self.remove_conflict(id);
                store.refresh();
            }
        }

        info!("resolved conflict on {id} in favour of {} job", choice.as_str());
        metrics::counter!(crate::observability::CONFLICTS_RESOLVED_TOTAL, "choice" => choice.as_str())
            .increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{IndividualEquipment, InventoryStatus, MemoryInventory};
    use crate::state::EquipmentStateStore;
    use ulid::Ulid;

    fn conflict(eq: &str, current: &str, requested: &str) -> ConflictRecord {
        ConflictRecord {
            equipment_id: eq.into(),
            equipment_name: format!("{eq} name"),
            current_job_id: current.into(),
            current_job_name: format!("Job {current}"),
            requested_job_id: requested.into(),
            requested_job_name: format!("Job {requested}"),
            timestamp: now_ms(),
        }
    }

    fn manager() -> (ConflictManager, Arc<AllocationRegistry>, Arc<MemoryInventory>) {
        let dir = std::env::temp_dir().join("equipalloc_test_conflict");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.wal", Ulid::new()));
        let state = Arc::new(EquipmentStateStore::new());
        let registry = Arc::new(
            AllocationRegistry::open(&path, crate::limits::DEFAULT_RETENTION_MS, state).unwrap(),
        );
        let inventory = Arc::new(MemoryInventory::new());
        inventory.insert_individual(IndividualEquipment {
            id: "eq-2".into(),
            name: "Crane".into(),
            status: InventoryStatus::Deployed,
            job_id: Some("job-1".into()),
        });
        let mgr = ConflictManager::new(registry.clone(), inventory.clone());
        (mgr, registry, inventory)
    }

    #[tokio::test]
    async fn second_conflict_for_same_id_replaces_first() {
        let (mgr, _, _) = manager();
        mgr.add_conflict(conflict("eq-1", "job-1", "job-2"));
        mgr.add_conflict(conflict("eq-9", "job-5", "job-6"));
        mgr.add_conflict(conflict("eq-1", "job-1", "job-3"));

        let all = mgr.conflicts();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].equipment_id, "eq-1");
        assert_eq!(all[0].requested_job_id, "job-3");
        assert_eq!(all[1].equipment_id, "eq-9");
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let (mgr, _, _) = manager();
        mgr.add_conflict(conflict("eq-1", "job-1", "job-2"));
        mgr.add_conflict(conflict("eq-2", "job-1", "job-2"));

        assert!(mgr.remove_conflict("eq-1").is_some());
        assert!(mgr.remove_conflict("eq-1").is_none());
        assert_eq!(mgr.len(), 1);

        mgr.clear();
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn events_are_broadcast() {
        let (mgr, _, _) = manager();
        let mut rx = mgr.subscribe();
        let c = conflict("eq-1", "job-1", "job-2");
        mgr.add_conflict(c.clone());
        mgr.remove_conflict("eq-1");

        assert_eq!(rx.recv().await.unwrap(), ConflictEvent::Raised(c));
        assert_eq!(
            rx.recv().await.unwrap(),
            ConflictEvent::Cleared {
                equipment_id: "eq-1".into()
            }
        );
    }

    #[tokio::test]
    async fn resolve_current_keeps_allocation() {
        let (mgr, registry, inventory) = manager();
        registry.set_allocation(AllocationRecord::new("eq-2", "job-1", "Job job-1"));
        let c = conflict("eq-2", "job-1", "job-2");
        mgr.add_conflict(c.clone());

        mgr.resolve(&c, ResolutionChoice::Current).await.unwrap();

        assert!(mgr.is_empty());
        assert_eq!(registry.get("eq-2").unwrap().job_id, "job-1");
        let item = inventory.find_individual_equipment("eq-2").await.unwrap().unwrap();
        assert_eq!(item.job_id.as_deref(), Some("job-1"));
    }

    #[tokio::test]
    async fn resolve_requested_moves_allocation() {
        let (mgr, registry, inventory) = manager();
        let c = conflict("eq-2", "job-1", "job-2");
        mgr.add_conflict(c.clone());

        mgr.resolve(&c, ResolutionChoice::Requested).await.unwrap();

        assert!(mgr.is_empty());
        let record = registry.get("eq-2").unwrap();
        assert_eq!(record.job_id, "job-2");
        assert_eq!(record.job_name, "Job job-2");
        let item = inventory.find_individual_equipment("eq-2").await.unwrap().unwrap();
        assert_eq!(item.status, InventoryStatus::Deployed);
        assert_eq!(item.job_id.as_deref(), Some("job-2"));
        assert_eq!(inventory.refresh_count(), 1);
    }

    #[tokio::test]
    async fn resolve_unknown_conflict_rejected() {
        let (mgr, _, _) = manager();
        let c = conflict("eq-2", "job-1", "job-2");
        let err = mgr.resolve(&c, ResolutionChoice::Current).await.unwrap_err();
        assert!(matches!(err, EngineError::ConflictNotFound(_)));

        mgr.add_conflict(conflict("eq-2", "job-1", "job-3"));
        let err = mgr.resolve(&c, ResolutionChoice::Requested).await.unwrap_err();
        assert!(matches!(err, EngineError::ConflictNotFound(_)));
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test]
    async fn resolve_requested_refuses_when_holder_changed() {
        let (mgr, registry, inventory) = manager();
        let c = conflict("eq-2", "job-1", "job-2");
        mgr.add_conflict(c.clone());
        registry.set_allocation(AllocationRecord::new("eq-2", "job-3", "Job job-3"));
        inventory
            .update_individual_equipment("eq-2", InventoryPatch::assign("job-3"))
            .await
            .unwrap();

        let err = mgr.resolve(&c, ResolutionChoice::Requested).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::StaleConflict { ref held_by, .. } if held_by == "job-3"
        ));
        assert_eq!(mgr.len(), 1);
        assert_eq!(registry.get("eq-2").unwrap().job_id, "job-3");
        let item = inventory.find_individual_equipment("eq-2").await.unwrap().unwrap();
        assert_eq!(item.job_id.as_deref(), Some("job-3"));
        assert_eq!(inventory.refresh_count(), 0);
    }

    #[tokio::test]
    async fn resolve_requested_for_missing_equipment_keeps_conflict() {
        let (mgr, registry, _) = manager();
        let c = conflict("eq-gone", "job-1", "job-2");
        mgr.add_conflict(c.clone());

        let err = mgr.resolve(&c, ResolutionChoice::Requested).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(mgr.len(), 1);
        assert!(registry.get("eq-gone").is_none());
    }
}
