mod mutations;
mod queries;
mod sync;
mod validation;

pub use sync::{SyncFailure, SyncReport};
pub use validation::{
    REASON_INSUFFICIENT_QUANTITY, REASON_NOT_FOUND, REASON_VALIDATION_FAILED, Validation,
    ValidationRequest, ValidationState,
};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::conflict::ConflictManager;
use crate::inventory::{InventoryItem, InventoryStatus, InventoryStore};
use crate::limits::*;
use crate::model::{ConflictRecord, Ms, now_ms};
use crate::registry::AllocationRegistry;
use crate::state::EquipmentStateStore;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub ledger_path: PathBuf,
    /// Persisted allocations older than this are dropped on load.
    pub retention_ms: Ms,
    pub sync_interval: Duration,
    pub compact_threshold: u64,
    /// Force every assigned-but-unrecorded store item back to available during
    /// reconciliation, not only items this engine has touched.
    pub repair_untracked: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("./data/allocations.wal"),
            retention_ms: DEFAULT_RETENTION_MS,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            repair_untracked: false,
        }
    }
}

/// Orchestrates validation, allocation, release, conflict resolution and
/// reconciliation against the external inventory store.
pub struct SyncCoordinator {
    pub(super) config: CoordinatorConfig,
    pub(super) state: Arc<EquipmentStateStore>,
    pub(super) registry: Arc<AllocationRegistry>,
    pub(super) conflicts: Arc<ConflictManager>,
    pub(super) inventory: Arc<dyn InventoryStore>,
    /// Last validation outcome per equipment id.
    pub(super) validations: DashMap<String, ValidationState>,
    /// equipment id → job id of the mutation currently suspended on the store.
    pub(super) in_flight: DashMap<String, String>,
}

/// Who the equipment currently belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Holder {
    pub job_id: String,
    pub job_name: String,
}

pub(super) enum Assessment {
    Free,
    SameJob,
    HeldBy(Holder),
    OutOfService(InventoryStatus),
}

/// Marks an equipment id busy for the lifetime of one mutation.
pub(super) struct Claim<'a> {
    in_flight: &'a DashMap<String, String>,
    equipment_id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.equipment_id);
    }
}

impl SyncCoordinator {
    /// Load the allocation ledger and wire up the components.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(config: CoordinatorConfig, inventory: Arc<dyn InventoryStore>) -> io::Result<Self> {
        if let Some(dir) = config.ledger_path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let state = Arc::new(EquipmentStateStore::new());
        let registry = Arc::new(AllocationRegistry::open(
            &config.ledger_path,
            config.retention_ms,
            state.clone(),
        )?);
        let conflicts = Arc::new(ConflictManager::new(registry.clone(), inventory.clone()));
        Ok(Self {
            config,
            state,
            registry,
            conflicts,
            inventory,
            validations: DashMap::new(),
            in_flight: DashMap::new(),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<EquipmentStateStore> {
        &self.state
    }

    pub fn registry(&self) -> &Arc<AllocationRegistry> {
        &self.registry
    }

    pub fn conflict_manager(&self) -> &Arc<ConflictManager> {
        &self.conflicts
    }

    pub fn inventory(&self) -> &Arc<dyn InventoryStore> {
        &self.inventory
    }

    pub(super) fn claim(&self, equipment_id: &str, job_id: &str) -> Option<Claim<'_>> {
        match self.in_flight.entry(equipment_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(job_id.to_string());
                Some(Claim {
                    in_flight: &self.in_flight,
                    equipment_id: equipment_id.to_string(),
                })
            }
        }
    }

    pub(super) fn is_in_flight(&self, equipment_id: &str) -> bool {
        self.in_flight.contains_key(equipment_id)
    }

    /// The registry record wins; otherwise the store's own job field, if the
    /// store says the item is assigned.
    pub(super) fn current_holder(&self, item: &InventoryItem) -> Option<Holder> {
        if let Some(record) = self.registry.get(&item.id) {
            return Some(Holder {
                job_id: record.job_id,
                job_name: record.job_name,
            });
        }
        match &item.job_id {
            Some(job_id) if item.status.is_assigned() => Some(Holder {
                job_id: job_id.clone(),
                job_name: job_id.clone(),
            }),
            _ => None,
        }
    }

    /// Record that `job_id` asked for equipment `holder` already has.
    pub(super) fn raise_conflict(
        &self,
        item: &InventoryItem,
        holder: &Holder,
        job_id: &str,
        job_name: &str,
    ) -> ConflictRecord {
        let conflict = ConflictRecord {
            equipment_id: item.id.clone(),
            equipment_name: item.name.clone(),
            current_job_id: holder.job_id.clone(),
            current_job_name: holder.job_name.clone(),
            requested_job_id: job_id.to_string(),
            requested_job_name: if job_name.is_empty() { job_id } else { job_name }.to_string(),
            timestamp: now_ms(),
        };
        self.conflicts.add_conflict(conflict.clone());
        conflict
    }

    pub(super) fn assess(&self, item: &InventoryItem, requested_job_id: &str) -> Assessment {
        if item.status.is_hard_unavailable() {
            return Assessment::OutOfService(item.status);
        }
        match self.current_holder(item) {
            Some(holder) if holder.job_id == requested_job_id => Assessment::SameJob,
            Some(holder) => Assessment::HeldBy(holder),
            // Assigned, but the store can't say to whom.
            None if item.status.is_assigned() => Assessment::OutOfService(item.status),
            None => Assessment::Free,
        }
    }
}
