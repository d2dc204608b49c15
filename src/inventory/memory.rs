use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::*;

/// On-disk JSON shape for seeding and snapshotting a [`MemoryInventory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default)]
    pub individual: Vec<IndividualEquipment>,
    #[serde(default)]
    pub bulk: Vec<BulkEquipmentItem>,
}

/// In-process inventory store.
pub struct MemoryInventory {
    individual: DashMap<String, IndividualEquipment>,
    bulk: DashMap<String, BulkEquipmentItem>,
    refreshes: AtomicU64,
}

impl Default for MemoryInventory {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_patch(status: &mut InventoryStatus, job_id: &mut Option<String>, patch: InventoryPatch) {
    if let Some(s) = patch.status {
        *status = s;
    }
    if let Some(j) = patch.job_id {
        *job_id = j;
    }
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self {
            individual: DashMap::new(),
            bulk: DashMap::new(),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn from_snapshot(snapshot: InventorySnapshot) -> Self {
        let inv = Self::new();
        for e in snapshot.individual {
            inv.insert_individual(e);
        }
        for b in snapshot.bulk {
            inv.insert_bulk(b);
        }
        inv
    }

    /// Load from a JSON file. A missing file is an empty inventory.
    pub fn load_json(path: &Path) -> io::Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e),
        };
        let snapshot: InventorySnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        let mut individual: Vec<_> = self.individual.iter().map(|e| e.value().clone()).collect();
        let mut bulk: Vec<_> = self.bulk.iter().map(|e| e.value().clone()).collect();
        individual.sort_by(|a, b| a.id.cmp(&b.id));
        bulk.sort_by(|a, b| a.id.cmp(&b.id));
        InventorySnapshot { individual, bulk }
    }

    /// Write the current contents as JSON, via a temp file and rename.
    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)
    }

    pub fn insert_individual(&self, equipment: IndividualEquipment) {
        self.individual.insert(equipment.id.clone(), equipment);
    }

    pub fn insert_bulk(&self, item: BulkEquipmentItem) {
        self.bulk.insert(item.id.clone(), item);
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InventoryStore for MemoryInventory {
    async fn find_individual_equipment(
        &self,
        id: &str,
    ) -> Result<Option<IndividualEquipment>, InventoryError> {
        Ok(self.individual.get(id).map(|e| e.value().clone()))
    }

    async fn find_bulk_equipment_item(
        &self,
        id: &str,
    ) -> Result<Option<BulkEquipmentItem>, InventoryError> {
        Ok(self.bulk.get(id).map(|e| e.value().clone()))
    }

    async fn available_quantity_by_type(&self, type_id: &str) -> Result<u32, InventoryError> {
        Ok(self
            .bulk
            .iter()
            .filter(|e| e.type_id == type_id && e.status == InventoryStatus::Available)
            .map(|e| e.quantity)
            .sum())
    }

    async fn update_individual_equipment(
        &self,
        id: &str,
        patch: InventoryPatch,
    ) -> Result<(), InventoryError> {
        let mut entry = self
            .individual
            .get_mut(id)
            .ok_or_else(|| InventoryError::NotFound(id.to_string()))?;
        let e = entry.value_mut();
        apply_patch(&mut e.status, &mut e.job_id, patch);
        Ok(())
    }

    async fn update_bulk_equipment_item(
        &self,
        id: &str,
        patch: InventoryPatch,
    ) -> Result<(), InventoryError> {
        let mut entry = self
            .bulk
            .get_mut(id)
            .ok_or_else(|| InventoryError::NotFound(id.to_string()))?;
        let b = entry.value_mut();
        apply_patch(&mut b.status, &mut b.job_id, patch);
        Ok(())
    }

    async fn list_individual_equipment(&self) -> Result<Vec<IndividualEquipment>, InventoryError> {
        Ok(self.individual.iter().map(|e| e.value().clone()).collect())
    }

    async fn list_bulk_equipment_items(&self) -> Result<Vec<BulkEquipmentItem>, InventoryError> {
        Ok(self.bulk.iter().map(|e| e.value().clone()).collect())
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }
}
