//! The external equipment-inventory store, as seen from the allocation engine.
//!
//! The store tracks equipment two ways: individually identified pieces, and
//! bulk items counted by type. The engine only ever sees an [`InventoryItem`],
//! produced by one polymorphic [`lookup`] and written back through
//! [`write_through`], which dispatch on the item's [`EquipmentRef`].

mod memory;

pub use memory::{InventorySnapshot, MemoryInventory};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{AllocationRecord, EquipmentStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    NotFound(String),
    Backend(String),
}

impl std::fmt::Display for InventoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryError::NotFound(id) => write!(f, "no inventory item {id}"),
            InventoryError::Backend(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for InventoryError {}

/// Status vocabulary of the external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InventoryStatus {
    Available,
    Allocated,
    Deployed,
    Maintenance,
    RedTagged,
    OutOfService,
    Retired,
    Lost,
}

impl InventoryStatus {
    pub fn is_assigned(&self) -> bool {
        matches!(self, InventoryStatus::Allocated | InventoryStatus::Deployed)
    }

    /// Out of service for reasons unrelated to any job.
    pub fn is_hard_unavailable(&self) -> bool {
        !matches!(
            self,
            InventoryStatus::Available | InventoryStatus::Allocated | InventoryStatus::Deployed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::Available => "available",
            InventoryStatus::Allocated => "allocated",
            InventoryStatus::Deployed => "deployed",
            InventoryStatus::Maintenance => "maintenance",
            InventoryStatus::RedTagged => "red-tagged",
            InventoryStatus::OutOfService => "out-of-service",
            InventoryStatus::Retired => "retired",
            InventoryStatus::Lost => "lost",
        }
    }
}

impl std::fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<InventoryStatus> for EquipmentStatus {
    fn from(status: InventoryStatus) -> Self {
        match status {
            InventoryStatus::Available => EquipmentStatus::Available,
            InventoryStatus::Allocated => EquipmentStatus::Allocated,
            InventoryStatus::Deployed => EquipmentStatus::Deployed,
            _ => EquipmentStatus::Unavailable,
        }
    }
}

/// Status pushed to the store for an engine-side status.
impl From<EquipmentStatus> for InventoryStatus {
    fn from(status: EquipmentStatus) -> Self {
        match status {
            EquipmentStatus::Available => InventoryStatus::Available,
            EquipmentStatus::Allocated | EquipmentStatus::Deployed => InventoryStatus::Deployed,
            EquipmentStatus::Unavailable => InventoryStatus::OutOfService,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualEquipment {
    pub id: String,
    pub name: String,
    pub status: InventoryStatus,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkEquipmentItem {
    pub id: String,
    pub type_id: String,
    pub status: InventoryStatus,
    #[serde(default)]
    pub job_id: Option<String>,
    pub quantity: u32,
}

/// Partial update for an inventory item. `job_id: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryPatch {
    pub status: Option<InventoryStatus>,
    pub job_id: Option<Option<String>>,
}

impl InventoryPatch {
    pub fn assign(job_id: impl Into<String>) -> Self {
        Self {
            status: Some(EquipmentStatus::Allocated.into()),
            job_id: Some(Some(job_id.into())),
        }
    }

    /// The store-side image of an allocation record.
    pub fn for_record(record: &AllocationRecord) -> Self {
        Self {
            status: Some(record.status.into()),
            job_id: Some(Some(record.job_id.clone())),
        }
    }

    pub fn release() -> Self {
        Self {
            status: Some(InventoryStatus::Available),
            job_id: Some(None),
        }
    }
}

/// Operations consumed from the external inventory store.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn find_individual_equipment(
        &self,
        id: &str,
    ) -> Result<Option<IndividualEquipment>, InventoryError>;

    async fn find_bulk_equipment_item(
        &self,
        id: &str,
    ) -> Result<Option<BulkEquipmentItem>, InventoryError>;

    async fn available_quantity_by_type(&self, type_id: &str) -> Result<u32, InventoryError>;

    async fn update_individual_equipment(
        &self,
        id: &str,
        patch: InventoryPatch,
    ) -> Result<(), InventoryError>;

    async fn update_bulk_equipment_item(
        &self,
        id: &str,
        patch: InventoryPatch,
    ) -> Result<(), InventoryError>;

    async fn list_individual_equipment(&self) -> Result<Vec<IndividualEquipment>, InventoryError>;

    async fn list_bulk_equipment_items(&self) -> Result<Vec<BulkEquipmentItem>, InventoryError>;

    /// Ask the store to re-pull its data. Fire-and-forget.
    fn refresh(&self);
}

/// How a piece of equipment is tracked by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EquipmentRef {
    Individual(String),
    /// Bulk item, carrying its type id.
    Bulk(String),
}

/// Uniform view over either kind of inventory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    pub reference: EquipmentRef,
    pub status: InventoryStatus,
    pub job_id: Option<String>,
    pub quantity: Option<u32>,
}

impl InventoryItem {
    pub fn is_quantity_tracked(&self) -> bool {
        matches!(self.reference, EquipmentRef::Bulk(_))
    }
}

impl From<IndividualEquipment> for InventoryItem {
    fn from(e: IndividualEquipment) -> Self {
        Self {
            reference: EquipmentRef::Individual(e.id.clone()),
            id: e.id,
            name: e.name,
            status: e.status,
            job_id: e.job_id,
            quantity: None,
        }
    }
}

impl From<BulkEquipmentItem> for InventoryItem {
    fn from(b: BulkEquipmentItem) -> Self {
        Self {
            name: b.type_id.clone(),
            reference: EquipmentRef::Bulk(b.type_id),
            id: b.id,
            status: b.status,
            job_id: b.job_id,
            quantity: Some(b.quantity),
        }
    }
}

/// Resolve an id to whichever kind of record the store holds for it.
/// Individually tracked equipment wins if both exist.
pub async fn lookup(
    store: &dyn InventoryStore,
    id: &str,
) -> Result<Option<InventoryItem>, InventoryError> {
    if let Some(individual) = store.find_individual_equipment(id).await? {
        return Ok(Some(individual.into()));
    }
    Ok(store.find_bulk_equipment_item(id).await?.map(Into::into))
}

/// Write a patch back through the update call matching the item's kind.
pub async fn write_through(
    store: &dyn InventoryStore,
    item: &InventoryItem,
    patch: InventoryPatch,
) -> Result<(), InventoryError> {
    match &item.reference {
        EquipmentRef::Individual(id) => store.update_individual_equipment(id, patch).await,
        EquipmentRef::Bulk(_) => store.update_bulk_equipment_item(&item.id, patch).await,
    }
}

/// Every item in the store, individual first.
pub async fn list_all(store: &dyn InventoryStore) -> Result<Vec<InventoryItem>, InventoryError> {
    let (individual, bulk) = futures::try_join!(
        store.list_individual_equipment(),
        store.list_bulk_equipment_items()
    )?;
    Ok(individual
        .into_iter()
        .map(InventoryItem::from)
        .chain(bulk.into_iter().map(InventoryItem::from))
        .collect())
}
