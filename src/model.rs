use serde::{Deserialize, Serialize};

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Status as tracked by this engine. The external store has a richer vocabulary
/// (see `inventory::InventoryStatus`); everything it calls out of service folds
/// into `Unavailable` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentStatus {
    Available,
    Allocated,
    Deployed,
    Unavailable,
}

impl EquipmentStatus {
    /// Allocated or deployed: associated with exactly one job.
    pub fn is_assigned(&self) -> bool {
        matches!(self, EquipmentStatus::Allocated | EquipmentStatus::Deployed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentStatus::Available => "available",
            EquipmentStatus::Allocated => "allocated",
            EquipmentStatus::Deployed => "deployed",
            EquipmentStatus::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for EquipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-known status of one piece of equipment, as projected from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentStateEntry {
    pub equipment_id: String,
    pub status: EquipmentStatus,
    pub job_id: Option<String>,
    pub last_updated: Ms,
}

/// Partial update merged into an `EquipmentStateEntry`.
///
/// `None` fields keep the prior value. `job_id: Some(None)` clears the job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub status: Option<EquipmentStatus>,
    pub job_id: Option<Option<String>>,
}

impl StatePatch {
    pub fn status(status: EquipmentStatus) -> Self {
        Self {
            status: Some(status),
            job_id: None,
        }
    }

    pub fn assigned(status: EquipmentStatus, job_id: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            job_id: Some(Some(job_id.into())),
        }
    }

    pub fn released() -> Self {
        Self {
            status: Some(EquipmentStatus::Available),
            job_id: Some(None),
        }
    }
}

/// An active association between one equipment id and one job, managed by this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub equipment_id: String,
    pub job_id: String,
    pub job_name: String,
    pub allocated_at: Ms,
    pub status: EquipmentStatus,
}

impl AllocationRecord {
    pub fn new(equipment_id: impl Into<String>, job_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            job_id: job_id.into(),
            job_name: job_name.into(),
            allocated_at: now_ms(),
            status: EquipmentStatus::Allocated,
        }
    }

    /// Loaders discard records that cannot name both sides of the association.
    pub fn is_well_formed(&self) -> bool {
        !self.equipment_id.is_empty() && !self.job_id.is_empty() && self.status.is_assigned()
    }

    pub fn is_expired(&self, now: Ms, retention_ms: Ms) -> bool {
        self.allocated_at < now.saturating_sub(retention_ms)
    }
}

/// A detected attempt to assign already-assigned equipment to a second job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub equipment_id: String,
    pub equipment_name: String,
    pub current_job_id: String,
    pub current_job_name: String,
    pub requested_job_id: String,
    pub requested_job_name: String,
    pub timestamp: Ms,
}

/// Which side of a conflict keeps the equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionChoice {
    /// Keep the current job; the requester's attempt is rejected.
    Current,
    /// Move the equipment to the requesting job.
    Requested,
}

impl ResolutionChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionChoice::Current => "current",
            ResolutionChoice::Requested => "requested",
        }
    }
}

/// The ledger record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    Allocated(AllocationRecord),
    Released { equipment_id: String, at: Ms },
}

impl LedgerEvent {
    pub fn equipment_id(&self) -> &str {
        match self {
            LedgerEvent::Allocated(record) => &record.equipment_id,
            LedgerEvent::Released { equipment_id, .. } => equipment_id,
        }
    }
}
