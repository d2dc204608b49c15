use crate::inventory::InventoryError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(String),
    NotAvailable(String),
    JobMismatch {
        equipment_id: String,
        held_by: String,
        requested: String,
    },
    InFlight(String),
    ConflictNotFound(String),
    /// The conflict names a holder that no longer holds the equipment.
    StaleConflict {
        equipment_id: String,
        held_by: String,
    },
    Inventory(InventoryError),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "equipment not found in inventory: {id}"),
            EngineError::NotAvailable(_) => write!(f, "Equipment not available for allocation"),
            EngineError::JobMismatch {
                equipment_id,
                held_by,
                requested,
            } => write!(
                f,
                "equipment {equipment_id} is held by job {held_by}, not {requested}"
            ),
            EngineError::InFlight(id) => {
                write!(f, "another operation is in flight for equipment {id}")
            }
            EngineError::ConflictNotFound(id) => write!(f, "no active conflict for equipment {id}"),
            EngineError::StaleConflict {
                equipment_id,
                held_by,
            } => write!(
                f,
                "conflict on equipment {equipment_id} is stale: now held by job {held_by}"
            ),
            EngineError::Inventory(e) => write!(f, "inventory error: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Inventory(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InventoryError> for EngineError {
    fn from(e: InventoryError) -> Self {
        EngineError::Inventory(e)
    }
}
