use tracing::{debug, error};

use crate::inventory::{self, EquipmentRef, InventoryError};
use crate::limits::MAX_REQUESTED_QUANTITY;
use crate::model::*;

use super::{Assessment, SyncCoordinator};

pub const REASON_NOT_FOUND: &str = "Equipment not found in inventory";
pub const REASON_INSUFFICIENT_QUANTITY: &str = "Insufficient equipment quantity available";
pub const REASON_VALIDATION_FAILED: &str = "Failed to validate equipment availability";

/// Per-validation state machine:
/// `Idle -> Validating -> {Available, Conflicted, Unavailable, NotFound, ValidationFailed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    Idle,
    Validating,
    Available,
    Conflicted,
    Unavailable,
    NotFound,
    ValidationFailed,
}

impl ValidationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationState::Idle => "idle",
            ValidationState::Validating => "validating",
            ValidationState::Available => "available",
            ValidationState::Conflicted => "conflicted",
            ValidationState::Unavailable => "unavailable",
            ValidationState::NotFound => "not_found",
            ValidationState::ValidationFailed => "validation_failed",
        }
    }
}

/// Outcome of a validation. Rejections are values, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub state: ValidationState,
    pub reason: Option<String>,
    /// The conflict raised by this validation, if any.
    pub conflict: Option<ConflictRecord>,
}

impl Validation {
    fn available() -> Self {
        Self {
            state: ValidationState::Available,
            reason: None,
            conflict: None,
        }
    }

    fn rejected(state: ValidationState, reason: impl Into<String>) -> Self {
        Self {
            state,
            reason: Some(reason.into()),
            conflict: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == ValidationState::Available
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    pub equipment_id: String,
    pub job_id: String,
    /// Defaults to the job id.
    pub job_name: Option<String>,
    /// Only consulted for quantity-tracked equipment. Defaults to 1.
    pub quantity: Option<u32>,
}

impl ValidationRequest {
    pub fn new(equipment_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            job_id: job_id.into(),
            job_name: None,
            quantity: None,
        }
    }

    pub fn job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }
}

impl SyncCoordinator {
    /// Can `equipment_id` go to `job_id`? Creates or replaces a conflict when it
    /// is already assigned to another job.
    pub async fn validate_equipment_availability(&self, equipment_id: &str, job_id: &str) -> Validation {
        self.validate(ValidationRequest::new(equipment_id, job_id)).await
    }

    pub async fn validate(&self, request: ValidationRequest) -> Validation {
        let id = request.equipment_id.clone();
        self.validations.insert(id.clone(), ValidationState::Validating);

        let validation = match self.evaluate(&request).await {
            Ok(v) => v,
            Err(e) => {
                error!("{REASON_VALIDATION_FAILED} for {id}: {e}");
                Validation::rejected(ValidationState::ValidationFailed, REASON_VALIDATION_FAILED)
            }
        };

        debug!(
            "validated {id} for {}: {}",
            request.job_id,
            validation.state.as_str()
        );
        self.validations.insert(id, validation.state);
        metrics::counter!(crate::observability::VALIDATIONS_TOTAL, "outcome" => validation.state.as_str())
            .increment(1);
        validation
    }

    /// Last validation state recorded for an id; `Idle` if never validated.
    pub fn validation_state(&self, equipment_id: &str) -> ValidationState {
        self.validations
            .get(equipment_id)
            .map_or(ValidationState::Idle, |s| *s.value())
    }

    async fn evaluate(&self, request: &ValidationRequest) -> Result<Validation, InventoryError> {
        let store = self.inventory.as_ref();
        let Some(item) = inventory::lookup(store, &request.equipment_id).await? else {
            return Ok(Validation::rejected(ValidationState::NotFound, REASON_NOT_FOUND));
        };

        match self.assess(&item, &request.job_id) {
            Assessment::OutOfService(status) => Ok(Validation::rejected(
                ValidationState::Unavailable,
                format!("{} not available (Status: {status})", item.name),
            )),
            Assessment::HeldBy(holder) => {
                let conflict = self.raise_conflict(
                    &item,
                    &holder,
                    &request.job_id,
                    request.job_name.as_deref().unwrap_or_default(),
                );
                Ok(Validation {
                    state: ValidationState::Conflicted,
                    reason: Some(format!("{} is assigned to {}", item.name, holder.job_name)),
                    conflict: Some(conflict),
                })
            }
            Assessment::SameJob => Ok(Validation::available()),
            Assessment::Free => {
                if let EquipmentRef::Bulk(type_id) = &item.reference {
                    let wanted = request.quantity.unwrap_or(1).max(1);
                    if wanted > MAX_REQUESTED_QUANTITY {
                        return Ok(Validation::rejected(
                            ValidationState::Unavailable,
                            REASON_INSUFFICIENT_QUANTITY,
                        ));
                    }
                    let available = store.available_quantity_by_type(type_id).await?;
                    if available < wanted {
                        return Ok(Validation::rejected(
                            ValidationState::Unavailable,
                            REASON_INSUFFICIENT_QUANTITY,
                        ));
                    }
                }
                Ok(Validation::available())
            }
        }
    }
}
