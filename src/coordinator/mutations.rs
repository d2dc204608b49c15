use tracing::{debug, info};

use crate::error::EngineError;
use crate::inventory::{self, InventoryPatch};
use crate::limits::*;
use crate::model::*;

use super::{Assessment, SyncCoordinator};

fn validate_ids(equipment_id: &str, job_id: &str) -> Result<(), EngineError> {
    if equipment_id.is_empty() || job_id.is_empty() {
        return Err(EngineError::LimitExceeded("empty id"));
    }
    if equipment_id.len() > MAX_ID_LEN || job_id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("id too long"));
    }
    Ok(())
}

fn status_label<T>(result: &Result<T, EngineError>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}

impl SyncCoordinator {
    /// Assign `equipment_id` to `job_id`.
    ///
    /// Current status is re-derived here; an earlier validation result is not
    /// trusted. The registry is written only after the store accepted the change.
    pub async fn allocate_equipment(
        &self,
        equipment_id: &str,
        job_id: &str,
        job_name: &str,
    ) -> Result<AllocationRecord, EngineError> {
        let result = self.try_allocate(equipment_id, job_id, job_name).await;
        metrics::counter!(crate::observability::ALLOCATIONS_TOTAL, "status" => status_label(&result))
            .increment(1);
        result
    }

    async fn try_allocate(
        &self,
        equipment_id: &str,
        job_id: &str,
        job_name: &str,
    ) -> Result<AllocationRecord, EngineError> {
        validate_ids(equipment_id, job_id)?;
        if job_name.len() > MAX_JOB_NAME_LEN {
            return Err(EngineError::LimitExceeded("job name too long"));
        }

        let Some(_claim) = self.claim(equipment_id, job_id) else {
            debug!("allocate {equipment_id} for {job_id}: lost race to an in-flight mutation");
            return Err(EngineError::NotAvailable(equipment_id.to_string()));
        };

        let store = self.inventory.as_ref();
        let item = inventory::lookup(store, equipment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(equipment_id.to_string()))?;

        match self.assess(&item, job_id) {
            Assessment::Free | Assessment::SameJob => {}
            Assessment::HeldBy(holder) => {
                debug!("allocate {equipment_id} for {job_id}: held by {}", holder.job_id);
                self.raise_conflict(&item, &holder, job_id, job_name);
                return Err(EngineError::NotAvailable(equipment_id.to_string()));
            }
            Assessment::OutOfService(status) => {
                debug!("allocate {equipment_id} for {job_id}: status {status}");
                return Err(EngineError::NotAvailable(equipment_id.to_string()));
            }
        }

        let record = AllocationRecord::new(equipment_id, job_id, job_name);
        inventory::write_through(store, &item, InventoryPatch::for_record(&record)).await?;

        self.registry.set_allocation(record.clone());
        store.refresh();
        info!("allocated {equipment_id} to {job_id}");
        Ok(record)
    }

    /// Return `equipment_id` to available on behalf of `job_id`. Releasing
    /// equipment that is already available succeeds.
    pub async fn release_equipment(&self, equipment_id: &str, job_id: &str) -> Result<(), EngineError> {
        let result = self.try_release(equipment_id, job_id).await;
        metrics::counter!(crate::observability::RELEASES_TOTAL, "status" => status_label(&result))
            .increment(1);
        result
    }

    async fn try_release(&self, equipment_id: &str, job_id: &str) -> Result<(), EngineError> {
        validate_ids(equipment_id, job_id)?;
        let Some(_claim) = self.claim(equipment_id, job_id) else {
            return Err(EngineError::InFlight(equipment_id.to_string()));
        };

        let store = self.inventory.as_ref();
        let item = inventory::lookup(store, equipment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(equipment_id.to_string()))?;

        if let Some(holder) = self.current_holder(&item)
            && holder.job_id != job_id
        {
            return Err(EngineError::JobMismatch {
                equipment_id: equipment_id.to_string(),
                held_by: holder.job_id,
                requested: job_id.to_string(),
            });
        }

        inventory::write_through(store, &item, InventoryPatch::release()).await?;

        self.registry.remove_allocation(equipment_id);
        store.refresh();
        info!("released {equipment_id} from {job_id}");
        Ok(())
    }

    /// Apply an explicit resolution choice to an active conflict.
    pub async fn resolve_conflict(
        &self,
        conflict: &ConflictRecord,
        choice: ResolutionChoice,
    ) -> Result<(), EngineError> {
        let Some(_claim) = self.claim(&conflict.equipment_id, &conflict.requested_job_id) else {
            return Err(EngineError::InFlight(conflict.equipment_id.clone()));
        };
        self.conflicts.resolve(conflict, choice).await
    }
}
