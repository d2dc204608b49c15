use std::time::Instant;

use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::inventory::{self, InventoryPatch};
use crate::model::*;

use super::SyncCoordinator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub equipment_id: String,
    pub error: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Store rows rewritten to match an allocation record.
    pub pushed: usize,
    /// Store rows forced back to available.
    pub repaired: usize,
    /// Rows already in agreement.
    pub in_sync: usize,
    /// Rows left alone because a mutation was in flight or committed mid-pass.
    pub skipped: usize,
    pub failures: Vec<SyncFailure>,
}

enum Push {
    Written,
    InSync,
    Superseded,
}

impl SyncReport {
    fn fail(&mut self, equipment_id: &str, error: impl std::fmt::Display) {
        error!("Failed to sync inventory status for {equipment_id}: {error}");
        metrics::counter!(crate::observability::SYNC_FAILURES_TOTAL).increment(1);
        self.failures.push(SyncFailure {
            equipment_id: equipment_id.to_string(),
            error: error.to_string(),
        });
    }
}

impl SyncCoordinator {
    /// Reconcile the allocation registry with the external store.
    ///
    /// Ledger ahead: every allocation record is pushed to the store.
    /// Store ahead: an assigned store row with no record is forced back to
    /// available, if this engine has touched that id (or `repair_untracked`).
    /// Each write is best-effort; failures are reported and the pass goes on.
    pub async fn sync_inventory_status(&self) -> SyncReport {
        let started = Instant::now();
        let store = self.inventory.as_ref();
        let mut report = SyncReport::default();

        for record in self.registry.records() {
            let id = record.equipment_id.as_str();
            if self.is_in_flight(id) {
                report.skipped += 1;
                continue;
            }
            match self.push_record(&record).await {
                Ok(Push::Written) => report.pushed += 1,
                Ok(Push::InSync) => report.in_sync += 1,
                Ok(Push::Superseded) => report.skipped += 1,
                Err(e) => report.fail(id, e),
            }
        }

        match inventory::list_all(store).await {
            Ok(items) => {
                for item in items {
                    if !item.status.is_assigned() || self.registry.contains(&item.id) {
                        continue;
                    }
                    if !self.config.repair_untracked && !self.state.contains(&item.id) {
                        debug!("leaving untracked assignment of {} in place", item.id);
                        continue;
                    }
                    if self.is_in_flight(&item.id) {
                        report.skipped += 1;
                        continue;
                    }
                    match inventory::write_through(store, &item, InventoryPatch::release()).await {
                        Ok(()) => report.repaired += 1,
                        Err(e) => report.fail(&item.id, e),
                    }
                }
            }
            Err(e) => report.fail("*", e),
        }

        store.refresh();

        metrics::counter!(crate::observability::SYNC_PASSES_TOTAL).increment(1);
        metrics::histogram!(crate::observability::SYNC_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        info!(
            "inventory sync: {} pushed, {} repaired, {} in sync, {} skipped, {} failed",
            report.pushed,
            report.repaired,
            report.in_sync,
            report.skipped,
            report.failures.len()
        );
        report
    }

    async fn push_record(&self, record: &AllocationRecord) -> Result<Push, EngineError> {
        let id = record.equipment_id.as_str();
        let store = self.inventory.as_ref();
        let item = inventory::lookup(store, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        // The record was read before the lookup; a mutation may have landed since.
        if self.is_in_flight(id) || self.registry.get(id).as_ref() != Some(record) {
            debug!("not pushing {id}: allocation changed during sync");
            return Ok(Push::Superseded);
        }
        if item.status.is_assigned() && item.job_id.as_deref() == Some(record.job_id.as_str()) {
            return Ok(Push::InSync);
        }
        inventory::write_through(store, &item, InventoryPatch::for_record(record)).await?;
        Ok(Push::Written)
    }
}
