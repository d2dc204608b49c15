use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::coordinator::SyncCoordinator;
use crate::limits::COMPACT_CHECK_INTERVAL_SECS;
use crate::registry::AllocationRegistry;

/// Background task that reconciles the registry with the external store:
/// once immediately, then every `every`.
pub async fn run_reconciler(coordinator: Arc<SyncCoordinator>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let report = coordinator.sync_inventory_status().await;
        if !report.failures.is_empty() {
            debug!("reconcile pass left {} item(s) unsynced", report.failures.len());
        }
    }
}

/// Background task that rewrites the allocation ledger once it has grown by
/// `threshold` appends.
pub async fn run_compactor(registry: Arc<AllocationRegistry>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(COMPACT_CHECK_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let appends = registry.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match registry.compact().await {
            Ok(()) => info!("compacted allocation ledger after {appends} appends"),
            Err(e) => warn!("ledger compaction failed: {e}"),
        }
    }
}

/// Handles for the coordinator's background tasks.
pub struct Background {
    reconciler: JoinHandle<()>,
    compactor: JoinHandle<()>,
}

impl Background {
    /// Spawn the reconciler and compactor for `coordinator`.
    pub fn spawn(coordinator: &Arc<SyncCoordinator>) -> Self {
        let every = coordinator.config().sync_interval;
        let threshold = coordinator.config().compact_threshold;
        let reconciler = tokio::spawn(run_reconciler(coordinator.clone(), every));
        let compactor = tokio::spawn(run_compactor(coordinator.registry().clone(), threshold));
        Self {
            reconciler,
            compactor,
        }
    }

    pub fn abort(&self) {
        self.reconciler.abort();
        self.compactor.abort();
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        self.abort();
    }
}
