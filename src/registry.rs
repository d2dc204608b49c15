use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::*;
use crate::state::EquipmentStateStore;
use crate::wal::Wal;

// ── Group-commit ledger channel ──────────────────────────

enum WalCommand {
    Append(LedgerEvent),
    Compact {
        events: Vec<LedgerEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Flush {
        response: oneshot::Sender<()>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the ledger and batches appends for group commit.
/// Appends are fire-and-forget for the caller; failures are logged and counted here.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::UnboundedReceiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append(event) => {
                let mut batch = vec![event];
                let mut pending = None;

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append(event)) => batch.push(event),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                flush_batch(&mut wal, &batch);
                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[LedgerEvent]) {
    metrics::histogram!(crate::observability::LEDGER_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err = None;
    for event in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();

    metrics::histogram!(crate::observability::LEDGER_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    if let Some(e) = append_err.or(flush_err) {
        metrics::counter!(crate::observability::LEDGER_WRITE_FAILURES_TOTAL).increment(1);
        warn!(
            "failed to persist {} allocation event(s) to {}: {e}",
            batch.len(),
            wal.path().display()
        );
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::Flush { response } => {
            let _ = response.send(());
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append(_) => unreachable!(),
    }
}

/// Allocation Registry: equipment id → allocation record, durable across
/// restarts, projected into the State Store on every write.
pub struct AllocationRegistry {
    records: DashMap<String, AllocationRecord>,
    state: Arc<EquipmentStateStore>,
    wal_tx: mpsc::UnboundedSender<WalCommand>,
}

impl AllocationRegistry {
    /// Load persisted records from `path`, drop malformed and expired ones,
    /// rewrite the ledger with the survivors, and replay them into the State Store.
    ///
    /// Must be called inside a tokio runtime: spawns the ledger writer.
    pub fn open(
        path: &Path,
        retention_ms: Ms,
        state: Arc<EquipmentStateStore>,
    ) -> io::Result<Self> {
        let replay = Wal::replay(path)?;

        let mut live: HashMap<String, AllocationRecord> = HashMap::new();
        for event in replay.events {
            match event {
                LedgerEvent::Allocated(record) => {
                    live.insert(record.equipment_id.clone(), record);
                }
                LedgerEvent::Released { equipment_id, .. } => {
                    live.remove(&equipment_id);
                }
            }
        }

        let now = now_ms();
        let total = live.len();
        let mut malformed = 0usize;
        let mut expired = 0usize;
        let mut survivors: Vec<AllocationRecord> = Vec::with_capacity(total);
        for record in live.into_values() {
            if !record.is_well_formed() {
                malformed += 1;
            } else if record.is_expired(now, retention_ms) {
                expired += 1;
            } else {
                survivors.push(record);
            }
        }
        survivors.sort_by_key(|r| r.allocated_at);

        let mut wal = Wal::open(path)?;
        let snapshot: Vec<LedgerEvent> = survivors
            .iter()
            .cloned()
            .map(LedgerEvent::Allocated)
            .collect();
        wal.compact(&snapshot)?;

        let (wal_tx, wal_rx) = mpsc::unbounded_channel();
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let registry = Self {
            records: DashMap::new(),
            state,
            wal_tx,
        };
        for record in survivors {
            registry.apply(record);
        }

        info!(
            "allocation registry loaded {} record(s) from {} ({} expired, {} malformed, {} corrupt entries skipped)",
            registry.len(),
            path.display(),
            expired,
            malformed,
            replay.skipped
        );
        Ok(registry)
    }

    /// Store the record, persist it, and project `{status, jobId}` into the State Store.
    pub fn set_allocation(&self, record: AllocationRecord) {
        self.persist(LedgerEvent::Allocated(record.clone()));
        self.apply(record);
    }

    fn apply(&self, record: AllocationRecord) {
        let id = record.equipment_id.clone();
        let patch = StatePatch::assigned(record.status, record.job_id.clone());
        self.records.insert(id.clone(), record);
        self.state.update(&id, patch);
    }

    /// Delete the record (if any), persist the release, and reset the State Store
    /// entry to available with no job.
    pub fn remove_allocation(&self, equipment_id: &str) -> Option<AllocationRecord> {
        let removed = self.records.remove(equipment_id).map(|(_, r)| r);
        if removed.is_some() {
            self.persist(LedgerEvent::Released {
                equipment_id: equipment_id.to_string(),
                at: now_ms(),
            });
        }
        self.state.update(equipment_id, StatePatch::released());
        removed
    }

    fn persist(&self, event: LedgerEvent) {
        if self.wal_tx.send(WalCommand::Append(event)).is_err() {
            metrics::counter!(crate::observability::LEDGER_WRITE_FAILURES_TOTAL).increment(1);
            warn!("allocation ledger writer shut down; change kept in memory only");
        }
    }

    pub fn get(&self, equipment_id: &str) -> Option<AllocationRecord> {
        self.records.get(equipment_id).map(|e| e.value().clone())
    }

    pub fn contains(&self, equipment_id: &str) -> bool {
        self.records.contains_key(equipment_id)
    }

    pub fn records(&self) -> Vec<AllocationRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    pub fn records_for_job(&self, job_id: &str) -> Vec<AllocationRecord> {
        self.records
            .iter()
            .filter(|e| e.value().job_id == job_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Wait until every change made before this call has been written out.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Flush { response: tx })
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    /// Rewrite the ledger with one entry per live record.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let mut records = self.records();
        records.sort_by_key(|r| r.allocated_at);
        let events = records.into_iter().map(LedgerEvent::Allocated).collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
