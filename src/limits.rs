use crate::model::Ms;

/// Persisted allocations older than this are dropped on load.
pub const DEFAULT_RETENTION_MS: Ms = 24 * 60 * 60 * 1000;

/// Reconciliation interval.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Ledger appends before the compactor rewrites the file.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

/// How often the compactor checks the append count.
pub const COMPACT_CHECK_INTERVAL_SECS: u64 = 60;

/// Buffered conflict events per broadcast receiver.
pub const CONFLICT_CHANNEL_CAPACITY: usize = 256;

pub const MAX_ID_LEN: usize = 256;
pub const MAX_JOB_NAME_LEN: usize = 1024;
pub const MAX_REQUESTED_QUANTITY: u32 = 100_000;
