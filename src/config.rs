use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::CoordinatorConfig;
use crate::limits::*;

/// Daemon configuration, read from `EQUIPALLOC_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub inventory_file: PathBuf,
    pub metrics_port: Option<u16>,
    pub retention_secs: u64,
    pub sync_interval_secs: u64,
    pub compact_threshold: u64,
    pub repair_untracked: bool,
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            data_dir: lookup("EQUIPALLOC_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            inventory_file: lookup("EQUIPALLOC_INVENTORY_FILE")
                .unwrap_or_else(|| "./inventory.json".into())
                .into(),
            metrics_port: parsed(&lookup, "EQUIPALLOC_METRICS_PORT"),
            retention_secs: parsed(&lookup, "EQUIPALLOC_RETENTION_SECS")
                .unwrap_or(DEFAULT_RETENTION_MS as u64 / 1000),
            sync_interval_secs: parsed(&lookup, "EQUIPALLOC_SYNC_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
            compact_threshold: parsed(&lookup, "EQUIPALLOC_COMPACT_THRESHOLD")
                .unwrap_or(DEFAULT_COMPACT_THRESHOLD),
            repair_untracked: parsed(&lookup, "EQUIPALLOC_REPAIR_UNTRACKED").unwrap_or(false),
        }
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            ledger_path: self.data_dir.join("allocations.wal"),
            retention_ms: i64::try_from(self.retention_secs)
                .unwrap_or(i64::MAX)
                .saturating_mul(1000),
            sync_interval: Duration::from_secs(self.sync_interval_secs),
            compact_threshold: self.compact_threshold,
            repair_untracked: self.repair_untracked,
        }
    }
}
