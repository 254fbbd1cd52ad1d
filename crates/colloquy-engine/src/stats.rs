use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Outcome counters for best-effort remote traffic.
#[derive(Debug, Default)]
pub struct RemoteStats {
    reads_attempted: AtomicU64,
    reads_failed: AtomicU64,
    reads_stale: AtomicU64,
    writes_attempted: AtomicU64,
    writes_failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatsSnapshot {
    pub reads_attempted: u64,
    pub reads_failed: u64,
    pub reads_stale: u64,
    pub writes_attempted: u64,
    pub writes_failed: u64,
}

impl RemoteStats {
    pub fn read_attempted(&self) {
        self.reads_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_failed(&self) {
        self.reads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_stale(&self) {
        self.reads_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_attempted(&self) {
        self.writes_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RemoteStatsSnapshot {
        RemoteStatsSnapshot {
            reads_attempted: self.reads_attempted.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            reads_stale: self.reads_stale.load(Ordering::Relaxed),
            writes_attempted: self.writes_attempted.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
        }
    }
}
