//! Bulk pool counters
//!
//! - Counters only, plus one high-water mark
//! - Monotonic increase
//! - Thread-safe but lock-minimal

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters for one bulk pool
///
/// All counters use Relaxed atomics; readers see eventually consistent
/// values while the pool runs and exact values once it has completed.
#[derive(Debug, Default)]
pub struct BulkMetrics {
    items_accepted: AtomicU64,
    items_rejected: AtomicU64,
    items_executed: AtomicU64,
    items_done: AtomicU64,
    items_abandoned: AtomicU64,
    tx_opened: AtomicU64,
    tx_open_failed: AtomicU64,
    tx_close_failed: AtomicU64,
    tx_persistent: AtomicU64,
    batches: AtomicU64,
    largest_batch: AtomicU64,
}

impl BulkMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// An item was enqueued by `put`
    pub fn increment_items_accepted(&self) {
        self.items_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// A `put` was rejected after a global failure
    pub fn increment_items_rejected(&self) {
        self.items_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// The do-callback ran for one item
    pub fn increment_items_executed(&self) {
        self.items_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// The done-callback ran for one item
    pub fn increment_items_done(&self) {
        self.items_done.fetch_add(1, Ordering::Relaxed);
    }

    /// Items dropped without callbacks after a failure
    pub fn add_items_abandoned(&self, count: u64) {
        self.items_abandoned.fetch_add(count, Ordering::Relaxed);
    }

    /// A transaction was opened
    pub fn increment_tx_opened(&self) {
        self.tx_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// A transaction failed to open
    pub fn increment_tx_open_failed(&self) {
        self.tx_open_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A closed transaction could not be made persistent
    pub fn increment_tx_close_failed(&self) {
        self.tx_close_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A transaction became persistent
    pub fn increment_tx_persistent(&self) {
        self.tx_persistent.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch of `size` items was accumulated
    pub fn record_batch(&self, size: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.largest_batch.fetch_max(size, Ordering::Relaxed);
    }

    /// Items done so far
    pub fn items_done(&self) -> u64 {
        self.items_done.load(Ordering::Relaxed)
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_accepted: self.items_accepted.load(Ordering::Relaxed),
            items_rejected: self.items_rejected.load(Ordering::Relaxed),
            items_executed: self.items_executed.load(Ordering::Relaxed),
            items_done: self.items_done.load(Ordering::Relaxed),
            items_abandoned: self.items_abandoned.load(Ordering::Relaxed),
            tx_opened: self.tx_opened.load(Ordering::Relaxed),
            tx_open_failed: self.tx_open_failed.load(Ordering::Relaxed),
            tx_close_failed: self.tx_close_failed.load(Ordering::Relaxed),
            tx_persistent: self.tx_persistent.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
        }
    }

    /// Current counters as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub items_accepted: u64,
    pub items_rejected: u64,
    pub items_executed: u64,
    pub items_done: u64,
    pub items_abandoned: u64,
    pub tx_opened: u64,
    pub tx_open_failed: u64,
    pub tx_close_failed: u64,
    pub tx_persistent: u64,
    pub batches: u64,
    pub largest_batch: u64,
}

impl MetricsSnapshot {
    /// Mean items per transaction, zero before the first batch
    pub fn mean_batch(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.items_executed as f64 / self.batches as f64
        }
    }
}
