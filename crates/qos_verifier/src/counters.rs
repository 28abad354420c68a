//! Running counters over received messages and finished operations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::types::{QoSAction, QoSMessageType};

/// Lock-free tallies for the hot receive path; completion breakdowns take a
/// short lock since they happen at most once per operation.
#[derive(Debug, Default)]
pub struct VerifierCounters {
    updates_received: AtomicU64,
    scans_received: AtomicU64,
    adjustment_responses: AtomicU64,
    cancellations: AtomicU64,
    completed_by_action: Mutex<BTreeMap<QoSAction, u64>>,
    failed_by_pool: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of every counter, for admin queries and logs.
#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    pub updates_received: u64,
    pub scans_received: u64,
    pub adjustment_responses: u64,
    pub cancellations: u64,
    pub completed_by_action: BTreeMap<QoSAction, u64>,
    pub failed_by_pool: BTreeMap<String, u64>,
}

impl VerifierCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_received(&self, message_type: QoSMessageType) {
        if message_type.is_scan() {
            self.scans_received.fetch_add(1, Ordering::Relaxed);
        } else {
            self.updates_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn adjustment_response_received(&self) {
        self.adjustment_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cancellation_received(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation_completed(&self, action: QoSAction) {
        let mut completed = self
            .completed_by_action
            .lock()
            .expect("counters poisoned");
        *completed.entry(action).or_insert(0) += 1;
    }

    pub fn operation_failed(&self, pool: Option<&str>) {
        let mut failed = self.failed_by_pool.lock().expect("counters poisoned");
        *failed.entry(pool.unwrap_or("<none>").to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            updates_received: self.updates_received.load(Ordering::Relaxed),
            scans_received: self.scans_received.load(Ordering::Relaxed),
            adjustment_responses: self.adjustment_responses.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            completed_by_action: self
                .completed_by_action
                .lock()
                .expect("counters poisoned")
                .clone(),
            failed_by_pool: self.failed_by_pool.lock().expect("counters poisoned").clone(),
        }
    }
}
