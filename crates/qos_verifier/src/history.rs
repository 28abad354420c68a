//! Bounded ring of recently finished operations, for admin inspection.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::types::{FileId, QoSAction};

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub file: FileId,
    pub action: QoSAction,
    pub error: Option<String>,
    pub when: SystemTime,
}

/// Keeps the last `capacity` terminal operations, and errored ones in a
/// separate ring so they survive longer than the churn of successes.
pub struct VerifierHistory {
    capacity: usize,
    all: Mutex<VecDeque<HistoryEntry>>,
    errors: Mutex<VecDeque<HistoryEntry>>,
}

impl VerifierHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            all: Mutex::new(VecDeque::new()),
            errors: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, file: FileId, action: QoSAction, error: Option<String>) {
        let entry = HistoryEntry {
            file,
            action,
            error,
            when: SystemTime::now(),
        };
        if entry.error.is_some() {
            push_bounded(
                &mut self.errors.lock().expect("history poisoned"),
                entry.clone(),
                self.capacity,
            );
        }
        push_bounded(
            &mut self.all.lock().expect("history poisoned"),
            entry,
            self.capacity,
        );
    }

    /// Most recent first.
    pub fn recent(&self) -> Vec<HistoryEntry> {
        self.all
            .lock()
            .expect("history poisoned")
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    /// Most recent errored operations, most recent first.
    pub fn recent_errors(&self) -> Vec<HistoryEntry> {
        self.errors
            .lock()
            .expect("history poisoned")
            .iter()
            .rev()
            .cloned()
            .collect()
    }
}

fn push_bounded(ring: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, capacity: usize) {
    if ring.len() == capacity {
        ring.pop_front();
    }
    ring.push_back(entry);
}
