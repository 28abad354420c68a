//! Per-pool progress tracking for scan-driven verification batches.
//!
//! A scan sends the engine batches of files for one pool; the requester
//! wants progress reports without being flooded, so completions are
//! accumulated and surfaced every `notify_batch` files and once more at the
//! end.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::types::QoSMessageType;

#[derive(Debug, Clone)]
struct ScanRecord {
    message_type: QoSMessageType,
    arrived: usize,
    completed: usize,
    failed: usize,
    last_notified: usize,
}

/// Snapshot handed to the scan requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProgress {
    pub pool: String,
    pub message_type: QoSMessageType,
    pub arrived: usize,
    pub completed: usize,
    pub failed: usize,
    pub finished: bool,
}

pub struct ScanRecordMap {
    records: Mutex<BTreeMap<String, ScanRecord>>,
    notify_batch: usize,
}

impl ScanRecordMap {
    pub fn new(notify_batch: usize) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            notify_batch: notify_batch.max(1),
        }
    }

    /// Register a batch of files arriving for a pool scan. Batches for the
    /// same pool accumulate into one record until the scan finishes.
    pub fn update_arrived(&self, pool: &str, message_type: QoSMessageType, count: usize) {
        let mut records = self.records.lock().expect("scan records poisoned");
        let record = records.entry(pool.to_string()).or_insert(ScanRecord {
            message_type,
            arrived: 0,
            completed: 0,
            failed: 0,
            last_notified: 0,
        });
        record.arrived += count;
    }

    /// Count one finished file for the pool's scan. Returns a progress
    /// snapshot at every batch boundary and when the scan completes; the
    /// record is removed on completion.
    pub fn update_completed(&self, pool: &str, failed: bool) -> Option<ScanProgress> {
        let mut records = self.records.lock().expect("scan records poisoned");
        let record = records.get_mut(pool)?;
        record.completed += 1;
        if failed {
            record.failed += 1;
        }

        let finished = record.completed >= record.arrived;
        let batch_boundary = record.completed - record.last_notified >= self.notify_batch;
        if !finished && !batch_boundary {
            return None;
        }
        record.last_notified = record.completed;
        let progress = ScanProgress {
            pool: pool.to_string(),
            message_type: record.message_type,
            arrived: record.arrived,
            completed: record.completed,
            failed: record.failed,
            finished,
        };
        if finished {
            records.remove(pool);
        }
        Some(progress)
    }

    /// Drop the record for a cancelled scan; returns the final snapshot.
    pub fn cancel(&self, pool: &str) -> Option<ScanProgress> {
        let mut records = self.records.lock().expect("scan records poisoned");
        let record = records.remove(pool)?;
        Some(ScanProgress {
            pool: pool.to_string(),
            message_type: record.message_type,
            arrived: record.arrived,
            completed: record.completed,
            failed: record.failed,
            finished: false,
        })
    }

    pub fn is_tracking(&self, pool: &str) -> bool {
        self.records
            .lock()
            .expect("scan records poisoned")
            .contains_key(pool)
    }
}
