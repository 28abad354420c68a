//! Collaborator contracts consumed by the engine.
//!
//! The engine is a library invoked by message-driven services; everything
//! that crosses a service boundary (namespace requirements, pool probing,
//! physical adjustment, billing, alarms) is a trait here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::VerifyError;
use crate::types::{
    AdjustmentRequest, FileId, FileQoSRequirements, FileQoSUpdate, QoSAction, ReplicaStatus,
};

/// Fetches the current QoS requirements for a file from the engine service.
///
/// `Ok(None)` means no requirements exist; the caller treats that as a void
/// for scan-triggered updates and as fatal otherwise.
#[async_trait]
pub trait RequirementsService: Send + Sync {
    async fn fetch_requirements(
        &self,
        update: &FileQoSUpdate,
    ) -> anyhow::Result<Option<FileQoSRequirements>>;
}

/// Queries candidate pools for the per-pool state of a file's replicas.
///
/// Implementations must tolerate partial pool unavailability: an unreachable
/// pool simply contributes no status, it never fails the probe.
#[async_trait]
pub trait ReplicaProbe: Send + Sync {
    async fn verify_locations(&self, file: &FileId, locations: &[String]) -> Vec<ReplicaStatus>;
}

/// Single-pool status query used by the parallel probe fan-out.
#[async_trait]
pub trait PoolStatusClient: Send + Sync {
    async fn replica_status(&self, pool: &str, file: &FileId) -> anyhow::Result<ReplicaStatus>;
}

/// The external service that physically executes replica actions.
///
/// `request_adjustment` is fire-and-forget; the outcome arrives later as an
/// [`AdjustmentResponse`](crate::types::AdjustmentResponse) on the handler.
#[async_trait]
pub trait Adjuster: Send + Sync {
    async fn request_adjustment(&self, request: AdjustmentRequest) -> anyhow::Result<()>;

    /// Tells the adjuster to abort work for a cancelled operation.
    async fn adjustment_cancelled(&self, file: &FileId) -> anyhow::Result<()>;
}

/// Notified whenever an operation reaches a terminal outcome.
pub trait ActionCompletedListener: Send + Sync {
    fn action_completed(&self, file: &FileId, action: QoSAction, error: Option<&VerifyError>);
}

/// Structured operator-attention warnings raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alarm {
    /// File has no locations anywhere; it is lost.
    LostFile { file: FileId },
    /// All namespace locations are currently unreachable and staging is not
    /// possible.
    InaccessibleFile { pool: String },
    /// Namespace and pool repositories disagree on replica existence.
    LocationSyncIssue { file: FileId },
    /// The pool group cannot satisfy the stated requirements.
    PoolGroupMisconfigured { group: String },
    /// An operation was aborted after exhausting its retry budget.
    OperationAborted { storage_unit: String },
}

pub trait AlarmSink: Send + Sync {
    fn raise(&self, alarm: Alarm);
}

/// Keyed rate limiter for alarm emission.
///
/// Owned and injected rather than process-global; one acquisition per key per
/// window.
#[derive(Debug)]
pub struct AlarmLimiter {
    window: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl AlarmLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when the caller may emit for `key` in this window.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut last = self.last.lock().expect("alarm limiter poisoned");
        let now = Instant::now();
        match last.get(key) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                last.insert(key.to_string(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_admits_once_per_window() {
        let limiter = AlarmLimiter::new(Duration::from_secs(3600));
        assert!(limiter.try_acquire("abort:unit-a"));
        assert!(!limiter.try_acquire("abort:unit-a"));
        assert!(limiter.try_acquire("abort:unit-b"));
    }

    #[test]
    fn limiter_admits_again_after_window() {
        let limiter = AlarmLimiter::new(Duration::ZERO);
        assert!(limiter.try_acquire("sync"));
        assert!(limiter.try_acquire("sync"));
    }
}
