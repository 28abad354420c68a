//! Shared mock collaborators and a handler harness for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use qos_verifier::error::VerifyError;
use qos_verifier::handler::{VerifierConfig, VerifyOperationHandler};
use qos_verifier::pool_info::{PoolInfoMap, PoolInformation};
use qos_verifier::services::{
    ActionCompletedListener, Adjuster, Alarm, AlarmSink, ReplicaProbe, RequirementsService,
};
use qos_verifier::types::{
    AdjustmentRequest, AdjustmentResponse, AdjustmentStatus, FileAttributes, FileId,
    FileQoSRequirements, FileQoSUpdate, QoSAction, ReplicaStatus,
};
use qos_verifier::AdjustmentError;

/// Requirements keyed by file; an absent file answers `Ok(None)`.
#[derive(Default)]
pub struct ScriptedRequirements {
    entries: Mutex<HashMap<FileId, FileQoSRequirements>>,
}

impl ScriptedRequirements {
    pub fn insert(&self, requirements: FileQoSRequirements) {
        self.entries
            .lock()
            .unwrap()
            .insert(requirements.file.clone(), requirements);
    }

    pub fn remove(&self, file: &FileId) {
        self.entries.lock().unwrap().remove(file);
    }
}

#[async_trait]
impl RequirementsService for ScriptedRequirements {
    async fn fetch_requirements(
        &self,
        update: &FileQoSUpdate,
    ) -> anyhow::Result<Option<FileQoSRequirements>> {
        Ok(self.entries.lock().unwrap().get(&update.file).cloned())
    }
}

/// Probe answering from a fixed per-file replica-status table.
#[derive(Default)]
pub struct StaticProbe {
    statuses: Mutex<HashMap<FileId, Vec<ReplicaStatus>>>,
}

impl StaticProbe {
    pub fn set(&self, file: &FileId, statuses: Vec<ReplicaStatus>) {
        self.statuses.lock().unwrap().insert(file.clone(), statuses);
    }
}

#[async_trait]
impl ReplicaProbe for StaticProbe {
    async fn verify_locations(&self, file: &FileId, locations: &[String]) -> Vec<ReplicaStatus> {
        self.statuses
            .lock()
            .unwrap()
            .get(file)
            .map(|statuses| {
                statuses
                    .iter()
                    .filter(|status| locations.contains(&status.pool))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Records every adjustment request and cancellation notice.
#[derive(Default)]
pub struct RecordingAdjuster {
    pub requests: Mutex<Vec<AdjustmentRequest>>,
    pub cancelled: Mutex<Vec<FileId>>,
}

impl RecordingAdjuster {
    pub fn last_request(&self) -> AdjustmentRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("an adjustment was requested")
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Adjuster for RecordingAdjuster {
    async fn request_adjustment(&self, request: AdjustmentRequest) -> anyhow::Result<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }

    async fn adjustment_cancelled(&self, file: &FileId) -> anyhow::Result<()> {
        self.cancelled.lock().unwrap().push(file.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub completions: Mutex<Vec<(FileId, QoSAction, Option<String>)>>,
}

impl RecordingListener {
    pub fn completions(&self) -> Vec<(FileId, QoSAction, Option<String>)> {
        self.completions.lock().unwrap().clone()
    }
}

impl ActionCompletedListener for RecordingListener {
    fn action_completed(&self, file: &FileId, action: QoSAction, error: Option<&VerifyError>) {
        self.completions.lock().unwrap().push((
            file.clone(),
            action,
            error.map(ToString::to_string),
        ));
    }
}

#[derive(Default)]
pub struct RecordingAlarms {
    pub raised: Mutex<Vec<Alarm>>,
}

impl RecordingAlarms {
    pub fn raised(&self) -> Vec<Alarm> {
        self.raised.lock().unwrap().clone()
    }
}

impl AlarmSink for RecordingAlarms {
    fn raise(&self, alarm: Alarm) {
        self.raised.lock().unwrap().push(alarm);
    }
}

pub struct Harness {
    pub pool_info: Arc<PoolInfoMap>,
    pub requirements: Arc<ScriptedRequirements>,
    pub probe: Arc<StaticProbe>,
    pub adjuster: Arc<RecordingAdjuster>,
    pub listener: Arc<RecordingListener>,
    pub alarms: Arc<RecordingAlarms>,
    pub handler: Arc<VerifyOperationHandler>,
}

impl Harness {
    pub fn new(config: VerifierConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let pool_info = Arc::new(PoolInfoMap::new());
        let requirements = Arc::new(ScriptedRequirements::default());
        let probe = Arc::new(StaticProbe::default());
        let adjuster = Arc::new(RecordingAdjuster::default());
        let listener = Arc::new(RecordingListener::default());
        let alarms = Arc::new(RecordingAlarms::default());
        let handler = Arc::new(VerifyOperationHandler::new(
            config,
            pool_info.clone(),
            probe.clone(),
            requirements.clone(),
            adjuster.clone(),
            listener.clone(),
            alarms.clone(),
        ));
        Self {
            pool_info,
            requirements,
            probe,
            adjuster,
            listener,
            alarms,
            handler,
        }
    }

    /// A harness with plain enabled pools registered.
    pub fn with_pools(pools: &[&str]) -> Self {
        let harness = Self::new(VerifierConfig::default());
        for pool in pools {
            harness.pool_info.add_pool(pool, PoolInformation::default());
        }
        harness
    }

    /// Respond to the most recent adjustment request as completed.
    pub async fn complete_last_adjustment(&self) {
        let request = self.adjuster.last_request();
        self.handler
            .handle_adjustment_response(AdjustmentResponse {
                file: request.file,
                status: AdjustmentStatus::Completed,
                error: None,
            })
            .await;
    }

    /// Respond to the most recent adjustment request as failed.
    pub async fn fail_last_adjustment(&self, error: AdjustmentError) {
        let request = self.adjuster.last_request();
        self.handler
            .handle_adjustment_response(AdjustmentResponse {
                file: request.file,
                status: AdjustmentStatus::Failed,
                error: Some(error),
            })
            .await;
    }
}

pub fn file(id: &str) -> FileId {
    FileId::from(id)
}

/// Disk-only requirements with every listed pool as a namespace location.
pub fn disk_requirements(id: &str, required_disk: usize, locations: &[&str]) -> FileQoSRequirements {
    FileQoSRequirements {
        file: file(id),
        required_disk,
        required_tape: 0,
        attributes: FileAttributes {
            disk_locations: locations.iter().map(|p| p.to_string()).collect(),
            tape_locations: Vec::new(),
            storage_class: "exp:raw".to_string(),
            hsm: "osm".to_string(),
            stored: false,
        },
        partition_keys: Default::default(),
    }
}

pub fn cached_replica(pool: &str) -> ReplicaStatus {
    ReplicaStatus {
        pool: pool.to_string(),
        exists: true,
        readable: true,
        sticky: false,
        precious: false,
        removable: true,
        broken: false,
    }
}

pub fn sticky_replica(pool: &str) -> ReplicaStatus {
    let mut status = cached_replica(pool);
    status.sticky = true;
    status.removable = false;
    status
}

pub fn broken_replica(pool: &str) -> ReplicaStatus {
    let mut status = cached_replica(pool);
    status.broken = true;
    status
}
