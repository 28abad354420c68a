//! Update intake, pass orchestration, and adjuster callback handling.
//!
//! The handler owns the operation store, runs verification passes until an
//! operation either dispatches an adjustment or finishes, and reacts to the
//! adjuster's asynchronous responses. An event loop started with
//! [`VerifyOperationHandler::spawn`] feeds it from a channel with bounded
//! concurrency.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};

use crate::counters::{CountersSnapshot, VerifierCounters};
use crate::error::VerifyError;
use crate::history::{HistoryEntry, VerifierHistory};
use crate::operation::VerifyOperation;
use crate::operation_map::{CompletedOperation, PostAction, VerifyOperationMap};
use crate::pool_info::PoolInfoMap;
use crate::scan_records::ScanRecordMap;
use crate::services::{
    ActionCompletedListener, Adjuster, Alarm, AlarmLimiter, AlarmSink, ReplicaProbe,
    RequirementsService,
};
use crate::types::{
    AdjustmentRequest, AdjustmentResponse, AdjustmentStatus, FileId, FileQoSRequirements,
    FileQoSUpdate, QoSAction, QoSMessageType, ScanVerificationRequest,
};
use crate::verifier::FileStatusVerifier;

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Retries granted after the first failed attempt.
    pub max_retries: u32,
    /// Upper bound on concurrently handled events.
    pub max_concurrent_passes: usize,
    /// Minimum spacing between identical alarms.
    pub alarm_window: Duration,
    /// Scan progress is reported every this many completed files.
    pub scan_notify_batch: usize,
    /// Terminal operations kept for inspection.
    pub history_capacity: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            max_concurrent_passes: 64,
            alarm_window: Duration::from_secs(30 * 60),
            scan_notify_batch: 50,
            history_capacity: 1000,
        }
    }
}

/// Events accepted by the handler's event loop.
#[derive(Debug)]
pub enum VerifierEvent {
    Update(FileQoSUpdate),
    Scan(ScanVerificationRequest),
    AdjustmentResponse(AdjustmentResponse),
    Cancel(FileId),
    CancelPool(String),
    ExcludedChange { pool: String, excluded: bool },
}

enum PassResult {
    /// An adjustment was handed to the adjuster; the operation waits.
    Dispatched,
    /// The pass wrote a terminal state back; post-processing decides next.
    Terminal,
    /// The operation was cancelled out from under the pass.
    Detached,
}

pub struct VerifyOperationHandler {
    config: VerifierConfig,
    map: VerifyOperationMap,
    scan_records: ScanRecordMap,
    pool_info: Arc<PoolInfoMap>,
    verifier: FileStatusVerifier,
    requirements: Arc<dyn RequirementsService>,
    adjuster: Arc<dyn Adjuster>,
    listener: Arc<dyn ActionCompletedListener>,
    alarms: Arc<dyn AlarmSink>,
    limiter: AlarmLimiter,
    counters: Arc<VerifierCounters>,
    history: Arc<VerifierHistory>,
}

impl VerifyOperationHandler {
    pub fn new(
        config: VerifierConfig,
        pool_info: Arc<PoolInfoMap>,
        probe: Arc<dyn ReplicaProbe>,
        requirements: Arc<dyn RequirementsService>,
        adjuster: Arc<dyn Adjuster>,
        listener: Arc<dyn ActionCompletedListener>,
        alarms: Arc<dyn AlarmSink>,
    ) -> Self {
        Self {
            map: VerifyOperationMap::new(config.max_retries),
            scan_records: ScanRecordMap::new(config.scan_notify_batch),
            verifier: FileStatusVerifier::new(pool_info.clone(), probe),
            limiter: AlarmLimiter::new(config.alarm_window),
            counters: Arc::new(VerifierCounters::new()),
            history: Arc::new(VerifierHistory::new(config.history_capacity)),
            config,
            pool_info,
            requirements,
            adjuster,
            listener,
            alarms,
        }
    }

    /// Start the event loop; events sent on the returned channel are handled
    /// on spawned tasks, at most `max_concurrent_passes` at a time.
    pub fn spawn(self: Arc<Self>) -> mpsc::Sender<VerifierEvent> {
        let (tx, mut rx) = mpsc::channel::<VerifierEvent>(self.config.max_concurrent_passes * 4);
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_passes));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let permit = permits
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let handler = self.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    handler.dispatch(event).await;
                });
            }
            tracing::info!("verifier event channel closed; event loop exiting");
        });
        tx
    }

    async fn dispatch(&self, event: VerifierEvent) {
        match event {
            VerifierEvent::Update(update) => self.handle_update(update).await,
            VerifierEvent::Scan(request) => self.handle_scan_request(request).await,
            VerifierEvent::AdjustmentResponse(response) => {
                self.handle_adjustment_response(response).await
            }
            VerifierEvent::Cancel(file) => self.handle_file_operation_cancelled(&file).await,
            VerifierEvent::CancelPool(pool) => {
                self.handle_operations_cancelled_for_pool(&pool).await
            }
            VerifierEvent::ExcludedChange { pool, excluded } => {
                self.handle_excluded_status_change(&pool, excluded)
            }
        }
    }

    /// Entry point for a single file update.
    pub async fn handle_update(&self, update: FileQoSUpdate) {
        self.counters.message_received(update.message_type);
        tracing::debug!(file = %update.file, message_type = ?update.message_type,
            "update received");
        if self.map.create_or_update(&update) {
            self.drive(&update.file).await;
        }
    }

    /// Entry point for a batch of files from a pool or system scan.
    pub async fn handle_scan_request(&self, request: ScanVerificationRequest) {
        self.counters.message_received(request.message_type);
        tracing::info!(pool = %request.pool, files = request.files.len(),
            message_type = ?request.message_type, "scan batch received");
        self.scan_records
            .update_arrived(&request.pool, request.message_type, request.files.len());

        for file in request.files {
            let mut update = FileQoSUpdate::new(file, request.message_type)
                .with_pool(request.pool.clone());
            update.storage_unit = request.storage_unit.clone();
            if self.map.create_or_update(&update) {
                self.drive(&update.file).await;
            } else {
                // the live operation will re-verify anyway; settle the
                // scan's ledger for this file now
                self.report_scan_progress(&request.pool, false);
            }
        }
    }

    /// Entry point for the adjuster's asynchronous outcome report.
    pub async fn handle_adjustment_response(&self, response: AdjustmentResponse) {
        self.counters.adjustment_response_received();
        tracing::debug!(file = %response.file, status = ?response.status,
            "adjustment response received");
        let error = match response.status {
            // a cancellation confirmed by the adjuster clears the slate the
            // same way a completion does; the follow-up pass re-evaluates
            AdjustmentStatus::Completed | AdjustmentStatus::Cancelled => None,
            AdjustmentStatus::Failed => Some(match response.error {
                Some(error) => VerifyError::Adjustment(error),
                None => VerifyError::Dispatch(
                    response.file.clone(),
                    "adjuster reported failure without detail".into(),
                ),
            }),
        };
        if self.map.update_operation(&response.file, error) {
            self.drive(&response.file).await;
        }
    }

    /// Entry point for a client cancelling one file's operation.
    pub async fn handle_file_operation_cancelled(&self, file: &FileId) {
        self.counters.cancellation_received();
        if let Some(cancelled) = self.map.cancel(file) {
            tracing::info!(file = %file, "operation cancelled");
            self.release_cancelled(cancelled).await;
        }
    }

    /// Entry point for a pool going away: every operation reading from,
    /// writing to, or originated by it is cancelled, along with its scan.
    pub async fn handle_operations_cancelled_for_pool(&self, pool: &str) {
        self.counters.cancellation_received();
        let cancelled = self.map.cancel_for_pool(pool);
        tracing::info!(pool = %pool, count = cancelled.len(),
            "cancelling operations for pool");
        for done in cancelled {
            self.release_cancelled(done).await;
        }
        if let Some(snapshot) = self.scan_records.cancel(pool) {
            tracing::info!(pool = %pool, completed = snapshot.completed,
                arrived = snapshot.arrived, "scan cancelled");
        }
    }

    /// Entry point for admin include/exclude of a pool.
    pub fn handle_excluded_status_change(&self, pool: &str, excluded: bool) {
        self.pool_info.set_excluded(pool, excluded);
        tracing::info!(pool = %pool, excluded, "pool exclusion changed");
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub fn recent_history(&self) -> Vec<HistoryEntry> {
        self.history.recent()
    }

    pub fn recent_errors(&self) -> Vec<HistoryEntry> {
        self.history.recent_errors()
    }

    pub fn operation_count(&self) -> usize {
        self.map.len()
    }

    /// Run passes for one file until its operation either waits on the
    /// adjuster, finishes, or is cancelled away.
    async fn drive(&self, file: &FileId) {
        loop {
            if let Some(PostAction::Complete(done)) = self.map.post_process(file) {
                self.finish_operation(done).await;
                return;
            }
            let Some(mut operation) = self.map.claim_running(file) else {
                return;
            };
            match self.run_pass(&mut operation).await {
                PassResult::Dispatched | PassResult::Detached => return,
                PassResult::Terminal => {}
            }
        }
    }

    async fn run_pass(&self, operation: &mut VerifyOperation) -> PassResult {
        let file = operation.file.clone();
        let mut update = FileQoSUpdate::new(file.clone(), operation.message_type);
        update.pool = operation.parent.clone();
        update.storage_unit = operation.storage_unit.clone();

        let mut requirements = match self.requirements.fetch_requirements(&update).await {
            Ok(Some(requirements)) => requirements,
            Ok(None) => {
                // a cleared or scanned file that no longer exists needs no
                // work; anything else losing its requirements is an error
                let benign = operation.message_type == QoSMessageType::ClearCacheLocation
                    || operation.message_type.is_scan();
                if benign {
                    tracing::debug!(file = %file, "no requirements registered; nothing to do");
                    return self.write_void(operation);
                }
                let error =
                    VerifyError::Requirements(file.clone(), "no requirements registered".into());
                return self.write_failure(operation, error);
            }
            Err(err) => {
                let error = VerifyError::Requirements(file.clone(), err.to_string());
                return self.write_failure(operation, error);
            }
        };

        // A scan scoped to a storage unit may race a file changing units;
        // such a file belongs to some other scan now.
        if let Some(unit) = operation.storage_unit.as_deref() {
            if unit != requirements.attributes.storage_unit() {
                tracing::debug!(file = %file, unit = %unit,
                    actual = %requirements.attributes.storage_unit(),
                    "file left the scanned storage unit");
                return self.write_void(operation);
            }
        }

        operation.pool_group = self
            .pool_info
            .effective_pool_group(&requirements.attributes.disk_locations);

        let action = self.verifier.verify(&mut requirements, operation).await;
        operation.action = action;
        tracing::debug!(file = %file, action = %action, needed = operation.needed,
            "verification pass complete");

        if action.is_adjustment() {
            return self.dispatch_adjustment(operation, &requirements).await;
        }
        match action {
            QoSAction::Void => self.write_void(operation),
            QoSAction::NotifyMissing => {
                self.raise_limited(
                    &format!("lost:{file}"),
                    Alarm::LostFile { file: file.clone() },
                );
                self.write_failure(operation, VerifyError::MissingLocations(file))
            }
            QoSAction::NotifyInaccessible => {
                let pool = operation.principal_pool().unwrap_or("<unknown>").to_string();
                self.raise_limited(
                    &format!("inaccessible:{pool}"),
                    Alarm::InaccessibleFile { pool },
                );
                self.write_failure(operation, VerifyError::InaccessibleFile(file))
            }
            QoSAction::NotifyOutOfSync => {
                self.raise_limited(
                    &format!("sync:{file}"),
                    Alarm::LocationSyncIssue { file: file.clone() },
                );
                self.write_failure(operation, VerifyError::NamespaceOutOfSync(file))
            }
            QoSAction::PoolSelectionFailure => {
                let group = operation
                    .pool_group
                    .clone()
                    .unwrap_or_else(|| "<system>".to_string());
                self.raise_limited(
                    &format!("group:{group}"),
                    Alarm::PoolGroupMisconfigured {
                        group: group.clone(),
                    },
                );
                self.write_failure(
                    operation,
                    VerifyError::PoolSelectionFailure { file, group },
                )
            }
            adjustment => unreachable!("adjustment {adjustment} handled above"),
        }
    }

    async fn dispatch_adjustment(
        &self,
        operation: &mut VerifyOperation,
        requirements: &FileQoSRequirements,
    ) -> PassResult {
        let request = AdjustmentRequest {
            action: operation.action,
            file: operation.file.clone(),
            attributes: requirements.attributes.clone(),
            pool_group: operation.pool_group.clone(),
            source: operation.source.selected().map(str::to_string),
            target: operation.target.selected().map(str::to_string),
        };
        tracing::info!(file = %operation.file, action = %operation.action,
            source = ?request.source, target = ?request.target, "dispatching adjustment");
        if let Err(err) = self.adjuster.request_adjustment(request).await {
            let error = VerifyError::Dispatch(operation.file.clone(), err.to_string());
            return self.write_failure(operation, error);
        }
        if self.map.set_waiting(operation) {
            return PassResult::Dispatched;
        }
        // cancelled between dispatch and write-back
        if let Err(err) = self.adjuster.adjustment_cancelled(&operation.file).await {
            tracing::debug!(file = %operation.file, error = %err,
                "could not notify adjuster of cancellation");
        }
        PassResult::Detached
    }

    fn write_void(&self, operation: &VerifyOperation) -> PassResult {
        if self.map.void_operation(operation) {
            PassResult::Terminal
        } else {
            PassResult::Detached
        }
    }

    fn write_failure(&self, operation: &VerifyOperation, error: VerifyError) -> PassResult {
        tracing::warn!(file = %operation.file, action = %operation.action, error = %error,
            "verification pass failed");
        if self.map.fail_operation(operation, error) {
            PassResult::Terminal
        } else {
            PassResult::Detached
        }
    }

    /// Account for an operation leaving the store through completion or
    /// abort.
    async fn finish_operation(&self, done: CompletedOperation) {
        let operation = &done.operation;
        // a cycle that ended on a confirming void pass reports the
        // adjustment it performed
        let action = if operation.action == QoSAction::Void
            && operation.previous_action.is_adjustment()
        {
            operation.previous_action
        } else {
            operation.action
        };
        let error = operation.error.as_ref();

        self.listener
            .action_completed(&operation.file, action, error);
        match error {
            None => self.counters.operation_completed(action),
            Some(_) => self.counters.operation_failed(operation.principal_pool()),
        }
        self.history.record(
            operation.file.clone(),
            action,
            error.map(ToString::to_string),
        );

        if done.aborted {
            let storage_unit = operation
                .storage_unit
                .clone()
                .unwrap_or_else(|| "<unknown>".to_string());
            tracing::warn!(file = %operation.file, action = %action,
                storage_unit = %storage_unit,
                pool = operation.principal_pool().unwrap_or("<none>"),
                tried = ?operation.tried, "operation aborted");
            self.raise_limited(
                &format!("abort:{storage_unit}"),
                Alarm::OperationAborted { storage_unit },
            );
        } else {
            tracing::info!(file = %operation.file, action = %action, "operation finished");
        }

        if operation.pending_adjustment {
            if let Err(err) = self.adjuster.adjustment_cancelled(&operation.file).await {
                tracing::debug!(file = %operation.file, error = %err,
                    "could not notify adjuster of cancellation");
            }
        }

        if operation.message_type.is_scan() {
            if let Some(pool) = operation.parent.as_deref() {
                self.report_scan_progress(pool, error.is_some());
            }
        }
    }

    /// Release a cancelled operation: abort in-flight adjuster work and tell
    /// subscribers the action did not complete.
    async fn release_cancelled(&self, done: CompletedOperation) {
        let operation = &done.operation;
        if operation.pending_adjustment {
            if let Err(err) = self.adjuster.adjustment_cancelled(&operation.file).await {
                tracing::debug!(file = %operation.file, error = %err,
                    "could not notify adjuster of cancellation");
            }
        }
        self.listener
            .action_completed(&operation.file, operation.action, operation.error.as_ref());
        self.history.record(
            operation.file.clone(),
            operation.action,
            Some("cancelled".to_string()),
        );
    }

    fn report_scan_progress(&self, pool: &str, failed: bool) {
        if let Some(progress) = self.scan_records.update_completed(pool, failed) {
            tracing::info!(pool = %progress.pool, completed = progress.completed,
                arrived = progress.arrived, failed = progress.failed,
                finished = progress.finished, "scan progress");
        }
    }

    fn raise_limited(&self, key: &str, alarm: Alarm) {
        if self.limiter.try_acquire(key) {
            self.alarms.raise(alarm);
        }
    }
}
