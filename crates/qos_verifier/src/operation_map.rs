//! In-memory store of active verification operations.
//!
//! One operation per file, keyed by id. Verification passes run on a clone
//! of the stored operation; every write-back checks that the stored entry
//! still exists and is still `Running`, so a concurrent cancellation simply
//! makes the pass's result a no-op.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{classify_failure, FailureType, VerifyError};
use crate::operation::{VerifyOperation, VerifyOperationState};
use crate::types::{FileId, FileQoSUpdate, QoSAction};

/// A removed operation together with how it ended.
#[derive(Debug)]
pub struct CompletedOperation {
    pub operation: VerifyOperation,
    pub aborted: bool,
}

/// What the caller should do with an operation after post-processing.
#[derive(Debug)]
pub enum PostAction {
    /// The operation went back to `Ready` and wants another pass.
    Requeue,
    /// The operation was removed from the store.
    Complete(CompletedOperation),
}

pub struct VerifyOperationMap {
    operations: RwLock<HashMap<FileId, VerifyOperation>>,
    max_retries: u32,
}

impl VerifyOperationMap {
    pub fn new(max_retries: u32) -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            max_retries,
        }
    }

    pub fn len(&self) -> usize {
        self.operations.read().expect("operation map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, file: &FileId) -> bool {
        self.operations
            .read()
            .expect("operation map poisoned")
            .contains_key(file)
    }

    /// Register an update. Returns true when a new operation was created and
    /// the caller should start driving it; a live operation absorbs the
    /// update instead and its current cycle picks the change up on its next
    /// pass.
    pub fn create_or_update(&self, update: &FileQoSUpdate) -> bool {
        let mut operations = self.operations.write().expect("operation map poisoned");
        match operations.get_mut(&update.file) {
            Some(operation) => {
                operation.merge_update(update);
                false
            }
            None => {
                operations.insert(update.file.clone(), VerifyOperation::new(update));
                true
            }
        }
    }

    /// Move a `Ready` operation to `Running` and hand out a working clone.
    pub fn claim_running(&self, file: &FileId) -> Option<VerifyOperation> {
        let mut operations = self.operations.write().expect("operation map poisoned");
        let operation = operations.get_mut(file)?;
        if operation.state != VerifyOperationState::Ready {
            return None;
        }
        operation.state = VerifyOperationState::Running;
        Some(operation.clone())
    }

    /// Write back a pass that found nothing to do. Returns false when the
    /// operation disappeared or left `Running` in the meantime.
    pub fn void_operation(&self, pass: &VerifyOperation) -> bool {
        self.write_back(pass, |stored| {
            stored.state = VerifyOperationState::Done;
            stored.action = QoSAction::Void;
            stored.needed = 0;
            stored.error = None;
        })
    }

    /// Write back a pass that failed before dispatching anything.
    pub fn fail_operation(&self, pass: &VerifyOperation, error: VerifyError) -> bool {
        self.write_back(pass, |stored| {
            stored.state = VerifyOperationState::Failed;
            stored.action = pass.action;
            stored.error = Some(error);
        })
    }

    /// Write back a pass that dispatched an adjustment; the operation now
    /// waits for the adjuster's asynchronous response.
    pub fn set_waiting(&self, pass: &VerifyOperation) -> bool {
        self.write_back(pass, |stored| {
            stored.state = VerifyOperationState::Waiting;
            stored.action = pass.action;
            stored.source = pass.source.clone();
            stored.target = pass.target.clone();
            stored.needed = pass.needed;
            stored.pending_adjustment = true;
            stored.error = None;
        })
    }

    fn write_back(&self, pass: &VerifyOperation, apply: impl FnOnce(&mut VerifyOperation)) -> bool {
        let mut operations = self.operations.write().expect("operation map poisoned");
        let Some(stored) = operations.get_mut(&pass.file) else {
            return false;
        };
        if stored.state != VerifyOperationState::Running {
            return false;
        }
        // the pass may have refreshed the group; the storage unit is never
        // touched by a pass and may have been merged from a newer update
        stored.pool_group = pass.pool_group.clone();
        apply(stored);
        true
    }

    /// Record the adjuster's response for a `Waiting` operation. Returns
    /// false when no operation is waiting for it.
    pub fn update_operation(&self, file: &FileId, error: Option<VerifyError>) -> bool {
        let mut operations = self.operations.write().expect("operation map poisoned");
        let Some(operation) = operations.get_mut(file) else {
            return false;
        };
        if operation.state != VerifyOperationState::Waiting {
            return false;
        }
        operation.pending_adjustment = false;
        match error {
            None => {
                operation.state = VerifyOperationState::Done;
                operation.error = None;
            }
            Some(error) => {
                operation.state = VerifyOperationState::Failed;
                operation.error = Some(error);
            }
        }
        true
    }

    /// Decide what happens after a `Done` or `Failed` pass: requeue for
    /// another pass, or remove the operation as finished.
    ///
    /// A successful adjustment always requeues so a follow-up pass confirms
    /// the requirement is now met; the retry count resets because progress
    /// was made. Failures consume the retry budget on every attempt, so an
    /// operation is aborted after exactly `max_retries` retries beyond the
    /// first attempt.
    pub fn post_process(&self, file: &FileId) -> Option<PostAction> {
        let mut operations = self.operations.write().expect("operation map poisoned");
        let operation = operations.get_mut(file)?;
        match operation.state {
            VerifyOperationState::Done => {
                if operation.action.is_adjustment() {
                    operation.previous_action = operation.action;
                    operation.action = QoSAction::Void;
                    operation.reset_source_and_target();
                    operation.retried = 0;
                    operation.state = VerifyOperationState::Ready;
                    return Some(PostAction::Requeue);
                }
                let operation = operations.remove(file).expect("present above");
                Some(PostAction::Complete(CompletedOperation {
                    operation,
                    aborted: false,
                }))
            }
            VerifyOperationState::Failed => {
                let error = operation.error.clone().unwrap_or_else(|| {
                    VerifyError::Dispatch(file.clone(), "failed without a recorded error".into())
                });
                let failure = classify_failure(operation.action, &error);
                operation.retried += 1;
                if failure == FailureType::Fatal || operation.retried > self.max_retries {
                    operation.state = VerifyOperationState::Aborted;
                    if operation.retried > self.max_retries {
                        operation.error = Some(VerifyError::RetriesExhausted {
                            max_retries: self.max_retries,
                            last: error.to_string(),
                        });
                    }
                    let operation = operations.remove(file).expect("present above");
                    return Some(PostAction::Complete(CompletedOperation {
                        operation,
                        aborted: true,
                    }));
                }
                match failure {
                    FailureType::NewSource => {
                        operation.add_source_to_tried();
                        operation.source.clear();
                    }
                    FailureType::NewTarget => {
                        operation.add_target_to_tried();
                        operation.target.clear();
                    }
                    FailureType::Retriable => {}
                    FailureType::Fatal => unreachable!("handled above"),
                }
                operation.state = VerifyOperationState::Ready;
                Some(PostAction::Requeue)
            }
            _ => None,
        }
    }

    /// Remove one operation on user or client cancellation.
    pub fn cancel(&self, file: &FileId) -> Option<CompletedOperation> {
        let mut operations = self.operations.write().expect("operation map poisoned");
        let mut operation = operations.remove(file)?;
        operation.state = VerifyOperationState::Canceled;
        Some(CompletedOperation {
            operation,
            aborted: false,
        })
    }

    /// Remove every operation touching `pool` as parent, source, or target.
    pub fn cancel_for_pool(&self, pool: &str) -> Vec<CompletedOperation> {
        let mut operations = self.operations.write().expect("operation map poisoned");
        let files: Vec<FileId> = operations
            .values()
            .filter(|operation| {
                operation.parent.as_deref() == Some(pool)
                    || operation.source.selected() == Some(pool)
                    || operation.target.selected() == Some(pool)
            })
            .map(|operation| operation.file.clone())
            .collect();
        files
            .into_iter()
            .filter_map(|file| operations.remove(&file))
            .map(|mut operation| {
                operation.state = VerifyOperationState::Canceled;
                CompletedOperation {
                    operation,
                    aborted: false,
                }
            })
            .collect()
    }
}
