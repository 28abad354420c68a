//! Per-file verification operation state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::VerifyError;
use crate::types::{FileId, FileQoSUpdate, QoSAction, QoSMessageType};

/// Lifecycle of a verification operation.
///
/// `Ready` operations are waiting for a pass, `Running` operations have one
/// in flight, and `Waiting` operations have dispatched an adjustment and are
/// waiting on the adjuster's asynchronous response. `Done`, `Canceled`,
/// `Failed` and `Aborted` are terminal for the current cycle; post-processing
/// decides whether a `Done`/`Failed` operation is requeued or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyOperationState {
    Ready,
    Running,
    Waiting,
    Done,
    Canceled,
    Failed,
    Aborted,
}

/// Explicit selection state for a copy source or action target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectedPool {
    #[default]
    Unselected,
    Selected(String),
}

impl SelectedPool {
    pub fn selected(&self) -> Option<&str> {
        match self {
            Self::Unselected => None,
            Self::Selected(pool) => Some(pool),
        }
    }

    pub fn is_selected(&self) -> bool {
        matches!(self, Self::Selected(_))
    }

    pub fn clear(&mut self) {
        *self = Self::Unselected;
    }
}

/// Mutable per-file state tracked across verification passes.
///
/// Owned exclusively by the operation store; the decision core receives it by
/// reference for a single pass and only adjusts the selection fields, the
/// pool group, and the needed flag.
#[derive(Debug, Clone)]
pub struct VerifyOperation {
    pub file: FileId,
    pub message_type: QoSMessageType,
    pub state: VerifyOperationState,
    /// Action chosen by the most recent pass.
    pub action: QoSAction,
    /// Action of the pass before that; reported to listeners when the final
    /// pass is a void follow-up confirmation.
    pub previous_action: QoSAction,
    /// `None` means the system-wide group of all pools.
    pub pool_group: Option<String>,
    /// Storage-unit filter for scan-triggered operations.
    pub storage_unit: Option<String>,
    /// Pool that originated the update, when there was one.
    pub parent: Option<String>,
    pub source: SelectedPool,
    pub target: SelectedPool,
    /// Count of adjustments still believed outstanding (0 or 1).
    pub needed: usize,
    pub retried: u32,
    /// Pools already tried and failed as source or target.
    pub tried: BTreeSet<String>,
    /// True while an adjustment request is with the adjuster.
    pub pending_adjustment: bool,
    pub error: Option<VerifyError>,
}

impl VerifyOperation {
    pub fn new(update: &FileQoSUpdate) -> Self {
        Self {
            file: update.file.clone(),
            message_type: update.message_type,
            state: VerifyOperationState::Ready,
            action: QoSAction::Void,
            previous_action: QoSAction::Void,
            pool_group: None,
            storage_unit: update.storage_unit.clone(),
            parent: update.pool.clone(),
            source: SelectedPool::Unselected,
            target: SelectedPool::Unselected,
            needed: 0,
            retried: 0,
            tried: BTreeSet::new(),
            pending_adjustment: false,
            error: None,
        }
    }

    /// Merge a follow-up update into an existing operation. Only the storage
    /// unit is refreshed; the running cycle always re-verifies afterwards, so
    /// no further state transfer is necessary.
    pub fn merge_update(&mut self, update: &FileQoSUpdate) {
        if update.storage_unit.is_some() {
            self.storage_unit = update.storage_unit.clone();
        }
    }

    /// The pool an abort diagnostic should name.
    pub fn principal_pool(&self) -> Option<&str> {
        self.parent.as_deref().or_else(|| self.source.selected())
    }

    pub fn add_source_to_tried(&mut self) {
        if let Some(source) = self.source.selected() {
            self.tried.insert(source.to_string());
        }
    }

    pub fn add_target_to_tried(&mut self) {
        if let Some(target) = self.target.selected() {
            self.tried.insert(target.to_string());
        }
    }

    pub fn reset_source_and_target(&mut self) {
        self.source.clear();
        self.target.clear();
    }
}
