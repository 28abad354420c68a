//! Error taxonomy and failure classification.
//!
//! Adjuster failures carry enough structure to decide between retrying with
//! the same pools, retrying with a fresh source or target, and aborting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FileId, QoSAction};

/// Structured failure reported by the adjuster for a dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AdjustmentError {
    #[error("source {0} could not serve the replica")]
    SourceUnavailable(String),
    #[error("target {0} could not accept the replica")]
    TargetUnavailable(String),
    #[error("adjustment failed but may succeed on retry: {0}")]
    Retriable(String),
    #[error("adjustment failed fatally: {0}")]
    Fatal(String),
}

/// Terminal error recorded on an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("requirements could not be fetched for {0}: {1}")]
    Requirements(FileId, String),
    #[error("{0} has no locations in the namespace; file is lost")]
    MissingLocations(FileId),
    #[error("{0} currently has no active locations")]
    InaccessibleFile(FileId),
    #[error("the namespace is not in sync with the pool repositories for {0}")]
    NamespaceOutOfSync(FileId),
    #[error(
        "{file}: could not satisfy requirements; either pools are currently \
         unreachable or the pool group {group} cannot satisfy the requirements"
    )]
    PoolSelectionFailure { file: FileId, group: String },
    #[error("maximum number of attempts ({max_retries} retries) has been reached: {last}")]
    RetriesExhausted { max_retries: u32, last: String },
    #[error(transparent)]
    Adjustment(#[from] AdjustmentError),
    #[error("adjustment for {0} could not be dispatched: {1}")]
    Dispatch(FileId, String),
}

/// How a failed operation should be handled by post-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Retry after selecting a different copy source.
    NewSource,
    /// Retry after selecting a different target.
    NewTarget,
    /// Retry with the same selection.
    Retriable,
    /// Abort the operation.
    Fatal,
}

/// Classify a terminal error in the context of the action that produced it.
///
/// Source failures only suggest a new source for actions that actually read
/// from one; likewise targets.
pub fn classify_failure(action: QoSAction, error: &VerifyError) -> FailureType {
    match error {
        VerifyError::Adjustment(AdjustmentError::SourceUnavailable(_))
            if matches!(action, QoSAction::CopyReplica | QoSAction::Flush) =>
        {
            FailureType::NewSource
        }
        VerifyError::Adjustment(AdjustmentError::TargetUnavailable(_))
            if matches!(
                action,
                QoSAction::CopyReplica
                    | QoSAction::Flush
                    | QoSAction::CacheReplica
                    | QoSAction::PersistReplica
                    | QoSAction::UnsetPreciousReplica
            ) =>
        {
            FailureType::NewTarget
        }
        VerifyError::Adjustment(AdjustmentError::Retriable(_)) => FailureType::Retriable,
        _ => FailureType::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_failure_on_copy_requests_new_source() {
        let error =
            VerifyError::Adjustment(AdjustmentError::SourceUnavailable("pool-a".to_string()));
        assert_eq!(
            classify_failure(QoSAction::CopyReplica, &error),
            FailureType::NewSource
        );
    }

    #[test]
    fn source_failure_on_cache_is_fatal() {
        let error =
            VerifyError::Adjustment(AdjustmentError::SourceUnavailable("pool-a".to_string()));
        assert_eq!(
            classify_failure(QoSAction::CacheReplica, &error),
            FailureType::Fatal
        );
    }

    #[test]
    fn retriable_failure_keeps_selection() {
        let error = VerifyError::Adjustment(AdjustmentError::Retriable("mover timeout".into()));
        assert_eq!(
            classify_failure(QoSAction::PersistReplica, &error),
            FailureType::Retriable
        );
    }

    #[test]
    fn requirements_failure_is_fatal() {
        let error = VerifyError::Requirements(FileId::from("0000A"), "timeout".into());
        assert_eq!(
            classify_failure(QoSAction::Void, &error),
            FailureType::Fatal
        );
    }
}
