//! Replica verification and repair-decision engine for QoS-managed storage
//! pools.
//!
//! Files in a QoS-managed system carry requirements: how many persistent
//! disk replicas and how many tape copies must exist. This crate decides,
//! for a stream of file updates and pool scans, which single corrective
//! action to take next for each file; requests replica copies, cachings,
//! promotions, flushes, and stagings from an external adjuster; and tracks
//! each file's operation through retries to completion or abort.
//!
//! The entry point is [`handler::VerifyOperationHandler`]: feed it
//! [`handler::VerifierEvent`]s via the channel returned by
//! [`handler::VerifyOperationHandler::spawn`], or call its `handle_*`
//! methods directly. The decision core lives in
//! [`verifier::FileStatusVerifier`]; everything that crosses a service
//! boundary is a trait in [`services`].

pub mod counters;
pub mod error;
pub mod handler;
pub mod history;
pub mod locations;
pub mod operation;
pub mod operation_map;
pub mod pool_info;
pub mod probe;
pub mod scan_records;
pub mod selector;
pub mod services;
pub mod types;
pub mod verifier;

pub use error::{AdjustmentError, FailureType, VerifyError};
pub use handler::{VerifierConfig, VerifierEvent, VerifyOperationHandler};
pub use operation::{SelectedPool, VerifyOperation, VerifyOperationState};
pub use services::{
    ActionCompletedListener, Adjuster, Alarm, AlarmSink, PoolStatusClient, ReplicaProbe,
    RequirementsService,
};
pub use types::{
    AdjustmentRequest, AdjustmentResponse, AdjustmentStatus, FileAttributes, FileId,
    FileQoSRequirements, FileQoSUpdate, QoSAction, QoSMessageType, ReplicaStatus,
    ScanVerificationRequest,
};
