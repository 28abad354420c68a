//! Value types exchanged between the verifier and its collaborators.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AdjustmentError;

/// Opaque namespace identifier for a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The single corrective action a verification pass can request.
///
/// Every pass yields exactly one of these; the notify variants are terminal
/// diagnoses rather than adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QoSAction {
    Void,
    WaitForStage,
    NotifyMissing,
    NotifyInaccessible,
    NotifyOutOfSync,
    PoolSelectionFailure,
    Flush,
    UnsetPreciousReplica,
    CacheReplica,
    PersistReplica,
    CopyReplica,
}

impl QoSAction {
    /// Actions that are dispatched to the adjuster rather than resolved
    /// locally.
    pub fn is_adjustment(self) -> bool {
        matches!(
            self,
            Self::WaitForStage
                | Self::Flush
                | Self::UnsetPreciousReplica
                | Self::CacheReplica
                | Self::PersistReplica
                | Self::CopyReplica
        )
    }
}

impl fmt::Display for QoSAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Origin of a verification update. Routing is a closed enumeration; there is
/// no reflective dispatch on message classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoSMessageType {
    AddCacheLocation,
    ClearCacheLocation,
    CorruptFile,
    QosModified,
    PoolStatusUp,
    PoolStatusDown,
    SystemScan,
    ValidateOnly,
}

impl QoSMessageType {
    /// Updates produced by batch pool or system scans.
    pub fn is_scan(self) -> bool {
        matches!(
            self,
            Self::PoolStatusUp | Self::PoolStatusDown | Self::SystemScan
        )
    }
}

/// Namespace-reported attributes of a file, as seen at the start of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// Pools the namespace lists as holding a disk replica.
    pub disk_locations: Vec<String>,
    /// Tape-location URIs, e.g. `osm://main/?store=x`.
    pub tape_locations: Vec<String>,
    pub storage_class: String,
    pub hsm: String,
    /// Flagged stored-on-tape even when no URI list is present (legacy files).
    pub stored: bool,
}

impl FileAttributes {
    /// The storage unit the file belongs to, `class@hsm`.
    pub fn storage_unit(&self) -> String {
        format!("{}@{}", self.storage_class, self.hsm)
    }

    /// HSM instances eligible as flush authorities for this file. Taken from
    /// the tape URI authorities when present, else the declared hsm type.
    pub fn tape_instances(&self) -> BTreeSet<String> {
        if self.tape_locations.is_empty() {
            return BTreeSet::from([self.hsm.clone()]);
        }
        self.tape_locations
            .iter()
            .filter_map(|uri| uri_authority(uri))
            .collect()
    }
}

fn uri_authority(uri: &str) -> Option<String> {
    let rest = uri.split_once("://")?.1;
    let authority = rest.split(['/', '?']).next()?;
    if authority.is_empty() {
        None
    } else {
        Some(authority.to_string())
    }
}

/// Immutable per-pass snapshot of what QoS requires for a file.
///
/// `required_disk` may be raised transiently by the decision core when the
/// parent pool is draining; the snapshot is never written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQoSRequirements {
    pub file: FileId,
    pub required_disk: usize,
    pub required_tape: usize,
    pub attributes: FileAttributes,
    /// Pool-tag keys used as diversity constraints (one replica per distinct
    /// value combination).
    pub partition_keys: BTreeSet<String>,
}

/// An update event entering the operation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQoSUpdate {
    pub file: FileId,
    /// Pool the update originated from, when there is one.
    pub pool: Option<String>,
    pub message_type: QoSMessageType,
    /// Storage-unit filter carried by scan-triggered updates; files whose
    /// unit does not match are skipped.
    pub storage_unit: Option<String>,
}

impl FileQoSUpdate {
    pub fn new(file: FileId, message_type: QoSMessageType) -> Self {
        Self {
            file,
            pool: None,
            message_type,
            storage_unit: None,
        }
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn with_storage_unit(mut self, unit: impl Into<String>) -> Self {
        self.storage_unit = Some(unit.into());
        self
    }
}

/// Batch verification request from the scanner for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanVerificationRequest {
    pub pool: String,
    pub message_type: QoSMessageType,
    pub storage_unit: Option<String>,
    pub files: Vec<FileId>,
}

/// Per-pool replica state as reported by the pool itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub pool: String,
    pub exists: bool,
    /// The replica can currently serve reads.
    pub readable: bool,
    /// Protected from cache eviction (system sticky bit).
    pub sticky: bool,
    /// Not yet confirmed flushed to tape.
    pub precious: bool,
    pub removable: bool,
    pub broken: bool,
}

impl ReplicaStatus {
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            exists: false,
            readable: false,
            sticky: false,
            precious: false,
            removable: false,
            broken: false,
        }
    }
}

/// Adjustment request handed to the adjuster service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub action: QoSAction,
    pub file: FileId,
    pub attributes: FileAttributes,
    pub pool_group: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
}

/// Outcome of an adjustment, reported asynchronously by the adjuster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentStatus {
    Failed,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentResponse {
    pub file: FileId,
    pub status: AdjustmentStatus,
    pub error: Option<AdjustmentError>,
}
