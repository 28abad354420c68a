//! Per-pass classification snapshot and replica-status set filters.
//!
//! A [`VerifiedLocations`] is rebuilt on every verification pass; replica
//! state is racy by nature and must be re-observed, never cached across
//! passes. None of the derived sets are mutated after construction.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::types::{FileId, ReplicaStatus};

/// Tape-location marker for legacy files flagged stored but carrying no URI
/// list.
pub const LEGACY_TAPE_PLACEHOLDER: &str = "legacy-placeholder-location";

/// Disjoint and overlapping named location sets for one file, derived from
/// the probe results and the topology view.
#[derive(Debug)]
pub struct VerifiedLocations {
    pub file: FileId,
    /// Confirmed tape copies (URIs, or the legacy placeholder).
    pub tape_locations: BTreeSet<String>,
    /// Everything the namespace lists as a disk location.
    pub disk_locations: BTreeSet<String>,
    /// Raw per-pool probe responses.
    pub replica_status: Vec<ReplicaStatus>,
    /// Locations the topology view believes are up and serving.
    pub readable: BTreeSet<String>,
    /// Readable locations whose probe confirms physical existence.
    pub exist: BTreeSet<String>,
    /// Probed locations flagged broken.
    pub broken: BTreeSet<String>,
    /// exist minus broken.
    pub viable: BTreeSet<String>,
    /// Viable, sticky, and not admin-excluded; counts toward the disk
    /// requirement.
    pub persistent: BTreeSet<String>,
    /// Namespace locations belonging to the operation's pool group.
    pub members: BTreeSet<String>,
    /// exist plus unreachable-but-namespace-listed members; keeps pool
    /// selection from picking a target that is secretly occupied.
    pub occupied: BTreeSet<String>,
    /// Viable but not sticky.
    pub cached: BTreeSet<String>,
    /// Sticky replicas on admin-excluded member pools. Not eviction or copy
    /// candidates, but still counted toward satisfying the requirement.
    pub excluded: BTreeSet<String>,
    /// Viable replicas not yet confirmed flushed to tape.
    pub precious: BTreeSet<String>,
    hsm: OnceLock<BTreeSet<String>>,
}

impl VerifiedLocations {
    pub fn new(file: FileId) -> Self {
        Self {
            file,
            tape_locations: BTreeSet::new(),
            disk_locations: BTreeSet::new(),
            replica_status: Vec::new(),
            readable: BTreeSet::new(),
            exist: BTreeSet::new(),
            broken: BTreeSet::new(),
            viable: BTreeSet::new(),
            persistent: BTreeSet::new(),
            members: BTreeSet::new(),
            occupied: BTreeSet::new(),
            cached: BTreeSet::new(),
            excluded: BTreeSet::new(),
            precious: BTreeSet::new(),
            hsm: OnceLock::new(),
        }
    }

    /// Eligible HSM flush targets, computed at most once per pass.
    pub fn hsm_candidates(&self, compute: impl FnOnce() -> BTreeSet<String>) -> &BTreeSet<String> {
        self.hsm.get_or_init(compute)
    }
}

fn with_flag(
    subset: &BTreeSet<String>,
    status: &[ReplicaStatus],
    flag: fn(&ReplicaStatus) -> bool,
) -> BTreeSet<String> {
    status
        .iter()
        .filter(|s| flag(s) && subset.contains(&s.pool))
        .map(|s| s.pool.clone())
        .collect()
}

/// Subset of `subset` whose probe confirms the replica exists.
pub fn confirmed_existing(subset: &BTreeSet<String>, status: &[ReplicaStatus]) -> BTreeSet<String> {
    with_flag(subset, status, |s| s.exists)
}

/// Subset of `subset` confirmed sticky.
pub fn sticky(subset: &BTreeSet<String>, status: &[ReplicaStatus]) -> BTreeSet<String> {
    with_flag(subset, status, |s| s.sticky)
}

/// Subset of `subset` confirmed precious.
pub fn precious(subset: &BTreeSet<String>, status: &[ReplicaStatus]) -> BTreeSet<String> {
    with_flag(subset, status, |s| s.precious)
}

/// Subset of `subset` whose replica can actually serve reads right now;
/// excludes replicas still being written or staged.
pub fn strictly_readable(subset: &BTreeSet<String>, status: &[ReplicaStatus]) -> BTreeSet<String> {
    with_flag(subset, status, |s| s.readable)
}

/// Subset of `subset` the pool reports removable.
pub fn removable(subset: &BTreeSet<String>, status: &[ReplicaStatus]) -> BTreeSet<String> {
    with_flag(subset, status, |s| s.removable)
}

/// All probed locations flagged broken.
pub fn broken(status: &[ReplicaStatus]) -> BTreeSet<String> {
    status
        .iter()
        .filter(|s| s.broken)
        .map(|s| s.pool.clone())
        .collect()
}

pub fn is_removable(pool: &str, status: &[ReplicaStatus]) -> bool {
    status.iter().any(|s| s.pool == pool && s.removable)
}
