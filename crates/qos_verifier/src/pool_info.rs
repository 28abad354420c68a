//! Pool and pool-group topology view.
//!
//! Read-heavy: classification reads it on every pass while pool-status and
//! exclusion events apply occasional writes. No caller holds the lock across
//! a pass; every method copies what it needs out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Operational mode of a pool, as reported by pool-status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolMode {
    Enabled,
    ReadOnly,
    /// Readable but being emptied; never a write target, and files whose
    /// parent is draining get an extra replica forced.
    Draining,
    Down,
}

/// Static and dynamic state tracked per pool.
#[derive(Debug, Clone)]
pub struct PoolInformation {
    pub mode: PoolMode,
    /// Manually excluded from QoS operations by an admin.
    pub excluded: bool,
    pub tags: BTreeMap<String, String>,
    /// HSM instances this pool is attached to; empty for disk-only pools.
    pub hsm_instances: BTreeSet<String>,
}

impl Default for PoolInformation {
    fn default() -> Self {
        Self {
            mode: PoolMode::Enabled,
            excluded: false,
            tags: BTreeMap::new(),
            hsm_instances: BTreeSet::new(),
        }
    }
}

impl PoolInformation {
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_hsm(mut self, instance: &str) -> Self {
        self.hsm_instances.insert(instance.to_string());
        self
    }

    pub fn with_mode(mut self, mode: PoolMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Default)]
struct PoolGroupInfo {
    primary: bool,
    pools: BTreeSet<String>,
    storage_units: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Topology {
    pools: BTreeMap<String, PoolInformation>,
    groups: BTreeMap<String, PoolGroupInfo>,
}

impl Topology {
    fn viable(&self, pool: &str, writable: bool) -> bool {
        let Some(info) = self.pools.get(pool) else {
            return false;
        };
        match info.mode {
            PoolMode::Down => false,
            PoolMode::ReadOnly | PoolMode::Draining => !writable,
            PoolMode::Enabled => !(writable && info.excluded),
        }
    }

    /// The one primary group a pool belongs to, if any. A pool in no primary
    /// group, or inconsistently in several, falls back to the system-wide
    /// group (`None`).
    fn effective_group_of(&self, pool: &str) -> Option<String> {
        let mut primaries = self
            .groups
            .iter()
            .filter(|(_, group)| group.primary && group.pools.contains(pool));
        let first = primaries.next()?;
        if primaries.next().is_some() {
            tracing::warn!(pool = %pool, "pool belongs to more than one primary group");
            return None;
        }
        Some(first.0.clone())
    }
}

/// Concurrent-read view of pool viability, group membership, and HSM backing.
///
/// A pool group of `None` everywhere below means the system-wide group of all
/// pools; a `Some` group is a primary group the operation is scoped to.
#[derive(Debug, Default)]
pub struct PoolInfoMap {
    inner: RwLock<Topology>,
}

impl PoolInfoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pool(&self, name: &str, info: PoolInformation) {
        let mut topo = self.inner.write().expect("pool info poisoned");
        topo.pools.insert(name.to_string(), info);
    }

    pub fn add_group(&self, name: &str, primary: bool) {
        let mut topo = self.inner.write().expect("pool info poisoned");
        topo.groups.entry(name.to_string()).or_default().primary = primary;
    }

    pub fn add_pool_to_group(&self, pool: &str, group: &str) {
        let mut topo = self.inner.write().expect("pool info poisoned");
        topo.groups
            .entry(group.to_string())
            .or_default()
            .pools
            .insert(pool.to_string());
    }

    pub fn link_storage_unit(&self, unit: &str, group: &str) {
        let mut topo = self.inner.write().expect("pool info poisoned");
        topo.groups
            .entry(group.to_string())
            .or_default()
            .storage_units
            .insert(unit.to_string());
    }

    pub fn set_pool_mode(&self, pool: &str, mode: PoolMode) {
        let mut topo = self.inner.write().expect("pool info poisoned");
        if let Some(info) = topo.pools.get_mut(pool) {
            info.mode = mode;
        }
    }

    /// Applies an admin exclusion change from the scanner.
    pub fn set_excluded(&self, pool: &str, excluded: bool) {
        let mut topo = self.inner.write().expect("pool info poisoned");
        if let Some(info) = topo.pools.get_mut(pool) {
            info.excluded = excluded;
        }
    }

    pub fn is_pool_viable(&self, pool: &str, writable: bool) -> bool {
        self.inner
            .read()
            .expect("pool info poisoned")
            .viable(pool, writable)
    }

    pub fn is_pool_draining(&self, pool: &str) -> bool {
        let topo = self.inner.read().expect("pool info poisoned");
        topo.pools
            .get(pool)
            .is_some_and(|info| info.mode == PoolMode::Draining)
    }

    /// Subset of `locations` the topology believes are up and serving reads.
    pub fn readable_locations(&self, locations: &[String]) -> BTreeSet<String> {
        let topo = self.inner.read().expect("pool info poisoned");
        locations
            .iter()
            .filter(|pool| topo.viable(pool, false))
            .cloned()
            .collect()
    }

    /// Intersection of `locations` with the group's membership; the system
    /// group contains everything.
    pub fn member_locations(&self, group: Option<&str>, locations: &[String]) -> BTreeSet<String> {
        let Some(group) = group else {
            return locations.iter().cloned().collect();
        };
        let topo = self.inner.read().expect("pool info poisoned");
        let Some(info) = topo.groups.get(group) else {
            return BTreeSet::new();
        };
        locations
            .iter()
            .filter(|pool| info.pools.contains(*pool))
            .cloned()
            .collect()
    }

    /// All group members that qualify for reading (or writing).
    pub fn member_pools(&self, group: Option<&str>, writable: bool) -> BTreeSet<String> {
        let topo = self.inner.read().expect("pool info poisoned");
        let members: Vec<&String> = match group {
            None => topo.pools.keys().collect(),
            Some(group) => match topo.groups.get(group) {
                Some(info) => info.pools.iter().collect(),
                None => return BTreeSet::new(),
            },
        };
        members
            .into_iter()
            .filter(|pool| topo.viable(pool, writable))
            .cloned()
            .collect()
    }

    /// Member pools manually excluded by an admin.
    pub fn excluded_location_names(&self, members: &BTreeSet<String>) -> BTreeSet<String> {
        let topo = self.inner.read().expect("pool info poisoned");
        members
            .iter()
            .filter(|pool| topo.pools.get(*pool).is_some_and(|info| info.excluded))
            .cloned()
            .collect()
    }

    /// Writable pools backed by one of `hsms`, scoped to the groups serving
    /// `unit` when a unit filter is present.
    pub fn hsm_pools_for_storage_unit(
        &self,
        unit: Option<&str>,
        hsms: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        let topo = self.inner.read().expect("pool info poisoned");
        let candidates: BTreeSet<&String> = match unit {
            None => topo.pools.keys().collect(),
            Some(unit) => topo
                .groups
                .values()
                .filter(|group| group.storage_units.contains(unit))
                .flat_map(|group| group.pools.iter())
                .collect(),
        };
        candidates
            .into_iter()
            .filter(|pool| {
                topo.pools
                    .get(*pool)
                    .is_some_and(|info| !info.hsm_instances.is_disjoint(hsms))
            })
            .filter(|pool| topo.viable(pool, true))
            .cloned()
            .collect()
    }

    /// The effective pool group for a file, derived from all its current
    /// locations. When the locations agree on a single primary group that
    /// group scopes the operation; any spread beyond one primary group
    /// promotes the file to the system-wide group so that caching and
    /// persisting decisions do not thrash.
    pub fn effective_pool_group(&self, locations: &[String]) -> Option<String> {
        let topo = self.inner.read().expect("pool info poisoned");
        let groups: BTreeSet<Option<String>> = locations
            .iter()
            .map(|pool| topo.effective_group_of(pool))
            .collect();
        if groups.len() != 1 {
            return None;
        }
        groups.into_iter().next().flatten()
    }

    /// Single-pool variant of [`effective_pool_group`](Self::effective_pool_group).
    pub fn effective_pool_group_of(&self, pool: &str) -> Option<String> {
        self.inner
            .read()
            .expect("pool info poisoned")
            .effective_group_of(pool)
    }

    pub fn tags(&self, pool: &str) -> BTreeMap<String, String> {
        let topo = self.inner.read().expect("pool info poisoned");
        topo.pools
            .get(pool)
            .map(|info| info.tags.clone())
            .unwrap_or_default()
    }
}
