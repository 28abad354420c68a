//! Replica eviction, promotion, and copy source/target selection.
//!
//! Selection is deterministic for identical inputs: candidate sets are
//! ordered, and ties are broken by taking the first qualifying pool. Tag
//! partitioning uses pool tags as discriminator keys; at most one replica
//! should occupy each distinct combination of partition-key values.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;

use crate::pool_info::PoolInfoMap;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct LocationSelectionError {
    pub reason: String,
}

impl LocationSelectionError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Chooses which replica to evict or promote and which pools to copy between.
pub struct LocationSelector {
    pool_info: Arc<PoolInfoMap>,
}

impl LocationSelector {
    pub fn new(pool_info: Arc<PoolInfoMap>) -> Self {
        Self { pool_info }
    }

    /// Pick a persistent replica to demote to cached when there are too many.
    /// Prefers replicas the pools already report removable, and among those a
    /// replica whose partition signature duplicates another persistent one.
    pub fn select_target_to_cache(
        &self,
        persistent: &BTreeSet<String>,
        removable: &BTreeSet<String>,
        partition_keys: &BTreeSet<String>,
    ) -> Result<String, LocationSelectionError> {
        let candidates = if removable.is_empty() {
            persistent
        } else {
            removable
        };
        if candidates.is_empty() {
            return Err(LocationSelectionError::new(
                "no persistent replica is eligible for caching",
            ));
        }
        if let Some(redundant) = self
            .extractor(partition_keys)
            .redundant_among(candidates, persistent)
        {
            return Ok(redundant);
        }
        Ok(candidates.iter().next().cloned().expect("non-empty"))
    }

    /// Pick a cached replica that can be promoted to persistent in place,
    /// avoiding a copy. Returns `None` when no cached replica adds any
    /// partition diversity the persistent set does not already have.
    pub fn select_target_to_persist(
        &self,
        persistent: &BTreeSet<String>,
        cached: &BTreeSet<String>,
        partition_keys: &BTreeSet<String>,
    ) -> Option<String> {
        if partition_keys.is_empty() {
            return cached.iter().next().cloned();
        }
        let occupied = self.signatures_of(persistent, partition_keys);
        cached
            .iter()
            .find(|pool| !occupied.contains(&self.signature_of(pool, partition_keys)))
            .cloned()
    }

    /// Pick a pool to copy a new replica onto: a writable group member that
    /// is neither occupied nor already tried, preferring partition diversity.
    pub fn select_copy_target(
        &self,
        group: Option<&str>,
        occupied: &BTreeSet<String>,
        tried: &BTreeSet<String>,
        partition_keys: &BTreeSet<String>,
    ) -> Result<String, LocationSelectionError> {
        let members = self.pool_info.member_pools(group, true);
        let candidates: BTreeSet<String> = members
            .into_iter()
            .filter(|pool| !occupied.contains(pool) && !tried.contains(pool))
            .collect();
        if candidates.is_empty() {
            return Err(LocationSelectionError::new(format!(
                "no writable pool is available in group {}",
                group.unwrap_or("<system>")
            )));
        }
        if !partition_keys.is_empty() {
            let used = self.signatures_of(occupied, partition_keys);
            if let Some(diverse) = candidates
                .iter()
                .find(|pool| !used.contains(&self.signature_of(pool, partition_keys)))
            {
                return Ok(diverse.clone());
            }
        }
        Ok(candidates.iter().next().cloned().expect("non-empty"))
    }

    /// Pick a replica to copy from among the strictly readable locations.
    pub fn select_copy_source(
        &self,
        readable: &BTreeSet<String>,
        tried: &BTreeSet<String>,
    ) -> Result<String, LocationSelectionError> {
        readable
            .iter()
            .find(|pool| !tried.contains(*pool))
            .cloned()
            .ok_or_else(|| LocationSelectionError::new("no untried readable source is available"))
    }

    pub fn extractor<'a>(
        &'a self,
        partition_keys: &'a BTreeSet<String>,
    ) -> EvictingLocationExtractor<'a> {
        EvictingLocationExtractor {
            pool_info: &self.pool_info,
            partition_keys,
        }
    }

    fn signature_of(&self, pool: &str, partition_keys: &BTreeSet<String>) -> Vec<String> {
        signature(&self.pool_info.tags(pool), partition_keys)
    }

    fn signatures_of(
        &self,
        pools: &BTreeSet<String>,
        partition_keys: &BTreeSet<String>,
    ) -> BTreeSet<Vec<String>> {
        pools
            .iter()
            .map(|pool| self.signature_of(pool, partition_keys))
            .collect()
    }
}

/// Finds replicas made redundant by the tag-partitioning constraints.
pub struct EvictingLocationExtractor<'a> {
    pool_info: &'a PoolInfoMap,
    partition_keys: &'a BTreeSet<String>,
}

impl EvictingLocationExtractor<'_> {
    /// A persistent replica whose partition signature is already covered by
    /// an earlier replica, if any. A singleton always satisfies every
    /// equivalence relation, so fewer than two replicas never yields one.
    pub fn find_location_to_evict(&self, persistent: &BTreeSet<String>) -> Option<String> {
        self.redundant_among(persistent, persistent)
    }

    fn redundant_among(
        &self,
        candidates: &BTreeSet<String>,
        universe: &BTreeSet<String>,
    ) -> Option<String> {
        if universe.len() < 2 || self.partition_keys.is_empty() {
            return None;
        }
        let mut seen: BTreeSet<Vec<String>> = BTreeSet::new();
        let mut redundant: Option<String> = None;
        for pool in universe {
            let sig = signature(&self.pool_info.tags(pool), self.partition_keys);
            if !seen.insert(sig) && redundant.is_none() && candidates.contains(pool) {
                redundant = Some(pool.clone());
            }
        }
        redundant
    }
}

fn signature(tags: &BTreeMap<String, String>, partition_keys: &BTreeSet<String>) -> Vec<String> {
    partition_keys
        .iter()
        .map(|key| tags.get(key).cloned().unwrap_or_default())
        .collect()
}
