//! The decision core: classifies a file's replicas and selects the single
//! next corrective action.
//!
//! Verification for one file is never run concurrently, and repeated calls
//! against an unchanged world return the same action. Counts are always
//! recomputed from a fresh classification, never cached across passes.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::locations::{self, VerifiedLocations, LEGACY_TAPE_PLACEHOLDER};
use crate::operation::{SelectedPool, VerifyOperation};
use crate::pool_info::PoolInfoMap;
use crate::selector::{LocationSelectionError, LocationSelector};
use crate::services::ReplicaProbe;
use crate::types::{FileQoSRequirements, QoSAction, QoSMessageType};

pub struct FileStatusVerifier {
    pool_info: Arc<PoolInfoMap>,
    probe: Arc<dyn ReplicaProbe>,
    selector: LocationSelector,
}

impl FileStatusVerifier {
    pub fn new(pool_info: Arc<PoolInfoMap>, probe: Arc<dyn ReplicaProbe>) -> Self {
        let selector = LocationSelector::new(pool_info.clone());
        Self {
            pool_info,
            probe,
            selector,
        }
    }

    /// Run one verification pass and return the next action.
    ///
    /// The requirements snapshot may be adjusted transiently (draining
    /// parent); the operation's selection fields, pool group, and needed
    /// flag are the only operation state written.
    pub async fn verify(
        &self,
        requirements: &mut FileQoSRequirements,
        operation: &mut VerifyOperation,
    ) -> QoSAction {
        // A draining parent with a non-zero disk requirement forces one
        // replacement copy before the drain completes. The parent stays
        // readable, so it does not need to be pinned as the source.
        if let Some(parent) = operation.parent.clone() {
            if self.pool_info.is_pool_draining(&parent) && requirements.required_disk > 0 {
                requirements.required_disk += 1;
            }
        }

        let verified = self
            .classify_locations(requirements, operation.pool_group.as_deref())
            .await;

        if requirements.required_disk > 0 {
            if let Some(action) = self.check_empty_disk_locations(requirements, &verified, operation)
            {
                return action;
            }
            if let Some(action) = check_namespace_sync(&verified) {
                return action;
            }
            if let Some(action) = self.check_inaccessible(requirements, &verified, operation) {
                return action;
            }
        }

        // A file that is new or reported corrupt may not have its tape URI
        // assigned yet; acting on the HSM state of such a file would race the
        // flush pipeline.
        let verify_hsm = !matches!(
            operation.message_type,
            QoSMessageType::AddCacheLocation | QoSMessageType::CorruptFile
        );
        if verify_hsm {
            if let Some(action) = self.check_flush(requirements, &verified, operation) {
                return action;
            }
        }

        if verified.disk_locations.is_empty() {
            if requirements.required_tape == 0 {
                // disk-only file with nothing on disk: lost
                return QoSAction::NotifyMissing;
            }
            // tape-resident file currently absent from disk is not an error
            return QoSAction::Void;
        }

        if let Some(action) = self.check_cache(requirements, &verified, operation, verify_hsm) {
            return action;
        }
        if let Some(action) = self.check_evictions(requirements, &verified, operation) {
            return action;
        }
        if let Some(action) = self.check_adjustment(requirements, &verified, operation) {
            return action;
        }

        operation.needed = 0;
        QoSAction::Void
    }

    /// Build the per-pass location snapshot (steps 1-14 of the
    /// classification contract).
    async fn classify_locations(
        &self,
        requirements: &FileQoSRequirements,
        pool_group: Option<&str>,
    ) -> VerifiedLocations {
        let file = requirements.file.clone();
        let mut verified = VerifiedLocations::new(file.clone());

        let mut tape: BTreeSet<String> = requirements
            .attributes
            .tape_locations
            .iter()
            .cloned()
            .collect();
        if tape.is_empty() && requirements.attributes.stored {
            tape.insert(LEGACY_TAPE_PLACEHOLDER.to_string());
        }
        verified.tape_locations = tape;

        let disk = &requirements.attributes.disk_locations;
        verified.disk_locations = disk.iter().cloned().collect();
        if disk.is_empty() {
            // nothing to classify; all derived sets stay empty
            return verified;
        }

        let status = self.probe.verify_locations(&file, disk).await;
        let readable = self.pool_info.readable_locations(disk);
        let exist = locations::confirmed_existing(&readable, &status);
        let broken = locations::broken(&status);
        let viable: BTreeSet<String> = exist.difference(&broken).cloned().collect();
        let persistent_raw = locations::sticky(&viable, &status);
        let members = self.pool_info.member_locations(pool_group, disk);

        // Re-admit unreachable but namespace-listed members so that target
        // selection never picks a pool that secretly holds a replica.
        let offline: BTreeSet<String> = members.difference(&readable).cloned().collect();
        verified.occupied = exist.union(&offline).cloned().collect();

        verified.cached = viable.difference(&persistent_raw).cloned().collect();
        let excluded = locations::sticky(&self.pool_info.excluded_location_names(&members), &status);
        verified.persistent = persistent_raw.difference(&excluded).cloned().collect();
        verified.precious = locations::precious(&viable, &status);

        tracing::debug!(file = %file, readable = ?readable, exist = ?exist,
            persistent = ?verified.persistent, excluded = ?excluded,
            "classified locations");

        verified.readable = readable;
        verified.exist = exist;
        verified.broken = broken;
        verified.viable = viable;
        verified.members = members;
        verified.excluded = excluded;
        verified.replica_status = status;
        verified
    }

    /// All the namespace locations for the file are gone. Stage if the file
    /// is on tape and required on disk; otherwise it is lost.
    fn check_empty_disk_locations(
        &self,
        requirements: &FileQoSRequirements,
        verified: &VerifiedLocations,
        operation: &mut VerifyOperation,
    ) -> Option<QoSAction> {
        if !verified.disk_locations.is_empty() {
            return None;
        }
        if should_try_to_stage(requirements, verified) {
            operation.needed = 1;
            return Some(QoSAction::WaitForStage);
        }
        Some(QoSAction::NotifyMissing)
    }

    /// No readable-and-unbroken replica anywhere. Stage if possible, else
    /// flag for the operator.
    fn check_inaccessible(
        &self,
        requirements: &FileQoSRequirements,
        verified: &VerifiedLocations,
        operation: &mut VerifyOperation,
    ) -> Option<QoSAction> {
        if !verified.viable.is_empty() {
            return None;
        }
        if should_try_to_stage(requirements, verified) {
            operation.needed = 1;
            return Some(QoSAction::WaitForStage);
        }
        Some(QoSAction::NotifyInaccessible)
    }

    /// Fewer confirmed tape copies than required: arrange a flush.
    fn check_flush(
        &self,
        requirements: &FileQoSRequirements,
        verified: &VerifiedLocations,
        operation: &mut VerifyOperation,
    ) -> Option<QoSAction> {
        let current = verified.tape_locations.len();
        if current >= requirements.required_tape {
            return None;
        }
        let missing_tape = requirements.required_tape - current;

        let sources = &verified.viable;
        if sources.is_empty() {
            if current == 0 {
                return Some(QoSAction::NotifyMissing);
            }
            // pools holding the cached copies are down; stage a tape copy
            return Some(QoSAction::WaitForStage);
        }

        let targets = self.find_hsm_locations(requirements, verified, operation);
        if targets.is_empty() {
            // misconfiguration, but other checks may still produce useful
            // work for this transition
            tracing::warn!(file = %requirements.file,
                "file should be flushed but no HSM-backed location is available");
            return None;
        }

        let precious_on_hsm = verified.precious.intersection(targets).count();
        if precious_on_hsm >= missing_tape {
            return None;
        }

        // Prefer a viable not-yet-precious replica already sitting on a
        // flush target, so the flush happens in place.
        let in_place = sources
            .difference(&verified.precious)
            .find(|pool| targets.contains(*pool))
            .cloned();
        let source = in_place
            .clone()
            .or_else(|| sources.iter().next().cloned())?;
        let target = in_place.or_else(|| targets.iter().next().cloned())?;

        tracing::debug!(file = %requirements.file, source = %source, target = %target,
            "requesting flush");
        operation.source = SelectedPool::Selected(source);
        operation.target = SelectedPool::Selected(target);
        operation.needed = 1;
        Some(QoSAction::Flush)
    }

    /// Demote stranded precious replicas, then handle the zero-requirement
    /// case.
    fn check_cache(
        &self,
        requirements: &FileQoSRequirements,
        verified: &VerifiedLocations,
        operation: &mut VerifyOperation,
        verify_hsm: bool,
    ) -> Option<QoSAction> {
        if verify_hsm {
            // Precious replicas that needed to reach tape were handled by the
            // flush check; anything precious on a non-HSM pool is stranded
            // and blocks further decisions until demoted.
            let hsm_pools = self.find_hsm_locations(requirements, verified, operation);
            if let Some(target) = verified.precious.difference(hsm_pools).next() {
                tracing::debug!(file = %requirements.file, target = %target,
                    "precious replica found on non-HSM pool; caching it");
                operation.target = SelectedPool::Selected(target.clone());
                operation.needed = 1;
                return Some(QoSAction::UnsetPreciousReplica);
            }
        }

        if requirements.required_disk == 0 {
            if let Some(target) = verified.persistent.iter().next() {
                tracing::debug!(file = %requirements.file, target = %target,
                    "no persistent replicas required; caching first sticky replica");
                operation.target = SelectedPool::Selected(target.clone());
                operation.needed = 1;
                return Some(QoSAction::CacheReplica);
            }
            operation.needed = 0;
            return Some(QoSAction::Void);
        }

        None
    }

    fn check_evictions(
        &self,
        requirements: &FileQoSRequirements,
        verified: &VerifiedLocations,
        operation: &mut VerifyOperation,
    ) -> Option<QoSAction> {
        if let Some(action) = self.check_group_change(verified, operation) {
            return Some(action);
        }
        self.check_tag_change(requirements, verified, operation)
    }

    /// The operation is scoped to a primary pool group. Replicas that have
    /// drifted onto pools outside that group are evicted so new copies land
    /// inside it, but never below two persistent replicas.
    fn check_group_change(
        &self,
        verified: &VerifiedLocations,
        operation: &mut VerifyOperation,
    ) -> Option<QoSAction> {
        let group = operation.pool_group.clone()?;

        // All locations have left the group: the pools were moved out or
        // removed, which indicates a deliberate drain. Take no action on the
        // remaining replicas.
        if verified.members.is_empty() {
            operation.needed = 0;
            return Some(QoSAction::Void);
        }

        if verified.persistent.len() < 2 {
            return None;
        }
        for pool in &verified.persistent {
            if self.pool_info.effective_pool_group_of(pool).as_deref() != Some(group.as_str()) {
                tracing::debug!(file = %verified.file, target = %pool, group = %group,
                    "evicting replica after pool group change");
                operation.target = SelectedPool::Selected(pool.clone());
                operation.needed = 1;
                return Some(QoSAction::CacheReplica);
            }
        }
        None
    }

    /// Pool tags or storage-class constraints changed; evict one now
    /// redundant replica at a time. Never targets the last persistent
    /// replica.
    fn check_tag_change(
        &self,
        requirements: &FileQoSRequirements,
        verified: &VerifiedLocations,
        operation: &mut VerifyOperation,
    ) -> Option<QoSAction> {
        if verified.persistent.len() < 2 {
            return None;
        }
        let extractor = self.selector.extractor(&requirements.partition_keys);
        let target = extractor.find_location_to_evict(&verified.persistent)?;
        tracing::debug!(file = %verified.file, target = %target,
            "evicting replica after tag constraint change");
        operation.target = SelectedPool::Selected(target);
        operation.needed = 1;
        Some(QoSAction::CacheReplica)
    }

    /// Final count adjustment: evict a surplus persistent replica, promote a
    /// cached one in place, or copy to a new pool.
    fn check_adjustment(
        &self,
        requirements: &FileQoSRequirements,
        verified: &VerifiedLocations,
        operation: &mut VerifyOperation,
    ) -> Option<QoSAction> {
        let required = requirements.required_disk as i64;
        let mut missing = required - verified.persistent.len() as i64;

        // Excluded sticky replicas still count toward satisfying the
        // requirement, even though they are not eviction or copy candidates.
        // Caching in that state would decrease already deficient locations.
        if missing > 0 {
            missing -= verified.excluded.len() as i64;
            missing = missing.max(0);
        }
        operation.needed = missing.unsigned_abs() as usize;

        tracing::debug!(file = %requirements.file, required, missing,
            excluded = verified.excluded.len(), "final location adjustment");

        match self.resolve_adjustment(missing, requirements, verified, operation) {
            Ok(action) => Some(action),
            Err(err) => {
                tracing::debug!(file = %requirements.file,
                    group = ?operation.pool_group, error = %err,
                    "location selection failed");
                Some(QoSAction::PoolSelectionFailure)
            }
        }
    }

    fn resolve_adjustment(
        &self,
        missing: i64,
        requirements: &FileQoSRequirements,
        verified: &VerifiedLocations,
        operation: &mut VerifyOperation,
    ) -> Result<QoSAction, LocationSelectionError> {
        use std::cmp::Ordering;

        match missing.cmp(&0) {
            Ordering::Less => {
                // Too many persistent replicas. A preset target is honored
                // when it is still writable and confirmed removable.
                let preset = operation.target.selected().and_then(|target| {
                    let keep = self.pool_info.is_pool_viable(target, true)
                        && locations::is_removable(target, &verified.replica_status);
                    keep.then(|| target.to_string())
                });
                let target = match preset {
                    Some(target) => target,
                    None => {
                        let removable =
                            locations::removable(&verified.persistent, &verified.replica_status);
                        self.selector.select_target_to_cache(
                            &verified.persistent,
                            &removable,
                            &requirements.partition_keys,
                        )?
                    }
                };
                operation.target = SelectedPool::Selected(target);
                Ok(QoSAction::CacheReplica)
            }
            Ordering::Greater => {
                let viable_source = operation.source.selected().and_then(|source| {
                    self.pool_info
                        .is_pool_viable(source, false)
                        .then(|| source.to_string())
                });

                // Promote an existing cached replica to sticky in place
                // rather than copying, whenever possible. The pool group may
                // have changed, so only cached copies still inside the group
                // and not already tried qualify; a pinned source that is
                // itself promotable is the first choice.
                let cached_members: BTreeSet<String> = verified
                    .cached
                    .intersection(&verified.members)
                    .filter(|pool| !operation.tried.contains(*pool))
                    .cloned()
                    .collect();
                if let Some(source) = viable_source.clone() {
                    if cached_members.contains(&source) {
                        operation.target = SelectedPool::Selected(source);
                        return Ok(QoSAction::PersistReplica);
                    }
                }
                if let Some(target) = self.selector.select_target_to_persist(
                    &verified.persistent,
                    &cached_members,
                    &requirements.partition_keys,
                ) {
                    operation.target = SelectedPool::Selected(target);
                    return Ok(QoSAction::PersistReplica);
                }

                let target = match operation.target.clone() {
                    SelectedPool::Selected(target)
                        if self.pool_info.is_pool_viable(&target, true) =>
                    {
                        target
                    }
                    _ => self.selector.select_copy_target(
                        operation.pool_group.as_deref(),
                        &verified.occupied,
                        &operation.tried,
                        &requirements.partition_keys,
                    )?,
                };

                // viable may include replicas still arriving; copy only from
                // the strictly readable to avoid a failure/retry cycle.
                let readable =
                    locations::strictly_readable(&verified.viable, &verified.replica_status);
                let source = match viable_source {
                    Some(source) => source,
                    None => self
                        .selector
                        .select_copy_source(&readable, &operation.tried)?,
                };

                operation.source = SelectedPool::Selected(source);
                operation.target = SelectedPool::Selected(target);
                Ok(QoSAction::CopyReplica)
            }
            Ordering::Equal => Ok(QoSAction::Void),
        }
    }

    fn find_hsm_locations<'a>(
        &self,
        requirements: &FileQoSRequirements,
        verified: &'a VerifiedLocations,
        operation: &VerifyOperation,
    ) -> &'a BTreeSet<String> {
        verified.hsm_candidates(|| {
            let hsms = requirements.attributes.tape_instances();
            self.pool_info
                .hsm_pools_for_storage_unit(operation.storage_unit.as_deref(), &hsms)
        })
    }
}

/// Readable and existence counts disagree between namespace and pools; this
/// needs an operator, not automatic repair.
fn check_namespace_sync(verified: &VerifiedLocations) -> Option<QoSAction> {
    if verified.readable.len() != verified.exist.len() {
        tracing::debug!(file = %verified.file, readable = verified.readable.len(),
            exist = verified.exist.len(), "namespace and pools are out of sync");
        return Some(QoSAction::NotifyOutOfSync);
    }
    None
}

/// Staging is worthwhile when the file must be on disk and a tape copy
/// exists. Staging is fire-and-forget; the follow-up verification restores
/// the replica count afterwards.
fn should_try_to_stage(
    requirements: &FileQoSRequirements,
    verified: &VerifiedLocations,
) -> bool {
    requirements.required_disk > 0 && !verified.tape_locations.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::pool_info::{PoolInformation, PoolMode};
    use crate::types::{FileAttributes, FileId, FileQoSUpdate, ReplicaStatus};

    struct StaticProbe {
        status: Vec<ReplicaStatus>,
    }

    #[async_trait]
    impl ReplicaProbe for StaticProbe {
        async fn verify_locations(
            &self,
            _file: &FileId,
            locations: &[String],
        ) -> Vec<ReplicaStatus> {
            self.status
                .iter()
                .filter(|s| locations.contains(&s.pool))
                .cloned()
                .collect()
        }
    }

    fn replica(pool: &str) -> ReplicaStatus {
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

    fn sticky_replica(pool: &str) -> ReplicaStatus {
        let mut status = replica(pool);
        status.sticky = true;
        status
    }

    struct Fixture {
        pool_info: Arc<PoolInfoMap>,
        status: Vec<ReplicaStatus>,
        requirements: FileQoSRequirements,
        operation: VerifyOperation,
    }

    impl Fixture {
        fn new(required_disk: usize, required_tape: usize) -> Self {
            Self {
                pool_info: Arc::new(PoolInfoMap::new()),
                status: Vec::new(),
                requirements: FileQoSRequirements {
                    file: FileId::from("0000A"),
                    required_disk,
                    required_tape,
                    attributes: FileAttributes::default(),
                    partition_keys: BTreeSet::new(),
                },
                operation: VerifyOperation::new(&FileQoSUpdate::new(
                    FileId::from("0000A"),
                    QoSMessageType::QosModified,
                )),
            }
        }

        fn pool(self, name: &str, info: PoolInformation) -> Self {
            self.pool_info.add_pool(name, info);
            self
        }

        fn location(mut self, status: ReplicaStatus) -> Self {
            self.requirements
                .attributes
                .disk_locations
                .push(status.pool.clone());
            self.status.push(status);
            self
        }

        fn tape(mut self, uri: &str) -> Self {
            self.requirements.attributes.tape_locations.push(uri.to_string());
            self
        }

        async fn verify(&mut self) -> QoSAction {
            let verifier = FileStatusVerifier::new(
                self.pool_info.clone(),
                Arc::new(StaticProbe {
                    status: self.status.clone(),
                }),
            );
            verifier
                .verify(&mut self.requirements.clone(), &mut self.operation)
                .await
        }
    }

    #[tokio::test]
    async fn void_when_nothing_is_required_and_nothing_persistent() {
        let mut fixture = Fixture::new(0, 0)
            .pool("a", PoolInformation::default())
            .location(replica("a"));
        assert_eq!(fixture.verify().await, QoSAction::Void);
        assert_eq!(fixture.operation.needed, 0);
    }

    #[tokio::test]
    async fn void_when_requirement_is_exactly_met() {
        let mut fixture = Fixture::new(2, 0)
            .pool("a", PoolInformation::default())
            .pool("b", PoolInformation::default())
            .location(sticky_replica("a"))
            .location(sticky_replica("b"));
        assert_eq!(fixture.verify().await, QoSAction::Void);
        assert_eq!(fixture.operation.needed, 0);
    }

    #[tokio::test]
    async fn missing_when_no_locations_anywhere() {
        let mut fixture = Fixture::new(1, 0);
        assert_eq!(fixture.verify().await, QoSAction::NotifyMissing);
    }

    #[tokio::test]
    async fn stage_preferred_over_inaccessible_when_on_tape() {
        let mut fixture = Fixture::new(1, 1)
            .pool("a", PoolInformation::default().with_mode(PoolMode::Down))
            .location(replica("a"))
            .tape("osm://main/?store=exp");
        assert_eq!(fixture.verify().await, QoSAction::WaitForStage);
    }

    #[tokio::test]
    async fn inaccessible_when_nothing_viable_and_no_tape() {
        let mut fixture = Fixture::new(1, 0)
            .pool("a", PoolInformation::default().with_mode(PoolMode::Down))
            .location(replica("a"));
        assert_eq!(fixture.verify().await, QoSAction::NotifyInaccessible);
    }

    #[tokio::test]
    async fn verify_is_idempotent_against_an_unchanged_world() {
        let mut fixture = Fixture::new(2, 0)
            .pool("a", PoolInformation::default())
            .pool("b", PoolInformation::default())
            .location(sticky_replica("a"))
            .location(replica("b"));
        let first = fixture.verify().await;
        let second = fixture.verify().await;
        assert_eq!(first, second);
        assert_eq!(first, QoSAction::PersistReplica);
    }

    #[tokio::test]
    async fn out_of_sync_when_namespace_and_pools_disagree() {
        // namespace lists two readable pools but only one confirms existence
        let mut missing = replica("b");
        missing.exists = false;
        missing.readable = false;
        let mut fixture = Fixture::new(1, 0)
            .pool("a", PoolInformation::default())
            .pool("b", PoolInformation::default())
            .location(replica("a"))
            .location(missing);
        assert_eq!(fixture.verify().await, QoSAction::NotifyOutOfSync);
    }

    #[tokio::test]
    async fn off_group_persistent_replica_is_cached() {
        // scenario: requiredDisk=2, three persistent replicas, one on a pool
        // belonging to a different primary group than the operation's
        let mut fixture = Fixture::new(2, 0)
            .pool("a", PoolInformation::default())
            .pool("b", PoolInformation::default())
            .pool("c", PoolInformation::default())
            .location(sticky_replica("a"))
            .location(sticky_replica("b"))
            .location(sticky_replica("c"));
        fixture.pool_info.add_group("primary1", true);
        fixture.pool_info.add_group("primary2", true);
        fixture.pool_info.add_pool_to_group("a", "primary1");
        fixture.pool_info.add_pool_to_group("b", "primary1");
        fixture.pool_info.add_pool_to_group("c", "primary2");
        fixture.operation.pool_group = Some("primary1".to_string());
        assert_eq!(fixture.verify().await, QoSAction::CacheReplica);
        assert_eq!(fixture.operation.target.selected(), Some("c"));
    }

    #[tokio::test]
    async fn eviction_never_targets_the_last_persistent_replica() {
        let mut fixture = Fixture::new(1, 0)
            .pool("a", PoolInformation::default())
            .location(sticky_replica("a"));
        fixture.pool_info.add_group("primary1", true);
        fixture.pool_info.add_group("primary2", true);
        fixture.pool_info.add_pool_to_group("a", "primary1");
        fixture.pool_info.add_pool_to_group("a", "primary2");
        fixture.operation.pool_group = Some("primary1".to_string());
        // a's effective group is the system group, which differs from the
        // operation's, but a single persistent replica is never evicted
        let action = fixture.verify().await;
        assert_ne!(action, QoSAction::CacheReplica);
    }

    #[tokio::test]
    async fn cached_replica_is_left_alone_when_requirement_met() {
        // scenario: requiredDisk=1, one persistent and one cached replica
        let mut fixture = Fixture::new(1, 0)
            .pool("a", PoolInformation::default())
            .pool("b", PoolInformation::default())
            .location(sticky_replica("a"))
            .location(replica("b"));
        assert_eq!(fixture.verify().await, QoSAction::Void);
    }

    #[tokio::test]
    async fn promotion_is_preferred_over_copy() {
        // scenario: requiredDisk=1, no persistent, one cached viable replica
        let mut fixture = Fixture::new(1, 0)
            .pool("a", PoolInformation::default())
            .location(replica("a"));
        assert_eq!(fixture.verify().await, QoSAction::PersistReplica);
        assert_eq!(fixture.operation.target.selected(), Some("a"));
    }

    #[tokio::test]
    async fn flush_pairs_viable_source_with_hsm_target() {
        // scenario: requiredTape=1, no tape copy, viable non-HSM source,
        // HSM-backed pool available
        let mut fixture = Fixture::new(1, 1)
            .pool("disk1", PoolInformation::default())
            .pool("tape1", PoolInformation::default().with_hsm("osm"))
            .location(sticky_replica("disk1"));
        fixture.requirements.attributes.hsm = "osm".to_string();
        assert_eq!(fixture.verify().await, QoSAction::Flush);
        assert_eq!(fixture.operation.source.selected(), Some("disk1"));
        assert_eq!(fixture.operation.target.selected(), Some("tape1"));
    }

    #[tokio::test]
    async fn missing_hsm_targets_fall_through_with_a_warning() {
        let mut fixture = Fixture::new(1, 1)
            .pool("disk1", PoolInformation::default())
            .location(sticky_replica("disk1"));
        fixture.requirements.attributes.hsm = "osm".to_string();
        // no HSM pool exists; flush is skipped and the disk requirement is
        // already satisfied
        assert_eq!(fixture.verify().await, QoSAction::Void);
    }

    #[tokio::test]
    async fn stranded_precious_replica_is_demoted() {
        let mut precious = sticky_replica("a");
        precious.precious = true;
        let mut fixture = Fixture::new(1, 0)
            .pool("a", PoolInformation::default())
            .location(precious);
        assert_eq!(fixture.verify().await, QoSAction::UnsetPreciousReplica);
        assert_eq!(fixture.operation.target.selected(), Some("a"));
    }

    #[tokio::test]
    async fn zero_requirement_caches_leftover_persistent_replicas() {
        let mut fixture = Fixture::new(0, 0)
            .pool("a", PoolInformation::default())
            .location(sticky_replica("a"));
        assert_eq!(fixture.verify().await, QoSAction::CacheReplica);
        assert_eq!(fixture.operation.target.selected(), Some("a"));
        assert_eq!(fixture.operation.needed, 1);
    }

    #[tokio::test]
    async fn surplus_persistent_replica_is_cached() {
        let mut fixture = Fixture::new(1, 0)
            .pool("a", PoolInformation::default())
            .pool("b", PoolInformation::default())
            .location(sticky_replica("a"))
            .location(sticky_replica("b"));
        assert_eq!(fixture.verify().await, QoSAction::CacheReplica);
        assert!(fixture.operation.target.is_selected());
    }

    #[tokio::test]
    async fn deficit_without_cached_copies_requests_a_copy() {
        let mut fixture = Fixture::new(2, 0)
            .pool("a", PoolInformation::default())
            .pool("spare", PoolInformation::default())
            .location(sticky_replica("a"));
        assert_eq!(fixture.verify().await, QoSAction::CopyReplica);
        assert_eq!(fixture.operation.source.selected(), Some("a"));
        assert_eq!(fixture.operation.target.selected(), Some("spare"));
    }

    #[tokio::test]
    async fn copy_fails_pool_selection_when_no_target_exists() {
        let mut fixture = Fixture::new(2, 0)
            .pool("a", PoolInformation::default())
            .location(sticky_replica("a"));
        assert_eq!(fixture.verify().await, QoSAction::PoolSelectionFailure);
    }

    #[tokio::test]
    async fn excluded_sticky_replicas_still_satisfy_the_requirement() {
        let fixture = Fixture::new(2, 0)
            .pool("a", PoolInformation::default())
            .pool("b", PoolInformation::default())
            .location(sticky_replica("a"))
            .location(sticky_replica("b"));
        fixture.pool_info.set_excluded("b", true);
        let mut fixture = fixture;
        assert_eq!(fixture.verify().await, QoSAction::Void);
    }

    #[tokio::test]
    async fn draining_parent_forces_a_replacement_copy() {
        let mut fixture = Fixture::new(1, 0)
            .pool("a", PoolInformation::default().with_mode(PoolMode::Draining))
            .pool("spare", PoolInformation::default())
            .location(sticky_replica("a"));
        fixture.operation.parent = Some("a".to_string());
        assert_eq!(fixture.verify().await, QoSAction::CopyReplica);
        assert_eq!(fixture.operation.target.selected(), Some("spare"));
    }

    #[tokio::test]
    async fn tag_constraint_change_evicts_a_redundant_replica() {
        let mut fixture = Fixture::new(2, 0)
            .pool("a", PoolInformation::default().with_tag("hostname", "h1"))
            .pool("b", PoolInformation::default().with_tag("hostname", "h1"))
            .location(sticky_replica("a"))
            .location(sticky_replica("b"));
        fixture
            .requirements
            .partition_keys
            .insert("hostname".to_string());
        assert_eq!(fixture.verify().await, QoSAction::CacheReplica);
        assert_eq!(fixture.operation.target.selected(), Some("b"));
    }

    #[tokio::test]
    async fn group_exit_voids_the_operation() {
        let mut fixture = Fixture::new(1, 0)
            .pool("a", PoolInformation::default())
            .location(sticky_replica("a"));
        fixture.pool_info.add_group("primary1", true);
        fixture.operation.pool_group = Some("primary1".to_string());
        // no current location belongs to the group
        assert_eq!(fixture.verify().await, QoSAction::Void);
        assert_eq!(fixture.operation.needed, 0);
    }

    #[tokio::test]
    async fn tape_resident_file_absent_from_disk_is_not_an_error() {
        let mut fixture = Fixture::new(0, 1).tape("osm://main/?store=exp");
        assert_eq!(fixture.verify().await, QoSAction::Void);
    }

    #[tokio::test]
    async fn disk_only_file_with_no_disk_locations_is_lost() {
        let mut fixture = Fixture::new(0, 0);
        assert_eq!(fixture.verify().await, QoSAction::NotifyMissing);
    }
}
