//! Reconciliation planning: classify every difference between the two sides
//! and decide, per the provider's direction, what to write and what to queue.
//!
//! Pure. Nothing here performs I/O; the engine executes the resulting
//! [`Plan`].

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tradeflow_core::{ConflictId, ItemId};

use crate::adapter::{ExternalBatch, LocalBatch};
use crate::types::{
    ConflictResolution, ConflictType, ExternalId, ExternalRecord, LocalRecord, RecordFields, SyncConflict,
    SyncDirection, SyncLink, SyncReport,
};

/// Everything one pass will write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub local: LocalBatch,
    pub external: ExternalBatch,
    /// Links that survive the pass. Records created on either side get their
    /// link once the side that created them reports the new id.
    pub links: Vec<SyncLink>,
    /// Full conflict list for the provider after the pass.
    pub conflicts: Vec<SyncConflict>,
    pub report: SyncReport,
}

/// Reconcile `local` and `external` through the stored `links`.
///
/// Records are only ever paired through a link or, when neither is linked,
/// by title and start time (a duplicate). Display titles alone never pair
/// two records.
pub fn plan(
    direction: SyncDirection,
    links: &[SyncLink],
    conflicts: &[SyncConflict],
    local: &[LocalRecord],
    external: &[ExternalRecord],
    now: DateTime<Utc>,
) -> Plan {
    let mut planner = Planner {
        direction,
        now,
        plan: Plan {
            conflicts: conflicts.to_vec(),
            ..Plan::default()
        },
        visited: HashSet::new(),
    };

    let local_by_id: HashMap<&ItemId, &LocalRecord> = local.iter().map(|r| (&r.id, r)).collect();
    let external_by_id: HashMap<&ExternalId, &ExternalRecord> =
        external.iter().map(|r| (&r.external_id, r)).collect();
    let mut linked_local: HashSet<&ItemId> = HashSet::new();
    let mut linked_external: HashSet<&ExternalId> = HashSet::new();

    for link in links {
        linked_local.insert(&link.local_id);
        linked_external.insert(&link.external_id);
        let l = local_by_id.get(&link.local_id).copied();
        let e = external_by_id.get(&link.external_id).copied();
        planner.linked_pair(link, l, e);
    }

    // Unlinked records: pair up duplicates first, the rest are new.
    let mut unlinked_local: HashMap<(String, DateTime<Utc>), Vec<&LocalRecord>> = HashMap::new();
    for record in local.iter().filter(|r| !linked_local.contains(&r.id)) {
        unlinked_local
            .entry(record.fields.duplicate_key())
            .or_default()
            .push(record);
    }
    // Keep first-listed order when several local records share a key.
    for bucket in unlinked_local.values_mut() {
        bucket.reverse();
    }

    let mut paired_local: HashSet<&ItemId> = HashSet::new();
    for record in external.iter().filter(|r| !linked_external.contains(&r.external_id)) {
        let twin = unlinked_local
            .get_mut(&record.fields.duplicate_key())
            .and_then(Vec::pop);
        match twin {
            Some(l) => {
                paired_local.insert(&l.id);
                planner.unlinked_pair(l, record);
            }
            None if direction.imports() => {
                tracing::debug!(external_id = %record.external_id, "new external record");
                planner
                    .plan
                    .local
                    .create
                    .push((record.external_id.clone(), record.fields.clone()));
            }
            None => {}
        }
    }

    if direction.exports() {
        for record in local
            .iter()
            .filter(|r| !linked_local.contains(&r.id) && !paired_local.contains(&r.id))
        {
            tracing::debug!(local_id = %record.id, "new local record");
            planner
                .plan
                .external
                .create
                .push((record.id.clone(), record.fields.clone()));
        }
    }

    let visible_local: HashSet<&ItemId> = local_by_id.keys().copied().collect();
    let visible_external: HashSet<&ExternalId> = external_by_id.keys().copied().collect();
    planner.sweep(&visible_local, &visible_external);
    planner.finish()
}

/// Drop conflicts that were settled and applied before `cutoff`.
pub fn prune_settled(conflicts: &mut Vec<SyncConflict>, cutoff: DateTime<Utc>) -> usize {
    let before = conflicts.len();
    conflicts.retain(|c| !(c.resolved && c.applied_at.is_some_and(|at| at < cutoff)));
    before - conflicts.len()
}

struct Planner {
    direction: SyncDirection,
    now: DateTime<Utc>,
    plan: Plan,
    /// Conflicts whose pair was seen this pass.
    visited: HashSet<ConflictId>,
}

impl Planner {
    fn linked_pair(&mut self, link: &SyncLink, l: Option<&LocalRecord>, e: Option<&ExternalRecord>) {
        let local_id = &link.local_id;
        let external_id = &link.external_id;

        match (l, e) {
            (Some(l), Some(e)) => {
                let Some(ty) = l.fields.difference(&e.fields) else {
                    self.settle_pair(local_id, external_id, ConflictResolution::Converged);
                    self.keep_link(local_id, external_id, self.now);
                    return;
                };
                match self.decide(ty, local_id, external_id, Some(&l.fields), Some(&e.fields)) {
                    Some(winner) => self.overwrite(winner, l, e),
                    None => self.keep_link(local_id, external_id, link.last_synced_at),
                }
            }
            (Some(l), None) => {
                match self.decide(ConflictType::DeletedRemotely, local_id, external_id, Some(&l.fields), None) {
                    Some(ConflictResolution::KeepLocal) => {
                        self.plan.external.create.push((local_id.clone(), l.fields.clone()));
                    }
                    Some(ConflictResolution::KeepRemote) => self.plan.local.delete.push(local_id.clone()),
                    _ => self.keep_link(local_id, external_id, link.last_synced_at),
                }
            }
            (None, Some(e)) => {
                match self.decide(ConflictType::DeletedLocally, local_id, external_id, None, Some(&e.fields)) {
                    Some(ConflictResolution::KeepLocal) => self.plan.external.delete.push(external_id.clone()),
                    Some(ConflictResolution::KeepRemote) => {
                        self.plan.local.create.push((external_id.clone(), e.fields.clone()));
                    }
                    _ => self.keep_link(local_id, external_id, link.last_synced_at),
                }
            }
            // Deleted on both sides.
            (None, None) => self.settle_pair(local_id, external_id, ConflictResolution::Converged),
        }
    }

    /// Same title and start time on both sides, neither linked.
    fn unlinked_pair(&mut self, l: &LocalRecord, e: &ExternalRecord) {
        if l.fields.difference(&e.fields).is_none() {
            // Identical: the link was lost or never recorded.
            self.settle_pair(&l.id, &e.external_id, ConflictResolution::Converged);
            self.keep_link(&l.id, &e.external_id, self.now);
            return;
        }
        if let Some(winner) = self.decide(
            ConflictType::Duplicate,
            &l.id,
            &e.external_id,
            Some(&l.fields),
            Some(&e.fields),
        ) {
            self.overwrite(winner, l, e);
        }
    }

    /// Copy the winning side over the other and link the pair.
    fn overwrite(&mut self, winner: ConflictResolution, l: &LocalRecord, e: &ExternalRecord) {
        match winner {
            ConflictResolution::KeepLocal => self.plan.external.update.push(ExternalRecord {
                external_id: e.external_id.clone(),
                fields: l.fields.clone(),
            }),
            ConflictResolution::KeepRemote => self.plan.local.update.push(LocalRecord {
                id: l.id.clone(),
                fields: e.fields.clone(),
            }),
            ConflictResolution::Converged => {}
        }
        self.keep_link(&l.id, &e.external_id, self.now);
    }

    /// Which side wins for a discrepancy, or `None` if it was queued.
    ///
    /// A person's recorded resolution takes precedence over the direction.
    fn decide(
        &mut self,
        conflict_type: ConflictType,
        local_id: &ItemId,
        external_id: &ExternalId,
        local_fields: Option<&RecordFields>,
        remote_fields: Option<&RecordFields>,
    ) -> Option<ConflictResolution> {
        let chosen = self
            .plan
            .conflicts
            .iter()
            .find(|c| c.concerns(Some(local_id), Some(external_id)) && c.awaiting_application())
            .and_then(|c| c.resolution)
            .filter(|r| *r != ConflictResolution::Converged);

        let winner = chosen.or(match self.direction {
            SyncDirection::Import => Some(ConflictResolution::KeepRemote),
            SyncDirection::Export => Some(ConflictResolution::KeepLocal),
            SyncDirection::Bidirectional => None,
        });

        match winner {
            Some(resolution) => {
                self.settle_pair(local_id, external_id, resolution);
                Some(resolution)
            }
            None => {
                self.queue(conflict_type, local_id, external_id, local_fields, remote_fields);
                None
            }
        }
    }

    fn queue(
        &mut self,
        conflict_type: ConflictType,
        local_id: &ItemId,
        external_id: &ExternalId,
        local_fields: Option<&RecordFields>,
        remote_fields: Option<&RecordFields>,
    ) {
        let existing = self
            .plan
            .conflicts
            .iter_mut()
            .find(|c| !c.resolved && c.concerns(Some(local_id), Some(external_id)));

        match existing {
            Some(conflict) => {
                conflict.conflict_type = conflict_type;
                conflict.local_snapshot = local_fields.cloned();
                conflict.remote_snapshot = remote_fields.cloned();
                self.visited.insert(conflict.id);
            }
            None => {
                tracing::info!(
                    local_id = %local_id,
                    external_id = %external_id,
                    conflict_type = ?conflict_type,
                    "conflict detected"
                );
                let conflict = SyncConflict::new(
                    conflict_type,
                    Some(local_id.clone()),
                    Some(external_id.clone()),
                    self.now,
                )
                .with_snapshots(local_fields.cloned(), remote_fields.cloned());
                self.visited.insert(conflict.id);
                self.plan.conflicts.push(conflict);
                self.plan.report.conflicts_detected += 1;
            }
        }
    }

    fn settle_pair(&mut self, local_id: &ItemId, external_id: &ExternalId, resolution: ConflictResolution) {
        let now = self.now;
        for conflict in self
            .plan
            .conflicts
            .iter_mut()
            .filter(|c| c.applied_at.is_none() && c.concerns(Some(local_id), Some(external_id)))
        {
            conflict.settle(resolution, now);
            self.visited.insert(conflict.id);
            self.plan.report.conflicts_settled += 1;
        }
    }

    /// Settle what the pair walk could not reach.
    fn sweep(&mut self, visible_local: &HashSet<&ItemId>, visible_external: &HashSet<&ExternalId>) {
        let now = self.now;
        for conflict in self.plan.conflicts.iter_mut() {
            if self.visited.contains(&conflict.id) || conflict.applied_at.is_some() {
                continue;
            }
            let seen = conflict.local_ref.as_ref().is_some_and(|id| visible_local.contains(id))
                || conflict
                    .remote_ref
                    .as_ref()
                    .is_some_and(|id| visible_external.contains(id));

            // Resolved by a person but no longer paired, or a duplicate whose
            // records no longer look alike.
            if conflict.resolved || (conflict.conflict_type == ConflictType::Duplicate && seen) {
                conflict.settle(ConflictResolution::Converged, now);
                self.plan.report.conflicts_settled += 1;
            }
        }
    }

    fn keep_link(&mut self, local_id: &ItemId, external_id: &ExternalId, last_synced_at: DateTime<Utc>) {
        self.plan.links.push(SyncLink {
            local_id: local_id.clone(),
            external_id: external_id.clone(),
            last_synced_at,
        });
    }

    fn finish(mut self) -> Plan {
        let report = &mut self.plan.report;
        report.created_local = self.plan.local.create.len();
        report.updated_local = self.plan.local.update.len();
        report.deleted_local = self.plan.local.delete.len();
        report.created_external = self.plan.external.create.len();
        report.updated_external = self.plan.external.update.len();
        report.deleted_external = self.plan.external.delete.len();
        report.conflicts_open = self.plan.conflicts.iter().filter(|c| !c.resolved).count();
        self.plan
    }
}
