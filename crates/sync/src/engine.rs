//! One reconciliation pass per provider.
//!
//! State machine per provider: `Idle → Syncing → {Idle, Conflict, Error}`.
//! A pass fetches the provider's records, plans against the local store,
//! prepares the local batch, pushes provider writes, commits the local batch
//! and finally records links and conflicts in the registry. A failure before
//! the push writes nothing anywhere; a local commit that fails after the push
//! reverts the provider writes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tradeflow_core::{ItemId, ProviderId};

use crate::adapter::{AdapterError, ExternalBatch, LocalRecordStore, ProviderAdapter};
use crate::config::SyncConfig;
use crate::diff;
use crate::error::{RegistryError, SyncError};
use crate::registry::{PassRecord, SyncProviderRegistry};
use crate::types::{
    ExternalId, ExternalRecord, LocalRecord, ProviderType, RecordFields, SyncLink, SyncProviderConfig, SyncReport,
    SyncState, SyncWindow,
};

pub struct SyncEngine {
    registry: Arc<SyncProviderRegistry>,
    local: Arc<dyn LocalRecordStore>,
    adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
    states: Mutex<HashMap<ProviderId, SyncState>>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(registry: Arc<SyncProviderRegistry>, local: Arc<dyn LocalRecordStore>, config: SyncConfig) -> Self {
        Self {
            registry,
            local,
            adapters: HashMap::new(),
            states: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Route every provider of `provider_type` through `adapter`.
    pub fn with_adapter(mut self, provider_type: ProviderType, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(provider_type, adapter);
        self
    }

    pub fn registry(&self) -> &Arc<SyncProviderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current state of a provider; providers never synced are `Idle`.
    pub fn state(&self, provider_id: ProviderId) -> SyncState {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(&provider_id).cloned().unwrap_or(SyncState::Idle)
    }

    /// Run one pass for `provider_id` now.
    pub async fn sync(&self, provider_id: ProviderId) -> Result<SyncReport, SyncError> {
        self.sync_at(provider_id, Utc::now()).await
    }

    /// Run one pass with an explicit clock reading (window and timestamps).
    pub async fn sync_at(&self, provider_id: ProviderId, now: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        let guard = self.begin(provider_id)?;

        // Read the provider only once this pass owns it, so links written by
        // the previous pass are visible.
        let provider = match self.registry.get(provider_id).await {
            Some(provider) => provider,
            None => {
                guard.restore();
                return Err(RegistryError::ProviderNotFound(provider_id).into());
            }
        };
        if !provider.enabled {
            guard.restore();
            return Err(SyncError::ProviderDisabled(provider_id));
        }
        let Some(adapter) = self.adapters.get(&provider.provider_type).cloned() else {
            guard.restore();
            return Err(SyncError::NoAdapter(provider.provider_type));
        };

        tracing::info!(
            provider_id = %provider_id,
            provider_type = provider.provider_type.as_str(),
            direction = ?provider.sync_direction,
            "sync pass started"
        );

        match self.run_pass(&provider, adapter.as_ref(), now).await {
            Ok(report) => {
                let end = if report.conflicts_open > 0 {
                    SyncState::Conflict
                } else {
                    SyncState::Idle
                };
                tracing::info!(
                    provider_id = %provider_id,
                    local_writes = report.local_writes(),
                    external_writes = report.external_writes(),
                    conflicts_detected = report.conflicts_detected,
                    conflicts_open = report.conflicts_open,
                    "sync pass finished"
                );
                guard.finish(end);
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(provider_id = %provider_id, "sync pass failed: {err}");
                guard.finish(SyncState::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run_pass(
        &self,
        provider: &SyncProviderConfig,
        adapter: &dyn ProviderAdapter,
        now: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let organization_id = provider.organization_id;
        let window = SyncWindow::around(now, self.config.window_past, self.config.window_future);

        let mut external = self.bounded(adapter.fetch(provider, &window)).await?;
        let mut local = self.local.list(organization_id, &window).await?;
        self.fetch_linked(provider, adapter, &mut external, &mut local).await?;
        tracing::debug!(
            provider_id = %provider.provider_id,
            external = external.len(),
            local = local.len(),
            "records fetched"
        );

        let plan = diff::plan(
            provider.sync_direction,
            &provider.links,
            &provider.conflicts,
            &local,
            &external,
            now,
        );
        let mut report = plan.report;
        let mut links = plan.links;

        // Everything that can reject the local batch runs before the push.
        let prepared = if plan.local.is_empty() {
            None
        } else {
            Some(self.local.prepare(organization_id, plan.local).await?)
        };

        let mut undo = PushUndo::default();
        if !plan.external.is_empty() {
            undo = PushUndo::before(&plan.external, &external, &provider.links);
            let created = self.bounded(adapter.push(provider, plan.external)).await?;
            undo.created = created.iter().map(|(_, external_id)| external_id.clone()).collect();
            links.extend(created.into_iter().map(|(local_id, external_id)| SyncLink {
                local_id,
                external_id,
                last_synced_at: now,
            }));
        }

        if let Some(prepared) = prepared {
            match self.local.commit(prepared).await {
                Ok(created) => links.extend(created.into_iter().map(|(external_id, local_id)| SyncLink {
                    local_id,
                    external_id,
                    last_synced_at: now,
                })),
                Err(err) => {
                    self.revert_push(provider, adapter, undo).await;
                    return Err(err.into());
                }
            }
        }

        let mut conflicts = plan.conflicts;
        let pruned = diff::prune_settled(&mut conflicts, now - self.config.resolved_conflict_retention);
        if pruned > 0 {
            tracing::debug!(provider_id = %provider.provider_id, pruned, "settled conflicts pruned");
        }

        let stored = self
            .registry
            .record_pass(
                provider.provider_id,
                PassRecord {
                    links,
                    conflicts,
                    last_sync_at: now,
                },
            )
            .await?;
        report.conflicts_open = stored.unresolved_conflicts().count();
        Ok(report)
    }

    /// Look up linked records the windowed reads did not return. A record
    /// rescheduled outside the window still exists and is compared as usual.
    async fn fetch_linked(
        &self,
        provider: &SyncProviderConfig,
        adapter: &dyn ProviderAdapter,
        external: &mut Vec<ExternalRecord>,
        local: &mut Vec<LocalRecord>,
    ) -> Result<(), SyncError> {
        let missing_external: Vec<ExternalId> = {
            let seen: HashSet<&ExternalId> = external.iter().map(|r| &r.external_id).collect();
            provider
                .links
                .iter()
                .filter(|link| !seen.contains(&link.external_id))
                .map(|link| link.external_id.clone())
                .collect()
        };
        let missing_local: Vec<ItemId> = {
            let seen: HashSet<&ItemId> = local.iter().map(|r| &r.id).collect();
            provider
                .links
                .iter()
                .filter(|link| !seen.contains(&link.local_id))
                .map(|link| link.local_id.clone())
                .collect()
        };

        if !missing_external.is_empty() {
            let found = self.bounded(adapter.fetch_by_ids(provider, &missing_external)).await?;
            external.extend(found);
        }
        if !missing_local.is_empty() {
            let found = self.local.get_many(provider.organization_id, &missing_local).await?;
            local.extend(found);
        }
        Ok(())
    }

    /// Put the provider back the way this pass found it. Deleted events come
    /// back under new ids, so their links are repointed.
    async fn revert_push(&self, provider: &SyncProviderConfig, adapter: &dyn ProviderAdapter, undo: PushUndo) {
        if undo.is_empty() {
            return;
        }
        let provider_id = provider.provider_id;
        let batch = ExternalBatch {
            create: undo
                .deleted
                .iter()
                .map(|(local_id, _, fields)| (local_id.clone(), fields.clone()))
                .collect(),
            update: undo.updated,
            delete: undo.created,
        };

        let recreated = match self.bounded(adapter.push(provider, batch)).await {
            Ok(recreated) => recreated,
            Err(err) => {
                tracing::error!(provider_id = %provider_id, "failed to revert provider writes: {err}");
                return;
            }
        };
        let moved: Vec<(ExternalId, ExternalId)> = recreated
            .into_iter()
            .filter_map(|(local_id, new_id)| {
                undo.deleted
                    .iter()
                    .find(|(id, _, _)| *id == local_id)
                    .map(|(_, old_id, _)| (old_id.clone(), new_id))
            })
            .collect();
        if let Err(err) = self.registry.relink(provider_id, &moved).await {
            tracing::error!(provider_id = %provider_id, "failed to relink re-created events: {err}");
        }
        tracing::info!(provider_id = %provider_id, "provider writes reverted");
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, AdapterError>>) -> Result<T, SyncError> {
        match tokio::time::timeout(self.config.transport_timeout, call).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout(self.config.transport_timeout)),
        }
    }

    fn begin(&self, provider_id: ProviderId) -> Result<PassGuard<'_>, SyncError> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let previous = states.get(&provider_id).cloned().unwrap_or(SyncState::Idle);
        if previous == SyncState::Syncing {
            return Err(SyncError::AlreadySyncing(provider_id));
        }
        states.insert(provider_id, SyncState::Syncing);
        Ok(PassGuard {
            states: &self.states,
            provider_id,
            previous: Some(previous),
        })
    }
}

/// What it takes to revert one push.
#[derive(Debug, Default)]
struct PushUndo {
    /// Events the push created.
    created: Vec<ExternalId>,
    /// Events as they were before the push overwrote them.
    updated: Vec<ExternalRecord>,
    /// Events the push deleted: linked local id, old external id, fields.
    deleted: Vec<(ItemId, ExternalId, RecordFields)>,
}

impl PushUndo {
    fn before(batch: &ExternalBatch, fetched: &[ExternalRecord], links: &[SyncLink]) -> Self {
        let updated = batch
            .update
            .iter()
            .filter_map(|r| fetched.iter().find(|f| f.external_id == r.external_id).cloned())
            .collect();
        let deleted = batch
            .delete
            .iter()
            .filter_map(|id| {
                let record = fetched.iter().find(|f| &f.external_id == id)?;
                let link = links.iter().find(|l| &l.external_id == id)?;
                Some((link.local_id.clone(), id.clone(), record.fields.clone()))
            })
            .collect();
        Self {
            created: Vec::new(),
            updated,
            deleted,
        }
    }

    fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Owns the `Syncing` state of one provider. Dropped without
/// [`PassGuard::finish`] (the pass future was abandoned) it leaves the
/// provider in `Error`.
struct PassGuard<'a> {
    states: &'a Mutex<HashMap<ProviderId, SyncState>>,
    provider_id: ProviderId,
    previous: Option<SyncState>,
}

impl PassGuard<'_> {
    fn finish(mut self, state: SyncState) {
        self.previous = None;
        self.set(state);
    }

    /// The pass never started; put back whatever was there.
    fn restore(mut self) {
        if let Some(previous) = self.previous.take() {
            self.set(previous);
        }
    }

    fn set(&self, state: SyncState) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.insert(self.provider_id, state);
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if self.previous.is_some() {
            self.set(SyncState::Error {
                message: "sync pass abandoned".into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{InMemoryCalendar, InMemoryLocalRecordStore, LocalBatch, LocalStoreError, PreparedLocalBatch};
    use crate::kv::InMemoryKeyValueStore;
    use crate::registry::ProviderUpdate;
    use crate::types::{ConflictResolution, ConflictType, SyncDirection};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tradeflow_core::OrganizationId;

    struct Fixture {
        org: OrganizationId,
        provider_id: ProviderId,
        calendar: Arc<InMemoryCalendar>,
        local: Arc<InMemoryLocalRecordStore>,
        engine: SyncEngine,
    }

    /// Local store whose writes can be made to fail.
    struct FlakyDisk {
        inner: Arc<InMemoryLocalRecordStore>,
        fail_prepare: AtomicBool,
        fail_commit: AtomicBool,
    }

    #[async_trait]
    impl LocalRecordStore for FlakyDisk {
        async fn list(&self, organization_id: OrganizationId, window: &SyncWindow) -> Result<Vec<LocalRecord>, LocalStoreError> {
            self.inner.list(organization_id, window).await
        }

        async fn get_many(&self, organization_id: OrganizationId, ids: &[ItemId]) -> Result<Vec<LocalRecord>, LocalStoreError> {
            self.inner.get_many(organization_id, ids).await
        }

        async fn prepare(&self, organization_id: OrganizationId, batch: LocalBatch) -> Result<PreparedLocalBatch, LocalStoreError> {
            if self.fail_prepare.load(Ordering::SeqCst) {
                return Err(LocalStoreError::Backend("disk full".into()));
            }
            self.inner.prepare(organization_id, batch).await
        }

        async fn commit(&self, prepared: PreparedLocalBatch) -> Result<Vec<(ExternalId, ItemId)>, LocalStoreError> {
            if self.fail_commit.load(Ordering::SeqCst) {
                return Err(LocalStoreError::Backend("disk full".into()));
            }
            self.inner.commit(prepared).await
        }
    }

    async fn fixture(direction: SyncDirection) -> Fixture {
        fixture_with(direction, |local| local as Arc<dyn LocalRecordStore>).await
    }

    async fn flaky_fixture(direction: SyncDirection) -> (Fixture, Arc<FlakyDisk>) {
        let mut disk = None;
        let f = fixture_with(direction, |local| {
            let flaky = Arc::new(FlakyDisk {
                inner: local,
                fail_prepare: AtomicBool::new(false),
                fail_commit: AtomicBool::new(false),
            });
            disk = Some(flaky.clone());
            flaky as Arc<dyn LocalRecordStore>
        })
        .await;
        (f, disk.unwrap())
    }

    async fn fixture_with(
        direction: SyncDirection,
        wrap: impl FnOnce(Arc<InMemoryLocalRecordStore>) -> Arc<dyn LocalRecordStore>,
    ) -> Fixture {
        let org = OrganizationId::new();
        let registry = Arc::new(SyncProviderRegistry::new(org, Arc::new(InMemoryKeyValueStore::new())));
        let config = registry
            .register(SyncProviderConfig::new(
                org,
                "Office",
                ProviderType::GoogleCalendar,
                direction,
                "office",
            ))
            .await
            .unwrap();
        let calendar = Arc::new(InMemoryCalendar::new());
        let local = Arc::new(InMemoryLocalRecordStore::new());
        let engine = SyncEngine::new(registry, wrap(local.clone()), SyncConfig::default())
            .with_adapter(ProviderType::GoogleCalendar, calendar.clone());
        Fixture {
            org,
            provider_id: config.provider_id,
            calendar,
            local,
            engine,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn fields(title: &str, hour: u32) -> RecordFields {
        let starts_at = Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap();
        RecordFields {
            title: title.into(),
            description: None,
            starts_at,
            ends_at: starts_at + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn first_pass_links_new_records_both_ways() {
        let f = fixture(SyncDirection::Bidirectional).await;
        f.local.insert(f.org, fields("Boiler service", 10));
        f.calendar.insert("office", fields("Dentist", 15));

        let report = f.engine.sync_at(f.provider_id, now()).await.unwrap();
        assert_eq!(report.created_local, 1);
        assert_eq!(report.created_external, 1);
        assert_eq!(f.engine.state(f.provider_id), SyncState::Idle);

        let stored = f.engine.registry().get(f.provider_id).await.unwrap();
        assert_eq!(stored.links.len(), 2);
        assert_eq!(stored.last_sync_at, Some(now()));

        // Nothing left to do on a second pass.
        let again = f.engine.sync_at(f.provider_id, now()).await.unwrap();
        assert_eq!(again.local_writes() + again.external_writes(), 0);
    }

    #[tokio::test]
    async fn disabled_and_unknown_providers_do_not_run() {
        let f = fixture(SyncDirection::Import).await;
        f.engine
            .registry()
            .update(f.provider_id, ProviderUpdate::enabled(false))
            .await
            .unwrap();

        assert_eq!(
            f.engine.sync_at(f.provider_id, now()).await,
            Err(SyncError::ProviderDisabled(f.provider_id))
        );
        assert_eq!(f.engine.state(f.provider_id), SyncState::Idle);

        let unknown = ProviderId::new();
        assert!(matches!(
            f.engine.sync_at(unknown, now()).await,
            Err(SyncError::Registry(RegistryError::ProviderNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn missing_adapter_is_reported() {
        let org = OrganizationId::new();
        let registry = Arc::new(SyncProviderRegistry::new(org, Arc::new(InMemoryKeyValueStore::new())));
        let config = registry
            .register(SyncProviderConfig::new(
                org,
                "Exchange",
                ProviderType::Exchange,
                SyncDirection::Export,
                "shared",
            ))
            .await
            .unwrap();
        let engine = SyncEngine::new(registry, Arc::new(InMemoryLocalRecordStore::new()), SyncConfig::default());

        assert_eq!(
            engine.sync_at(config.provider_id, now()).await,
            Err(SyncError::NoAdapter(ProviderType::Exchange))
        );
    }

    #[tokio::test]
    async fn unreachable_provider_leaves_error_state_and_local_untouched() {
        let f = fixture(SyncDirection::Import).await;
        f.calendar.insert("office", fields("Dentist", 15));
        f.calendar.set_reachable(false);

        let err = f.engine.sync_at(f.provider_id, now()).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert!(matches!(f.engine.state(f.provider_id), SyncState::Error { .. }));
        assert!(f.local.is_empty(f.org));
        assert_eq!(f.engine.registry().get(f.provider_id).await.unwrap().last_sync_at, None);

        // Recovers on the next pass.
        f.calendar.set_reachable(true);
        f.engine.sync_at(f.provider_id, now()).await.unwrap();
        assert_eq!(f.local.len(f.org), 1);
        assert_eq!(f.engine.state(f.provider_id), SyncState::Idle);
    }

    #[tokio::test]
    async fn failed_local_commit_removes_events_the_pass_created() {
        let (f, disk) = flaky_fixture(SyncDirection::Bidirectional).await;
        f.local.insert(f.org, fields("Boiler service", 10));
        f.calendar.insert("office", fields("Dentist", 15));
        disk.fail_commit.store(true, Ordering::SeqCst);

        let err = f.engine.sync_at(f.provider_id, now()).await.unwrap_err();
        assert_eq!(err, SyncError::LocalStore(LocalStoreError::Backend("disk full".into())));
        assert!(matches!(f.engine.state(f.provider_id), SyncState::Error { .. }));
        assert_eq!(f.calendar.len("office"), 1);
        assert_eq!(f.local.len(f.org), 1);
        let stored = f.engine.registry().get(f.provider_id).await.unwrap();
        assert!(stored.links.is_empty());
        assert_eq!(stored.last_sync_at, None);

        disk.fail_commit.store(false, Ordering::SeqCst);
        let report = f.engine.sync_at(f.provider_id, now()).await.unwrap();
        assert_eq!((report.created_local, report.created_external), (1, 1));
        assert_eq!(f.calendar.len("office"), 2);
    }

    #[tokio::test]
    async fn rejected_local_batch_stops_the_pass_before_the_push() {
        let (f, disk) = flaky_fixture(SyncDirection::Bidirectional).await;
        f.local.insert(f.org, fields("Boiler service", 10));
        f.calendar.insert("office", fields("Dentist", 15));
        disk.fail_prepare.store(true, Ordering::SeqCst);

        assert!(matches!(
            f.engine.sync_at(f.provider_id, now()).await,
            Err(SyncError::LocalStore(_))
        ));
        assert_eq!(f.calendar.len("office"), 1);
        assert_eq!(f.local.len(f.org), 1);
    }

    #[tokio::test]
    async fn failed_local_commit_restores_updated_and_deleted_events() {
        let (f, disk) = flaky_fixture(SyncDirection::Bidirectional).await;
        let registry = f.engine.registry().clone();
        f.local.insert_with_id(f.org, ItemId::new("A1"), fields("Boiler service", 10));
        f.local.insert_with_id(f.org, ItemId::new("A2"), fields("Gutter clean", 12));
        f.engine.sync_at(f.provider_id, now()).await.unwrap();
        let links = registry.get(f.provider_id).await.unwrap().links;
        let external_of = |local_id: &str| {
            links
                .iter()
                .find(|l| l.local_id == ItemId::new(local_id))
                .map(|l| l.external_id.clone())
                .unwrap()
        };
        let (e1, e2) = (external_of("A1"), external_of("A2"));

        // A1 moved and A2 deleted locally; keep the local side of both.
        f.local.insert_with_id(f.org, ItemId::new("A1"), fields("Boiler service", 11));
        f.local.remove(f.org, &ItemId::new("A2"));
        f.engine.sync_at(f.provider_id, now()).await.unwrap();
        for conflict in registry.unresolved_conflicts(f.provider_id).await.unwrap() {
            registry
                .resolve_conflict(f.provider_id, conflict.id, ConflictResolution::KeepLocal)
                .await
                .unwrap();
        }
        f.calendar.insert("office", fields("Dentist", 15));

        disk.fail_commit.store(true, Ordering::SeqCst);
        assert!(f.engine.sync_at(f.provider_id, now()).await.is_err());

        assert_eq!(f.calendar.get("office", &e1), Some(fields("Boiler service", 10)));
        assert_eq!(f.calendar.get("office", &e2), None);
        let stored = registry.get(f.provider_id).await.unwrap();
        let relinked = stored
            .links
            .iter()
            .find(|l| l.local_id == ItemId::new("A2"))
            .map(|l| l.external_id.clone())
            .unwrap();
        assert_ne!(relinked, e2);
        assert_eq!(f.calendar.get("office", &relinked), Some(fields("Gutter clean", 12)));
        assert!(stored.conflicts.iter().any(|c| c.remote_ref.as_ref() == Some(&relinked)));
        assert_eq!(f.calendar.len("office"), 3);

        disk.fail_commit.store(false, Ordering::SeqCst);
        let report = f.engine.sync_at(f.provider_id, now()).await.unwrap();
        assert_eq!(report.updated_external, 1);
        assert_eq!(report.deleted_external, 1);
        assert_eq!(report.created_local, 1);
        assert_eq!(f.calendar.get("office", &e1), Some(fields("Boiler service", 11)));
        assert_eq!(f.calendar.get("office", &relinked), None);
        assert_eq!(f.engine.state(f.provider_id), SyncState::Idle);
    }

    fn far_ahead(title: &str) -> RecordFields {
        let mut moved = fields(title, 15);
        moved.starts_at = moved.starts_at + Duration::days(200);
        moved.ends_at = moved.starts_at + Duration::hours(1);
        moved
    }

    #[tokio::test]
    async fn event_moved_past_the_window_is_followed_not_deleted() {
        let f = fixture(SyncDirection::Import).await;
        let external_id = f.calendar.insert("office", fields("Dentist", 15));
        f.engine.sync_at(f.provider_id, now()).await.unwrap();
        let local_id = f.engine.registry().get(f.provider_id).await.unwrap().links[0].local_id.clone();

        f.calendar.insert_with_id("office", external_id, far_ahead("Dentist"));
        let report = f.engine.sync_at(f.provider_id, now()).await.unwrap();

        assert_eq!(report.deleted_local, 0);
        assert_eq!(report.updated_local, 1);
        assert_eq!(f.local.get(f.org, &local_id), Some(far_ahead("Dentist")));
        assert_eq!(f.engine.registry().get(f.provider_id).await.unwrap().links.len(), 1);
    }

    #[tokio::test]
    async fn record_moved_past_the_window_is_a_time_change() {
        let f = fixture(SyncDirection::Bidirectional).await;
        let local_id = f.local.insert(f.org, fields("Boiler service", 10));
        f.engine.sync_at(f.provider_id, now()).await.unwrap();

        f.local.insert_with_id(f.org, local_id.clone(), far_ahead("Boiler service"));
        let report = f.engine.sync_at(f.provider_id, now()).await.unwrap();

        assert_eq!(report.deleted_external, 0);
        let conflicts = f.engine.registry().unresolved_conflicts(f.provider_id).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::TimeChanged);
        assert_eq!(conflicts[0].local_ref, Some(local_id));
    }
}
