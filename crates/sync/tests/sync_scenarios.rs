use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Semaphore;
use tradeflow_core::{ItemId, OrganizationId, ProviderId};
use tradeflow_sync::{
    AdapterError, ConflictResolution, ConflictType, ExternalBatch, ExternalId, ExternalRecord, InMemoryCalendar,
    InMemoryKeyValueStore, InMemoryLocalRecordStore, KeyValueStore, KvError, ProviderAdapter, ProviderType,
    ProviderUpdate, RecordFields, SqliteKeyValueStore, SyncConfig, SyncDirection, SyncEngine, SyncError,
    SyncProviderConfig, SyncProviderRegistry, SyncState, SyncWindow,
};

const CALENDAR: &str = "dispatch@example.com";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 7, 0, 0).unwrap()
}

fn appointment(title: &str, hour: u32) -> RecordFields {
    let starts_at = Utc.with_ymd_and_hms(2026, 5, 6, hour, 0, 0).unwrap();
    RecordFields {
        title: title.into(),
        description: Some("annual service".into()),
        starts_at,
        ends_at: starts_at + chrono::Duration::hours(1),
    }
}

struct World {
    org: OrganizationId,
    provider_id: ProviderId,
    registry: Arc<SyncProviderRegistry>,
    calendar: Arc<InMemoryCalendar>,
    local: Arc<InMemoryLocalRecordStore>,
    engine: Arc<SyncEngine>,
}

async fn world(direction: SyncDirection, store: Arc<dyn KeyValueStore>, adapter: Option<Arc<dyn ProviderAdapter>>) -> World {
    tradeflow_observability::init();

    let org = OrganizationId::new();
    let registry = Arc::new(SyncProviderRegistry::new(org, store));
    let config = registry
        .register(SyncProviderConfig::new(
            org,
            "Dispatch board",
            ProviderType::OutlookCalendar,
            direction,
            CALENDAR,
        ))
        .await
        .unwrap();
    let calendar = Arc::new(InMemoryCalendar::new());
    let local = Arc::new(InMemoryLocalRecordStore::new());
    let adapter = adapter.unwrap_or_else(|| calendar.clone() as Arc<dyn ProviderAdapter>);
    let engine = SyncEngine::new(registry.clone(), local.clone(), SyncConfig::default())
        .with_adapter(ProviderType::OutlookCalendar, adapter);

    World {
        org,
        provider_id: config.provider_id,
        registry,
        calendar,
        local,
        engine: Arc::new(engine),
    }
}

/// Local `A1` at 10:00, synced once, then moved to 11:00 on the provider.
async fn drifted_appointment(w: &World) -> ExternalId {
    w.local.insert_with_id(w.org, ItemId::new("A1"), appointment("Boiler service", 10));
    w.engine.sync_at(w.provider_id, now()).await.unwrap();

    let link = w.registry.get(w.provider_id).await.unwrap().links[0].clone();
    assert_eq!(link.local_id, ItemId::new("A1"));
    w.calendar
        .insert_with_id(CALENDAR, link.external_id.clone(), appointment("Boiler service", 11));
    link.external_id
}

#[tokio::test]
async fn moved_event_yields_one_time_changed_conflict_and_keeps_local_time() {
    let w = world(SyncDirection::Bidirectional, Arc::new(InMemoryKeyValueStore::new()), None).await;
    let external_id = drifted_appointment(&w).await;

    let report = w.engine.sync_at(w.provider_id, now()).await.unwrap();
    assert_eq!(report.conflicts_detected, 1);
    assert_eq!(report.local_writes() + report.external_writes(), 0);
    assert_eq!(w.engine.state(w.provider_id), SyncState::Conflict);

    let conflicts = w.registry.unresolved_conflicts(w.provider_id).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::TimeChanged);
    assert_eq!(conflicts[0].local_ref, Some(ItemId::new("A1")));
    assert_eq!(conflicts[0].remote_ref, Some(external_id.clone()));

    assert_eq!(w.local.get(w.org, &ItemId::new("A1")), Some(appointment("Boiler service", 10)));
    assert_eq!(w.calendar.get(CALENDAR, &external_id), Some(appointment("Boiler service", 11)));

    // Another pass does not queue it twice.
    let again = w.engine.sync_at(w.provider_id, now()).await.unwrap();
    assert_eq!(again.conflicts_detected, 0);
    assert_eq!(w.registry.unresolved_conflicts(w.provider_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn import_provider_overwrites_local_without_conflicts() {
    let w = world(SyncDirection::Import, Arc::new(InMemoryKeyValueStore::new()), None).await;
    let external_id = w.calendar.insert(CALENDAR, appointment("Boiler service", 10));
    w.engine.sync_at(w.provider_id, now()).await.unwrap();
    let local_id = w.registry.get(w.provider_id).await.unwrap().links[0].local_id.clone();

    let mut edited = appointment("Boiler service", 10);
    edited.description = Some("customer asked for a morning slot".into());
    w.calendar.insert_with_id(CALENDAR, external_id, edited.clone());

    let report = w.engine.sync_at(w.provider_id, now()).await.unwrap();
    assert_eq!(report.updated_local, 1);
    assert_eq!(report.conflicts_detected, 0);
    assert_eq!(w.local.get(w.org, &local_id), Some(edited));
    assert!(w.registry.get(w.provider_id).await.unwrap().conflicts.is_empty());
    assert_eq!(w.engine.state(w.provider_id), SyncState::Idle);
}

#[tokio::test]
async fn export_provider_overwrites_the_calendar() {
    let w = world(SyncDirection::Export, Arc::new(InMemoryKeyValueStore::new()), None).await;
    let external_id = drifted_appointment(&w).await;

    let report = w.engine.sync_at(w.provider_id, now()).await.unwrap();
    assert_eq!(report.updated_external, 1);
    assert_eq!(w.calendar.get(CALENDAR, &external_id), Some(appointment("Boiler service", 10)));
}

#[tokio::test]
async fn resolution_is_applied_on_the_next_pass() {
    let w = world(SyncDirection::Bidirectional, Arc::new(InMemoryKeyValueStore::new()), None).await;
    drifted_appointment(&w).await;
    w.engine.sync_at(w.provider_id, now()).await.unwrap();

    let conflict = w.registry.unresolved_conflicts(w.provider_id).await.unwrap().remove(0);
    w.registry
        .resolve_conflict(w.provider_id, conflict.id, ConflictResolution::KeepRemote)
        .await
        .unwrap();

    let report = w.engine.sync_at(w.provider_id, now()).await.unwrap();
    assert_eq!(report.updated_local, 1);
    assert_eq!(report.conflicts_settled, 1);
    assert_eq!(w.local.get(w.org, &ItemId::new("A1")), Some(appointment("Boiler service", 11)));
    assert_eq!(w.engine.state(w.provider_id), SyncState::Idle);

    let stored = w.registry.get(w.provider_id).await.unwrap();
    assert!(stored.conflicts[0].applied_at.is_some());
}

#[tokio::test]
async fn disabling_stops_passes_but_keeps_conflicts() {
    let w = world(SyncDirection::Bidirectional, Arc::new(InMemoryKeyValueStore::new()), None).await;
    drifted_appointment(&w).await;
    w.engine.sync_at(w.provider_id, now()).await.unwrap();

    w.registry
        .update(w.provider_id, ProviderUpdate::enabled(false))
        .await
        .unwrap();
    assert_eq!(
        w.engine.sync_at(w.provider_id, now()).await,
        Err(SyncError::ProviderDisabled(w.provider_id))
    );
    assert_eq!(w.registry.unresolved_conflicts(w.provider_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn remotely_deleted_event_is_queued_under_bidirectional() {
    let w = world(SyncDirection::Bidirectional, Arc::new(InMemoryKeyValueStore::new()), None).await;
    let external_id = drifted_appointment(&w).await;
    w.calendar.remove(CALENDAR, &external_id);

    w.engine.sync_at(w.provider_id, now()).await.unwrap();
    let conflicts = w.registry.unresolved_conflicts(w.provider_id).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::DeletedRemotely);
    assert!(w.local.get(w.org, &ItemId::new("A1")).is_some());
}

/// Fetch blocks until the test opens the gate.
struct GatedCalendar {
    inner: Arc<InMemoryCalendar>,
    gate: Semaphore,
}

#[async_trait]
impl ProviderAdapter for GatedCalendar {
    async fn fetch(&self, config: &SyncProviderConfig, window: &SyncWindow) -> Result<Vec<ExternalRecord>, AdapterError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| AdapterError::Unreachable("gate closed".into()))?;
        permit.forget();
        self.inner.fetch(config, window).await
    }

    async fn fetch_by_ids(&self, config: &SyncProviderConfig, ids: &[ExternalId]) -> Result<Vec<ExternalRecord>, AdapterError> {
        self.inner.fetch_by_ids(config, ids).await
    }

    async fn push(&self, config: &SyncProviderConfig, batch: ExternalBatch) -> Result<Vec<(ItemId, ExternalId)>, AdapterError> {
        self.inner.push(config, batch).await
    }
}

#[tokio::test]
async fn concurrent_pass_for_the_same_provider_is_rejected() {
    let calendar = Arc::new(InMemoryCalendar::new());
    let gated = Arc::new(GatedCalendar {
        inner: calendar.clone(),
        gate: Semaphore::new(0),
    });
    let w = world(SyncDirection::Bidirectional, Arc::new(InMemoryKeyValueStore::new()), Some(gated.clone() as Arc<dyn ProviderAdapter>)).await;
    calendar.insert(CALENDAR, appointment("Gutter clean", 14));

    let engine = w.engine.clone();
    let provider_id = w.provider_id;
    let first = tokio::spawn(async move { engine.sync_at(provider_id, now()).await });

    while w.engine.state(w.provider_id) != SyncState::Syncing {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        w.engine.sync_at(w.provider_id, now()).await,
        Err(SyncError::AlreadySyncing(w.provider_id))
    );

    gated.gate.add_permits(1);
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.created_local, 1);
    assert_eq!(w.engine.state(w.provider_id), SyncState::Idle);
}

struct StalledCalendar;

#[async_trait]
impl ProviderAdapter for StalledCalendar {
    async fn fetch(&self, _config: &SyncProviderConfig, _window: &SyncWindow) -> Result<Vec<ExternalRecord>, AdapterError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }

    async fn fetch_by_ids(&self, _config: &SyncProviderConfig, _ids: &[ExternalId]) -> Result<Vec<ExternalRecord>, AdapterError> {
        Ok(Vec::new())
    }

    async fn push(&self, _config: &SyncProviderConfig, _batch: ExternalBatch) -> Result<Vec<(ItemId, ExternalId)>, AdapterError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn stalled_provider_times_out_without_local_writes() {
    let org = OrganizationId::new();
    let registry = Arc::new(SyncProviderRegistry::new(org, Arc::new(InMemoryKeyValueStore::new())));
    let config = registry
        .register(SyncProviderConfig::new(
            org,
            "Shared mailbox",
            ProviderType::Exchange,
            SyncDirection::Import,
            "shared",
        ))
        .await
        .unwrap();
    let local = Arc::new(InMemoryLocalRecordStore::new());
    let engine = SyncEngine::new(
        registry.clone(),
        local.clone(),
        SyncConfig::default().with_transport_timeout(Duration::from_millis(20)),
    )
    .with_adapter(ProviderType::Exchange, Arc::new(StalledCalendar));

    let err = engine.sync_at(config.provider_id, now()).await.unwrap_err();
    assert_eq!(err, SyncError::Timeout(Duration::from_millis(20)));
    assert!(matches!(engine.state(config.provider_id), SyncState::Error { .. }));
    assert!(local.is_empty(org));
    assert_eq!(registry.get(config.provider_id).await.unwrap().last_sync_at, None);
}

struct ReadOnlyDisk;

#[async_trait]
impl KeyValueStore for ReadOnlyDisk {
    async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String) -> Result<(), KvError> {
        Err(KvError::Backend("read-only file system".into()))
    }
}

#[tokio::test]
async fn persistence_failure_does_not_fail_the_pass() {
    let w = world(SyncDirection::Bidirectional, Arc::new(ReadOnlyDisk), None).await;
    drifted_appointment(&w).await;

    let report = w.engine.sync_at(w.provider_id, now()).await.unwrap();
    assert_eq!(report.conflicts_open, 1);
    assert_eq!(w.engine.state(w.provider_id), SyncState::Conflict);
    assert_eq!(w.registry.unresolved_conflicts(w.provider_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn conflicts_survive_a_restart_on_sqlite() {
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::new("sqlite::memory:"));
    let w = world(SyncDirection::Bidirectional, store.clone(), None).await;
    drifted_appointment(&w).await;
    w.engine.sync_at(w.provider_id, now()).await.unwrap();

    let reloaded = SyncProviderRegistry::load(w.org, store).await.unwrap();
    let provider = reloaded.get(w.provider_id).await.unwrap();
    assert_eq!(provider.links.len(), 1);
    assert_eq!(
        reloaded.unresolved_conflicts(w.provider_id).await.unwrap(),
        w.registry.unresolved_conflicts(w.provider_id).await.unwrap()
    );
}
