//! Collaborators a sync pass talks to: the provider transport and the local
//! record store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tradeflow_core::{ItemId, OrganizationId};

use crate::types::{ExternalId, ExternalRecord, LocalRecord, RecordFields, SyncProviderConfig, SyncWindow};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("credentials rejected: {0}")]
    Unauthorized(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalStoreError {
    #[error("local record {0} not found")]
    NotFound(ItemId),

    #[error("local store failure: {0}")]
    Backend(String),
}

/// Writes destined for the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalBatch {
    /// Local records to create remotely, keyed by their local id.
    pub create: Vec<(ItemId, RecordFields)>,
    pub update: Vec<ExternalRecord>,
    pub delete: Vec<ExternalId>,
}

impl ExternalBatch {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Writes destined for the local store, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalBatch {
    /// Provider records to create locally, keyed by their external id.
    pub create: Vec<(ExternalId, RecordFields)>,
    pub update: Vec<LocalRecord>,
    pub delete: Vec<ItemId>,
}

impl LocalBatch {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// A local batch that was checked and holds the ids reserved for its
/// creates. Nothing has been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedLocalBatch {
    pub organization_id: OrganizationId,
    pub batch: LocalBatch,
    /// One id per entry of `batch.create`, in order.
    pub reserved_ids: Vec<ItemId>,
}

/// Transport to one kind of external provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Records overlapping `window` on the provider's calendar.
    async fn fetch(
        &self,
        config: &SyncProviderConfig,
        window: &SyncWindow,
    ) -> Result<Vec<ExternalRecord>, AdapterError>;

    /// Records by id, wherever they sit on the calendar. Ids the provider no
    /// longer knows are left out.
    async fn fetch_by_ids(
        &self,
        config: &SyncProviderConfig,
        ids: &[ExternalId],
    ) -> Result<Vec<ExternalRecord>, AdapterError>;

    /// Apply `batch`; returns the external id assigned to each created record.
    async fn push(
        &self,
        config: &SyncProviderConfig,
        batch: ExternalBatch,
    ) -> Result<Vec<(ItemId, ExternalId)>, AdapterError>;
}

/// The organization's own appointment / work-order records.
///
/// Writes are two-phase: [`prepare`](Self::prepare) does every check that
/// can fail and [`commit`](Self::commit) writes the prepared batch as a
/// whole.
#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    async fn list(
        &self,
        organization_id: OrganizationId,
        window: &SyncWindow,
    ) -> Result<Vec<LocalRecord>, LocalStoreError>;

    /// Records by id regardless of the window; unknown ids are left out.
    async fn get_many(
        &self,
        organization_id: OrganizationId,
        ids: &[ItemId],
    ) -> Result<Vec<LocalRecord>, LocalStoreError>;

    async fn prepare(
        &self,
        organization_id: OrganizationId,
        batch: LocalBatch,
    ) -> Result<PreparedLocalBatch, LocalStoreError>;

    /// Write a prepared batch atomically; returns the local id of each
    /// created record.
    async fn commit(&self, prepared: PreparedLocalBatch) -> Result<Vec<(ExternalId, ItemId)>, LocalStoreError>;

    async fn apply(
        &self,
        organization_id: OrganizationId,
        batch: LocalBatch,
    ) -> Result<Vec<(ExternalId, ItemId)>, LocalStoreError> {
        let prepared = self.prepare(organization_id, batch).await?;
        self.commit(prepared).await
    }
}

/// In-memory local store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLocalRecordStore {
    records: Mutex<HashMap<OrganizationId, BTreeMap<ItemId, RecordFields>>>,
    next_id: AtomicU64,
}

impl InMemoryLocalRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record with a store-assigned id (`appt_{n}`).
    pub fn insert(&self, organization_id: OrganizationId, fields: RecordFields) -> ItemId {
        let id = self.fresh_id();
        self.insert_with_id(organization_id, id.clone(), fields);
        id
    }

    pub fn insert_with_id(&self, organization_id: OrganizationId, id: ItemId, fields: RecordFields) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.entry(organization_id).or_default().insert(id, fields);
    }

    pub fn remove(&self, organization_id: OrganizationId, id: &ItemId) -> Option<RecordFields> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get_mut(&organization_id)?.remove(id)
    }

    pub fn get(&self, organization_id: OrganizationId, id: &ItemId) -> Option<RecordFields> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(&organization_id)?.get(id).cloned()
    }

    pub fn len(&self, organization_id: OrganizationId) -> usize {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(&organization_id).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, organization_id: OrganizationId) -> bool {
        self.len(organization_id) == 0
    }

    fn fresh_id(&self) -> ItemId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        ItemId::new(format!("appt_{n}"))
    }
}

#[async_trait]
impl LocalRecordStore for InMemoryLocalRecordStore {
    async fn list(
        &self,
        organization_id: OrganizationId,
        window: &SyncWindow,
    ) -> Result<Vec<LocalRecord>, LocalStoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(&organization_id)
            .into_iter()
            .flatten()
            .filter(|(_, fields)| window.overlaps(fields))
            .map(|(id, fields)| LocalRecord {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn get_many(
        &self,
        organization_id: OrganizationId,
        ids: &[ItemId],
    ) -> Result<Vec<LocalRecord>, LocalStoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let Some(org) = records.get(&organization_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                org.get(id).map(|fields| LocalRecord {
                    id: id.clone(),
                    fields: fields.clone(),
                })
            })
            .collect())
    }

    async fn prepare(
        &self,
        organization_id: OrganizationId,
        batch: LocalBatch,
    ) -> Result<PreparedLocalBatch, LocalStoreError> {
        {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let org = records.get(&organization_id);
            if let Some(missing) = batch
                .update
                .iter()
                .find(|r| !org.is_some_and(|org| org.contains_key(&r.id)))
            {
                return Err(LocalStoreError::NotFound(missing.id.clone()));
            }
        }
        let reserved_ids = batch.create.iter().map(|_| self.fresh_id()).collect();
        Ok(PreparedLocalBatch {
            organization_id,
            batch,
            reserved_ids,
        })
    }

    async fn commit(&self, prepared: PreparedLocalBatch) -> Result<Vec<(ExternalId, ItemId)>, LocalStoreError> {
        let PreparedLocalBatch {
            organization_id,
            batch,
            reserved_ids,
        } = prepared;
        if reserved_ids.len() != batch.create.len() {
            return Err(LocalStoreError::Backend("batch was not prepared by this store".into()));
        }

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let org = records.entry(organization_id).or_default();

        // Records may have been removed since the batch was prepared.
        if let Some(missing) = batch.update.iter().find(|r| !org.contains_key(&r.id)) {
            return Err(LocalStoreError::NotFound(missing.id.clone()));
        }

        for record in batch.update {
            org.insert(record.id, record.fields);
        }
        for id in &batch.delete {
            org.remove(id);
        }
        let mut created = Vec::with_capacity(reserved_ids.len());
        for ((external_id, fields), id) in batch.create.into_iter().zip(reserved_ids) {
            org.insert(id.clone(), fields);
            created.push((external_id, id));
        }
        Ok(created)
    }
}

/// In-memory provider for tests/dev. Calendars are keyed by
/// `external_calendar_ref`.
#[derive(Debug)]
pub struct InMemoryCalendar {
    calendars: Mutex<HashMap<String, BTreeMap<ExternalId, RecordFields>>>,
    next_id: AtomicU64,
    reachable: AtomicBool,
}

impl Default for InMemoryCalendar {
    fn default() -> Self {
        Self {
            calendars: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            reachable: AtomicBool::new(true),
        }
    }
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the provider going offline (`false`) or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn insert(&self, calendar_ref: &str, fields: RecordFields) -> ExternalId {
        let id = self.fresh_id();
        self.insert_with_id(calendar_ref, id.clone(), fields);
        id
    }

    pub fn insert_with_id(&self, calendar_ref: &str, id: ExternalId, fields: RecordFields) {
        let mut calendars = self.calendars.lock().unwrap_or_else(|e| e.into_inner());
        calendars.entry(calendar_ref.to_string()).or_default().insert(id, fields);
    }

    pub fn remove(&self, calendar_ref: &str, id: &ExternalId) -> Option<RecordFields> {
        let mut calendars = self.calendars.lock().unwrap_or_else(|e| e.into_inner());
        calendars.get_mut(calendar_ref)?.remove(id)
    }

    pub fn get(&self, calendar_ref: &str, id: &ExternalId) -> Option<RecordFields> {
        let calendars = self.calendars.lock().unwrap_or_else(|e| e.into_inner());
        calendars.get(calendar_ref)?.get(id).cloned()
    }

    pub fn len(&self, calendar_ref: &str) -> usize {
        let calendars = self.calendars.lock().unwrap_or_else(|e| e.into_inner());
        calendars.get(calendar_ref).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, calendar_ref: &str) -> bool {
        self.len(calendar_ref) == 0
    }

    fn fresh_id(&self) -> ExternalId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        ExternalId::new(format!("ext_{n}"))
    }

    fn check_reachable(&self) -> Result<(), AdapterError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::Unreachable("calendar offline".into()))
        }
    }
}

#[async_trait]
impl ProviderAdapter for InMemoryCalendar {
    async fn fetch(
        &self,
        config: &SyncProviderConfig,
        window: &SyncWindow,
    ) -> Result<Vec<ExternalRecord>, AdapterError> {
        self.check_reachable()?;
        let calendars = self.calendars.lock().unwrap_or_else(|e| e.into_inner());
        Ok(calendars
            .get(&config.external_calendar_ref)
            .into_iter()
            .flatten()
            .filter(|(_, fields)| window.overlaps(fields))
            .map(|(id, fields)| ExternalRecord {
                external_id: id.clone(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn fetch_by_ids(
        &self,
        config: &SyncProviderConfig,
        ids: &[ExternalId],
    ) -> Result<Vec<ExternalRecord>, AdapterError> {
        self.check_reachable()?;
        let calendars = self.calendars.lock().unwrap_or_else(|e| e.into_inner());
        let Some(calendar) = calendars.get(&config.external_calendar_ref) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                calendar.get(id).map(|fields| ExternalRecord {
                    external_id: id.clone(),
                    fields: fields.clone(),
                })
            })
            .collect())
    }

    async fn push(
        &self,
        config: &SyncProviderConfig,
        batch: ExternalBatch,
    ) -> Result<Vec<(ItemId, ExternalId)>, AdapterError> {
        self.check_reachable()?;
        let mut calendars = self.calendars.lock().unwrap_or_else(|e| e.into_inner());
        let calendar = calendars.entry(config.external_calendar_ref.clone()).or_default();

        if let Some(missing) = batch.update.iter().find(|r| !calendar.contains_key(&r.external_id)) {
            return Err(AdapterError::Rejected(format!("unknown event {}", missing.external_id)));
        }

        for record in batch.update {
            calendar.insert(record.external_id, record.fields);
        }
        for id in &batch.delete {
            calendar.remove(id);
        }
        let mut created = Vec::with_capacity(batch.create.len());
        for (local_id, fields) in batch.create {
            let id = self.fresh_id();
            calendar.insert(id.clone(), fields);
            created.push((local_id, id));
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProviderType, SyncDirection};
    use chrono::{Duration, TimeZone, Utc};

    fn fields(title: &str, hour: u32) -> RecordFields {
        let starts_at = Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap();
        RecordFields {
            title: title.into(),
            description: None,
            starts_at,
            ends_at: starts_at + Duration::hours(1),
        }
    }

    fn window() -> SyncWindow {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        SyncWindow::around(now, Duration::days(30), Duration::days(30))
    }

    #[tokio::test]
    async fn local_apply_is_all_or_nothing() {
        let store = InMemoryLocalRecordStore::new();
        let org = OrganizationId::new();
        let a1 = store.insert(org, fields("Boiler service", 10));

        let batch = LocalBatch {
            create: vec![(ExternalId::new("ext_9"), fields("New", 12))],
            update: vec![LocalRecord {
                id: ItemId::new("appt_missing"),
                fields: fields("Ghost", 9),
            }],
            delete: vec![a1.clone()],
        };
        let err = store.apply(org, batch).await.unwrap_err();
        assert_eq!(err, LocalStoreError::NotFound(ItemId::new("appt_missing")));
        assert_eq!(store.len(org), 1);
        assert!(store.get(org, &a1).is_some());
    }

    #[tokio::test]
    async fn prepared_batch_is_written_only_on_commit() {
        let store = InMemoryLocalRecordStore::new();
        let org = OrganizationId::new();
        let a1 = store.insert(org, fields("Boiler service", 10));

        let prepared = store
            .prepare(
                org,
                LocalBatch {
                    create: vec![(ExternalId::new("ext_9"), fields("Dentist", 15))],
                    delete: vec![a1.clone()],
                    ..LocalBatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(prepared.reserved_ids.len(), 1);
        assert!(store.get(org, &a1).is_some());
        assert_eq!(store.len(org), 1);

        let reserved = prepared.reserved_ids[0].clone();
        let created = store.commit(prepared).await.unwrap();
        assert_eq!(created, vec![(ExternalId::new("ext_9"), reserved.clone())]);
        assert!(store.get(org, &a1).is_none());
        assert_eq!(store.get(org, &reserved), Some(fields("Dentist", 15)));
    }

    #[tokio::test]
    async fn commit_rechecks_records_removed_after_prepare() {
        let store = InMemoryLocalRecordStore::new();
        let org = OrganizationId::new();
        let a1 = store.insert(org, fields("Boiler service", 10));
        let prepared = store
            .prepare(
                org,
                LocalBatch {
                    create: vec![(ExternalId::new("ext_9"), fields("Dentist", 15))],
                    update: vec![LocalRecord {
                        id: a1.clone(),
                        fields: fields("Boiler service", 11),
                    }],
                    ..LocalBatch::default()
                },
            )
            .await
            .unwrap();

        store.remove(org, &a1);
        assert_eq!(store.commit(prepared).await, Err(LocalStoreError::NotFound(a1)));
        assert!(store.is_empty(org));
    }

    #[tokio::test]
    async fn lookups_by_id_ignore_the_window() {
        let org = OrganizationId::new();
        let mut far = fields("Boiler service", 10);
        far.starts_at = far.starts_at + Duration::days(200);
        far.ends_at = far.starts_at + Duration::hours(1);

        let store = InMemoryLocalRecordStore::new();
        let a1 = store.insert(org, far.clone());
        assert!(store.list(org, &window()).await.unwrap().is_empty());
        let found = store.get_many(org, &[a1.clone(), ItemId::new("appt_gone")]).await.unwrap();
        assert_eq!(found, vec![LocalRecord { id: a1, fields: far.clone() }]);

        let calendar = InMemoryCalendar::new();
        let config = SyncProviderConfig::new(org, "Office", ProviderType::GoogleCalendar, SyncDirection::Import, "office");
        let e1 = calendar.insert("office", far.clone());
        assert!(calendar.fetch(&config, &window()).await.unwrap().is_empty());
        let found = calendar
            .fetch_by_ids(&config, &[e1.clone(), ExternalId::new("ext_gone")])
            .await
            .unwrap();
        assert_eq!(found, vec![ExternalRecord { external_id: e1, fields: far }]);
    }

    #[tokio::test]
    async fn list_filters_by_window_and_organization() {
        let store = InMemoryLocalRecordStore::new();
        let org = OrganizationId::new();
        store.insert(org, fields("Inside", 10));
        let mut outside = fields("Outside", 10);
        outside.starts_at = outside.starts_at + Duration::days(90);
        outside.ends_at = outside.starts_at + Duration::hours(1);
        store.insert(org, outside);
        store.insert(OrganizationId::new(), fields("Other org", 10));

        let listed = store.list(org, &window()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fields.title, "Inside");
    }

    #[tokio::test]
    async fn offline_calendar_fails_fetch_and_push() {
        let calendar = InMemoryCalendar::new();
        let config = SyncProviderConfig::new(
            OrganizationId::new(),
            "Office",
            ProviderType::GoogleCalendar,
            SyncDirection::Bidirectional,
            "office@example.com",
        );
        calendar.set_reachable(false);

        assert!(matches!(
            calendar.fetch(&config, &window()).await,
            Err(AdapterError::Unreachable(_))
        ));
        assert!(calendar.push(&config, ExternalBatch::default()).await.is_err());

        calendar.set_reachable(true);
        let created = calendar
            .push(
                &config,
                ExternalBatch {
                    create: vec![(ItemId::new("appt_1"), fields("Boiler service", 10))],
                    ..ExternalBatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(created, vec![(ItemId::new("appt_1"), ExternalId::new("ext_1"))]);
        assert_eq!(calendar.len("office@example.com"), 1);
    }
}
