//! Provider configuration, records and conflicts.
//!
//! Everything in here is persisted as part of the per-organization provider
//! array, so field names are part of the storage format.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tradeflow_core::{ConflictId, ItemId, OrganizationId, ProviderId};

/// Kind of external calendar / work-order system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    GoogleCalendar,
    OutlookCalendar,
    AppleCalendar,
    GenericIcal,
    Exchange,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::GoogleCalendar => "google-calendar",
            ProviderType::OutlookCalendar => "outlook-calendar",
            ProviderType::AppleCalendar => "apple-calendar",
            ProviderType::GenericIcal => "generic-ical",
            ProviderType::Exchange => "exchange",
        }
    }
}

/// Which side is authoritative for each category of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// External → local; local is overwritten.
    Import,
    /// Local → external; external is overwritten.
    Export,
    /// Both ways; true conflicts are queued for a person to decide.
    Bidirectional,
}

impl SyncDirection {
    pub fn imports(&self) -> bool {
        matches!(self, SyncDirection::Import | SyncDirection::Bidirectional)
    }

    pub fn exports(&self) -> bool {
        matches!(self, SyncDirection::Export | SyncDirection::Bidirectional)
    }
}

/// Opaque credential bag handed to the provider adapter.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderCredentials(BTreeMap<String, String>);

impl ProviderCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl core::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Keys only; secrets never reach logs.
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Identifier of a record on the provider side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored external-reference mapping: which local record a provider record
/// was last reconciled with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLink {
    pub local_id: ItemId,
    pub external_id: ExternalId,
    pub last_synced_at: DateTime<Utc>,
}

/// Fields compared between the two sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    pub title: String,
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl RecordFields {
    /// Classify how `other` differs from `self`, if at all.
    ///
    /// Schedule changes take precedence over text changes.
    pub fn difference(&self, other: &RecordFields) -> Option<ConflictType> {
        if self.starts_at != other.starts_at || self.ends_at != other.ends_at {
            Some(ConflictType::TimeChanged)
        } else if self.title != other.title || self.description != other.description {
            Some(ConflictType::FieldMismatch)
        } else {
            None
        }
    }

    /// Key used to spot the same appointment entered on both sides.
    pub(crate) fn duplicate_key(&self) -> (String, DateTime<Utc>) {
        (self.title.trim().to_lowercase(), self.starts_at)
    }
}

/// A local appointment / work order as seen by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub id: ItemId,
    #[serde(flatten)]
    pub fields: RecordFields,
}

/// A provider-side event / work order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub external_id: ExternalId,
    #[serde(flatten)]
    pub fields: RecordFields,
}

/// Classification of a detected discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    TimeChanged,
    DeletedRemotely,
    DeletedLocally,
    Duplicate,
    FieldMismatch,
}

/// How a conflict was (or should be) settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Local state wins; the provider is overwritten.
    KeepLocal,
    /// Provider state wins; local is overwritten.
    KeepRemote,
    /// Both sides became equal on their own.
    Converged,
}

/// A discrepancy the resolution policy would not settle on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: ConflictId,
    pub conflict_type: ConflictType,
    pub local_ref: Option<ItemId>,
    pub remote_ref: Option<ExternalId>,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default)]
    pub resolution: Option<ConflictResolution>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set once the resolution has been written to both sides.
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
    /// Local fields when the conflict was (last) observed.
    #[serde(default)]
    pub local_snapshot: Option<RecordFields>,
    /// Provider fields when the conflict was (last) observed.
    #[serde(default)]
    pub remote_snapshot: Option<RecordFields>,
}

impl SyncConflict {
    pub fn new(
        conflict_type: ConflictType,
        local_ref: Option<ItemId>,
        remote_ref: Option<ExternalId>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            conflict_type,
            local_ref,
            remote_ref,
            detected_at,
            resolved: false,
            resolution: None,
            resolved_at: None,
            applied_at: None,
            local_snapshot: None,
            remote_snapshot: None,
        }
    }

    pub fn with_snapshots(mut self, local: Option<RecordFields>, remote: Option<RecordFields>) -> Self {
        self.local_snapshot = local;
        self.remote_snapshot = remote;
        self
    }

    /// Whether this conflict concerns the given pair of records.
    pub fn concerns(&self, local: Option<&ItemId>, remote: Option<&ExternalId>) -> bool {
        self.local_ref.as_ref() == local && self.remote_ref.as_ref() == remote
    }

    /// Resolved by a person, but not yet written to either side.
    pub fn awaiting_application(&self) -> bool {
        self.resolved && self.applied_at.is_none()
    }

    pub(crate) fn settle(&mut self, resolution: ConflictResolution, at: DateTime<Utc>) {
        if !self.resolved {
            self.resolved = true;
            self.resolution = Some(resolution);
            self.resolved_at = Some(at);
        }
        self.applied_at = Some(at);
    }
}

/// One registered external provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProviderConfig {
    pub provider_id: ProviderId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub sync_direction: SyncDirection,
    /// Calendar / list identifier on the provider side.
    pub external_calendar_ref: String,
    pub credentials: ProviderCredentials,
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub links: Vec<SyncLink>,
    #[serde(default)]
    pub conflicts: Vec<SyncConflict>,
}

impl SyncProviderConfig {
    pub fn new(
        organization_id: OrganizationId,
        name: impl Into<String>,
        provider_type: ProviderType,
        sync_direction: SyncDirection,
        external_calendar_ref: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: ProviderId::new(),
            organization_id,
            name: name.into(),
            provider_type,
            enabled: true,
            sync_direction,
            external_calendar_ref: external_calendar_ref.into(),
            credentials: ProviderCredentials::new(),
            last_sync_at: None,
            links: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: ProviderCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &SyncConflict> {
        self.conflicts.iter().filter(|c| !c.resolved)
    }

    pub fn has_unresolved_conflicts(&self) -> bool {
        self.unresolved_conflicts().next().is_some()
    }
}

/// Time range a pass reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn around(now: DateTime<Utc>, past: Duration, future: Duration) -> Self {
        Self {
            start: now - past,
            end: now + future,
        }
    }

    /// Whether a record overlaps the window.
    pub fn overlaps(&self, fields: &RecordFields) -> bool {
        fields.starts_at < self.end && fields.ends_at > self.start
    }
}

/// Per-provider engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SyncState {
    Idle,
    Syncing,
    /// Last pass finished with unresolved conflicts.
    Conflict,
    /// Last pass aborted; nothing was written locally.
    Error { message: String },
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub created_local: usize,
    pub updated_local: usize,
    pub deleted_local: usize,
    pub created_external: usize,
    pub updated_external: usize,
    pub deleted_external: usize,
    /// Conflicts first detected during this pass.
    pub conflicts_detected: usize,
    /// Conflicts settled during this pass (policy, convergence or a person).
    pub conflicts_settled: usize,
    /// Unresolved conflicts left after the pass.
    pub conflicts_open: usize,
}

impl SyncReport {
    pub fn local_writes(&self) -> usize {
        self.created_local + self.updated_local + self.deleted_local
    }

    pub fn external_writes(&self) -> usize {
        self.created_external + self.updated_external + self.deleted_external
    }
}
