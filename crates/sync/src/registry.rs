//! Per-organization registry of sync providers.
//!
//! The whole provider list (conflicts and links included) is persisted as
//! one JSON array under `sync_providers:{organization_id}`. Every mutation
//! writes through while the registry lock is still held, so storage sees
//! writes in the same order as memory.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tradeflow_core::{ConflictId, DomainError, OrganizationId, ProviderId};

use crate::error::RegistryError;
use crate::kv::KeyValueStore;
use crate::types::{
    ConflictResolution, ExternalId, ProviderCredentials, SyncConflict, SyncDirection, SyncLink, SyncProviderConfig,
};

/// Partial update of a provider's user-editable settings.
#[derive(Debug, Clone, Default)]
pub struct ProviderUpdate {
    pub enabled: Option<bool>,
    pub sync_direction: Option<SyncDirection>,
    pub name: Option<String>,
    pub credentials: Option<ProviderCredentials>,
}

impl ProviderUpdate {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn direction(direction: SyncDirection) -> Self {
        Self {
            sync_direction: Some(direction),
            ..Self::default()
        }
    }
}

/// Outcome of a sync pass, written back by the engine.
#[derive(Debug, Clone)]
pub struct PassRecord {
    pub links: Vec<SyncLink>,
    pub conflicts: Vec<SyncConflict>,
    pub last_sync_at: DateTime<Utc>,
}

pub struct SyncProviderRegistry {
    organization_id: OrganizationId,
    store: Arc<dyn KeyValueStore>,
    providers: Mutex<Vec<SyncProviderConfig>>,
}

impl SyncProviderRegistry {
    /// Empty registry; nothing is read from `store`.
    pub fn new(organization_id: OrganizationId, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            organization_id,
            store,
            providers: Mutex::new(Vec::new()),
        }
    }

    /// Registry restored from `store`.
    pub async fn load(organization_id: OrganizationId, store: Arc<dyn KeyValueStore>) -> Result<Self, RegistryError> {
        let providers = match store.get(&storage_key(organization_id)).await? {
            Some(raw) => serde_json::from_str::<Vec<SyncProviderConfig>>(&raw)
                .map_err(|e| RegistryError::Corrupt(e.to_string()))?,
            None => Vec::new(),
        };
        tracing::info!(
            organization_id = %organization_id,
            providers = providers.len(),
            "sync provider registry loaded"
        );
        Ok(Self {
            organization_id,
            store,
            providers: Mutex::new(providers),
        })
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    /// Add a provider, or update it in place if `provider_id` is already
    /// registered. Links, conflicts and `last_sync_at` of an existing entry
    /// are kept.
    pub async fn register(&self, config: SyncProviderConfig) -> Result<SyncProviderConfig, RegistryError> {
        self.validate(&config)?;

        let mut providers = self.providers.lock().await;
        let stored = match providers.iter_mut().find(|p| p.provider_id == config.provider_id) {
            Some(existing) => {
                existing.name = config.name;
                existing.provider_type = config.provider_type;
                existing.enabled = config.enabled;
                existing.sync_direction = config.sync_direction;
                existing.external_calendar_ref = config.external_calendar_ref;
                existing.credentials = config.credentials;
                existing.clone()
            }
            None => {
                providers.push(config.clone());
                config
            }
        };
        tracing::info!(provider_id = %stored.provider_id, provider_type = stored.provider_type.as_str(), "provider registered");
        self.persist(&providers).await;
        Ok(stored)
    }

    pub async fn update(&self, provider_id: ProviderId, update: ProviderUpdate) -> Result<SyncProviderConfig, RegistryError> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("provider name must not be empty").into());
            }
        }

        let mut providers = self.providers.lock().await;
        let provider = find_mut(&mut providers, provider_id)?;
        if let Some(enabled) = update.enabled {
            provider.enabled = enabled;
        }
        if let Some(direction) = update.sync_direction {
            provider.sync_direction = direction;
        }
        if let Some(name) = update.name {
            provider.name = name;
        }
        if let Some(credentials) = update.credentials {
            provider.credentials = credentials;
        }
        let updated = provider.clone();
        self.persist(&providers).await;
        Ok(updated)
    }

    pub async fn remove(&self, provider_id: ProviderId) -> Result<SyncProviderConfig, RegistryError> {
        let mut providers = self.providers.lock().await;
        let index = providers
            .iter()
            .position(|p| p.provider_id == provider_id)
            .ok_or(RegistryError::ProviderNotFound(provider_id))?;
        let removed = providers.remove(index);
        tracing::info!(provider_id = %provider_id, "provider removed");
        self.persist(&providers).await;
        Ok(removed)
    }

    pub async fn get(&self, provider_id: ProviderId) -> Option<SyncProviderConfig> {
        let providers = self.providers.lock().await;
        providers.iter().find(|p| p.provider_id == provider_id).cloned()
    }

    pub async fn list(&self) -> Vec<SyncProviderConfig> {
        self.providers.lock().await.clone()
    }

    pub async fn enabled_provider_ids(&self) -> Vec<ProviderId> {
        let providers = self.providers.lock().await;
        providers.iter().filter(|p| p.enabled).map(|p| p.provider_id).collect()
    }

    /// Conflicts awaiting a decision, oldest first.
    pub async fn unresolved_conflicts(&self, provider_id: ProviderId) -> Result<Vec<SyncConflict>, RegistryError> {
        let providers = self.providers.lock().await;
        let provider = providers
            .iter()
            .find(|p| p.provider_id == provider_id)
            .ok_or(RegistryError::ProviderNotFound(provider_id))?;
        Ok(provider.unresolved_conflicts().cloned().collect())
    }

    /// Record a person's decision. It is written to both sides on the next
    /// pass, and can be changed until then.
    pub async fn resolve_conflict(
        &self,
        provider_id: ProviderId,
        conflict_id: ConflictId,
        resolution: ConflictResolution,
    ) -> Result<SyncConflict, RegistryError> {
        if resolution == ConflictResolution::Converged {
            return Err(DomainError::validation("choose keep-local or keep-remote").into());
        }

        let mut providers = self.providers.lock().await;
        let provider = find_mut(&mut providers, provider_id)?;
        let conflict = provider
            .conflicts
            .iter_mut()
            .find(|c| c.id == conflict_id)
            .ok_or(RegistryError::ConflictNotFound {
                provider_id,
                conflict_id,
            })?;
        if conflict.applied_at.is_some() {
            return Err(DomainError::invariant(format!("conflict {conflict_id} is already settled")).into());
        }

        conflict.resolved = true;
        conflict.resolution = Some(resolution);
        conflict.resolved_at = Some(Utc::now());
        let resolved = conflict.clone();
        tracing::info!(provider_id = %provider_id, conflict_id = %conflict_id, resolution = ?resolution, "conflict resolved");
        self.persist(&providers).await;
        Ok(resolved)
    }

    /// Store the outcome of a sync pass.
    ///
    /// Decisions a person recorded while the pass was running are kept.
    pub async fn record_pass(&self, provider_id: ProviderId, pass: PassRecord) -> Result<SyncProviderConfig, RegistryError> {
        let mut providers = self.providers.lock().await;
        let provider = find_mut(&mut providers, provider_id)?;

        let mut conflicts = pass.conflicts;
        for conflict in conflicts.iter_mut().filter(|c| !c.resolved) {
            if let Some(current) = provider.conflicts.iter().find(|c| c.id == conflict.id && c.resolved) {
                conflict.resolved = true;
                conflict.resolution = current.resolution;
                conflict.resolved_at = current.resolved_at;
            }
        }

        provider.links = pass.links;
        provider.conflicts = conflicts;
        provider.last_sync_at = Some(pass.last_sync_at);
        let updated = provider.clone();
        self.persist(&providers).await;
        Ok(updated)
    }

    /// Repoint links and conflicts from old to new external ids, after the
    /// provider re-created events under fresh ids.
    pub async fn relink(&self, provider_id: ProviderId, moved: &[(ExternalId, ExternalId)]) -> Result<(), RegistryError> {
        if moved.is_empty() {
            return Ok(());
        }
        let mut providers = self.providers.lock().await;
        let provider = find_mut(&mut providers, provider_id)?;
        let new_id = |old: &ExternalId| moved.iter().find(|(from, _)| from == old).map(|(_, to)| to.clone());

        for link in provider.links.iter_mut() {
            if let Some(to) = new_id(&link.external_id) {
                link.external_id = to;
            }
        }
        for conflict in provider.conflicts.iter_mut() {
            if let Some(to) = conflict.remote_ref.as_ref().and_then(new_id) {
                conflict.remote_ref = Some(to);
            }
        }
        tracing::info!(provider_id = %provider_id, moved = moved.len(), "links repointed");
        self.persist(&providers).await;
        Ok(())
    }

    fn validate(&self, config: &SyncProviderConfig) -> Result<(), RegistryError> {
        if config.organization_id != self.organization_id {
            return Err(DomainError::validation(format!(
                "provider belongs to organization {}, registry to {}",
                config.organization_id, self.organization_id
            ))
            .into());
        }
        if config.name.trim().is_empty() {
            return Err(DomainError::validation("provider name must not be empty").into());
        }
        if config.external_calendar_ref.trim().is_empty() {
            return Err(DomainError::validation("external calendar reference must not be empty").into());
        }
        Ok(())
    }

    /// Write-through. A failed write keeps the in-memory state; the next
    /// mutation writes the full list again.
    async fn persist(&self, providers: &[SyncProviderConfig]) {
        let key = storage_key(self.organization_id);
        let payload = match serde_json::to_string(providers) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("failed to serialize providers for {key}: {err:?}");
                return;
            }
        };
        if let Err(err) = self.store.set(&key, payload).await {
            tracing::error!("failed to persist providers for {key}: {err}");
        }
    }
}

fn find_mut(providers: &mut [SyncProviderConfig], provider_id: ProviderId) -> Result<&mut SyncProviderConfig, RegistryError> {
    providers
        .iter_mut()
        .find(|p| p.provider_id == provider_id)
        .ok_or(RegistryError::ProviderNotFound(provider_id))
}

/// Storage key of an organization's provider list.
pub fn storage_key(organization_id: OrganizationId) -> String {
    format!("sync_providers:{organization_id}")
}
