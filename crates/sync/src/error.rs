//! Sync-side error taxonomy.

use std::time::Duration;

use thiserror::Error;
use tradeflow_core::{ConflictId, DomainError, ProviderId};

use crate::adapter::{AdapterError, LocalStoreError};
use crate::kv::KvError;
use crate::types::ProviderType;

/// Registry failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("provider {0} is not registered")]
    ProviderNotFound(ProviderId),

    #[error("conflict {conflict_id} not found on provider {provider_id}")]
    ConflictNotFound {
        provider_id: ProviderId,
        conflict_id: ConflictId,
    },

    #[error(transparent)]
    Validation(#[from] DomainError),

    /// Durable storage failed. Mutations log this and keep the in-memory
    /// state; only loading surfaces it.
    #[error("persistence failure: {0}")]
    Persistence(#[from] KvError),

    #[error("stored provider list is unreadable: {0}")]
    Corrupt(String),
}

/// Why a sync pass did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("a sync pass for provider {0} is already running")]
    AlreadySyncing(ProviderId),

    #[error("provider {0} is disabled")]
    ProviderDisabled(ProviderId),

    #[error("no adapter registered for {}", .0.as_str())]
    NoAdapter(ProviderType),

    #[error("provider unreachable: {0}")]
    Transport(String),

    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("local record store failure: {0}")]
    LocalStore(#[from] LocalStoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SyncError {
    /// Failures worth retrying on the next scheduled pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Timeout(_) | SyncError::AlreadySyncing(_)
        )
    }
}

impl From<AdapterError> for SyncError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Unreachable(msg) | AdapterError::Rejected(msg) => SyncError::Transport(msg),
            AdapterError::Unauthorized(msg) => SyncError::Unauthorized(msg),
        }
    }
}
