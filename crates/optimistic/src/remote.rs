//! Remote collaborators that confirm optimistic actions.

use async_trait::async_trait;
use thiserror::Error;
use tradeflow_core::ItemId;

use crate::record::Record;
use crate::types::IdempotencyKey;

/// Failure reported by a remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The server refused the change (validation, permissions, conflict).
    #[error("rejected by server: {0}")]
    Rejected(String),
    /// The server could not be reached or answered with a transient failure.
    #[error("server unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    /// Transient failures may be retried; rejections never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// Server-side operations on one collection, injected by the caller.
///
/// Ids passed in are always permanent: the executor resolves provisional ids
/// before calling out.
#[async_trait]
pub trait RemoteCollection<T: Record>: Send + Sync {
    /// Create `item`. Repeated calls with the same `idempotency_key` must not
    /// create duplicates.
    async fn add(&self, item: T, idempotency_key: IdempotencyKey) -> Result<T, RemoteError>;

    async fn update(&self, id: ItemId, patch: T::Patch) -> Result<T, RemoteError>;

    async fn delete(&self, id: ItemId) -> Result<(), RemoteError>;

    /// Persist a full ordering; returns the server's canonical order.
    async fn reorder(&self, order: Vec<ItemId>) -> Result<Vec<T>, RemoteError>;
}
