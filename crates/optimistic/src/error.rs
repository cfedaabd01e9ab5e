//! Errors surfaced by the mutation executor.

use std::time::Duration;

use thiserror::Error;
use tradeflow_core::{DomainError, ItemId};

use crate::remote::RemoteError;

/// Every failure of [`crate::MutationExecutor::execute`] is classified here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// Preconditions failed; nothing was published, nothing to roll back.
    #[error(transparent)]
    Validation(#[from] DomainError),

    /// The remote rejected the change; the provisional change was rolled back.
    #[error("remote operation failed: {0}")]
    MutationFailed(RemoteError),

    /// The remote did not answer in time; the provisional change was rolled back.
    #[error("remote operation timed out after {0:?}")]
    TimedOut(Duration),

    /// The action targets an item whose creation was never confirmed.
    #[error("item {0} was never confirmed by the server")]
    UnresolvedReference(ItemId),

    /// The remote answered with something that cannot be reconciled.
    #[error("invalid remote response: {0}")]
    InvalidResponse(String),
}

impl MutationError {
    /// Whether a provisional change was published and then discarded.
    pub fn rolled_back(&self) -> bool {
        !matches!(self, MutationError::Validation(_))
    }
}
