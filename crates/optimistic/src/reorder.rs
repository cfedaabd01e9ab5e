//! Drag-reorder as an index permutation.

use std::sync::Arc;

use tradeflow_core::{CacheKey, DomainError, ItemId};

use crate::error::MutationError;
use crate::executor::MutationExecutor;
use crate::record::Record;
use crate::remote::RemoteCollection;
use crate::types::{Action, ActionOutcome, Mutation};

/// Permutation of `0..len` after moving the element at `from` to `to`.
///
/// `result[i]` is the original index of the element now at position `i`.
/// Callers validate the bounds; out-of-range indices are clamped.
pub fn move_index(len: usize, from: usize, to: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if len == 0 || from >= len {
        return order;
    }
    let moved = order.remove(from);
    order.insert(to.min(len - 1), moved);
    order
}

/// Remove the element at `from` and insert it at `to`.
pub fn move_item<U: Clone>(items: &[U], from: usize, to: usize) -> Vec<U> {
    move_index(items.len(), from, to)
        .into_iter()
        .map(|i| items[i].clone())
        .collect()
}

/// Turns `(from, to)` gestures into queued reorder actions.
pub struct ReorderCoordinator<T: Record> {
    executor: MutationExecutor<T>,
}

impl<T: Record> ReorderCoordinator<T> {
    pub fn new(executor: MutationExecutor<T>) -> Self {
        Self { executor }
    }

    /// Move the displayed item at `from_index` to `to_index`.
    ///
    /// Returns the server's canonical order on success. Moving an item onto
    /// its own index returns the current collection without calling out.
    pub async fn reorder(
        &self,
        cache_key: &CacheKey,
        from_index: usize,
        to_index: usize,
        remote: Arc<dyn RemoteCollection<T>>,
    ) -> Result<Vec<T>, MutationError> {
        let displayed = self.executor.store().displayed(cache_key);
        let len = displayed.len();
        if from_index >= len || to_index >= len {
            return Err(MutationError::Validation(DomainError::validation(format!(
                "reorder {from_index} -> {to_index} out of range for {len} items"
            ))));
        }
        if from_index == to_index {
            tracing::debug!(cache_key = %cache_key, index = from_index, "reorder onto same index; nothing to do");
            return Ok(displayed);
        }

        let order: Vec<ItemId> = move_item(&displayed, from_index, to_index)
            .iter()
            .map(|it| it.id().clone())
            .collect();

        let action = Action::new(cache_key.clone(), Mutation::Reorder { order }, remote);
        match self.executor.execute(action).await? {
            ActionOutcome::Reordered(items) => Ok(items),
            other => Err(MutationError::InvalidResponse(format!(
                "reorder settled as {other:?}"
            ))),
        }
    }
}
