//! Action descriptors and snapshot events.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tradeflow_core::{CacheKey, DomainError, DomainResult, ItemId};
use uuid::Uuid;

use crate::record::Record;
use crate::remote::RemoteCollection;

/// Kind of an optimistic action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Add,
    Update,
    Delete,
    Reorder,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Add => "add",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::Reorder => "reorder",
        }
    }
}

/// Token carried from a provisional add through every remote attempt, so a
/// retried add can be de-duplicated by the server.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// The provisional transformation of an action, as data.
///
/// Applying a mutation never awaits anything; ids are looked up through the
/// alias table so a mutation queued against a provisional id keeps working
/// after the add that minted it is confirmed.
#[derive(Debug, Clone)]
pub enum Mutation<T: Record> {
    Add { item: T },
    Update { id: ItemId, patch: T::Patch },
    Delete { id: ItemId },
    /// Full ordering of the collection, first to last.
    Reorder { order: Vec<ItemId> },
}

impl<T: Record> Mutation<T> {
    pub fn kind(&self) -> ActionKind {
        match self {
            Mutation::Add { .. } => ActionKind::Add,
            Mutation::Update { .. } => ActionKind::Update,
            Mutation::Delete { .. } => ActionKind::Delete,
            Mutation::Reorder { .. } => ActionKind::Reorder,
        }
    }

    /// Precondition checks against the currently displayed collection.
    pub(crate) fn check(&self, displayed: &[T], aliases: &HashMap<ItemId, ItemId>) -> DomainResult<()> {
        match self {
            Mutation::Add { item } => item.validate(),
            Mutation::Update { id, patch } => {
                let target = resolve(aliases, id);
                let current = displayed
                    .iter()
                    .find(|it| it.id() == target)
                    .ok_or_else(|| DomainError::not_found(format!("item {id}")))?;
                let mut patched = current.clone();
                patched.apply_patch(patch);
                patched.validate()
            }
            Mutation::Delete { id } => {
                let target = resolve(aliases, id);
                if displayed.iter().any(|it| it.id() == target) {
                    Ok(())
                } else {
                    Err(DomainError::not_found(format!("item {id}")))
                }
            }
            Mutation::Reorder { order } => {
                if order.len() != displayed.len() {
                    return Err(DomainError::validation(format!(
                        "reorder lists {} ids but the collection holds {}",
                        order.len(),
                        displayed.len()
                    )));
                }
                let mut seen = std::collections::HashSet::with_capacity(order.len());
                for id in order {
                    let target = resolve(aliases, id);
                    if !seen.insert(target.clone()) || !displayed.iter().any(|it| it.id() == target) {
                        return Err(DomainError::validation(format!(
                            "reorder is not a permutation of the collection (at {id})"
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Apply this mutation to `items` in place.
    pub(crate) fn apply(&self, items: &mut Vec<T>, aliases: &HashMap<ItemId, ItemId>) {
        match self {
            Mutation::Add { item } => {
                let id = resolve(aliases, item.id());
                if !items.iter().any(|it| it.id() == id) {
                    items.push(item.clone());
                }
            }
            Mutation::Update { id, patch } => {
                let target = resolve(aliases, id);
                if let Some(it) = items.iter_mut().find(|it| it.id() == target) {
                    it.apply_patch(patch);
                }
            }
            Mutation::Delete { id } => {
                let target = resolve(aliases, id);
                items.retain(|it| it.id() != target);
            }
            Mutation::Reorder { order } => {
                let resolved: Vec<&ItemId> = order.iter().map(|id| resolve(aliases, id)).collect();
                apply_order(items, &resolved);
            }
        }
    }
}

/// Follow the provisional → permanent alias table.
pub(crate) fn resolve<'a>(aliases: &'a HashMap<ItemId, ItemId>, id: &'a ItemId) -> &'a ItemId {
    aliases.get(id).unwrap_or(id)
}

/// Sort `items` by their position in `order`.
///
/// Items missing from `order` (e.g. added after the reorder was submitted)
/// keep their relative order after the listed ones.
fn apply_order<T: Record>(items: &mut Vec<T>, order: &[&ItemId]) {
    let position: HashMap<&ItemId, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut indexed: Vec<(usize, usize, T)> = items
        .drain(..)
        .enumerate()
        .map(|(orig, it)| {
            let rank = position.get(it.id()).copied().unwrap_or(order.len());
            (rank, orig, it)
        })
        .collect();
    indexed.sort_by_key(|(rank, orig, _)| (*rank, *orig));
    items.extend(indexed.into_iter().map(|(_, _, it)| it));
}

/// An optimistic action: what to show now, and which remote to confirm it with.
pub struct Action<T: Record> {
    pub cache_key: CacheKey,
    pub mutation: Mutation<T>,
    pub remote: Arc<dyn RemoteCollection<T>>,
}

impl<T: Record> Action<T> {
    pub fn new(cache_key: impl Into<CacheKey>, mutation: Mutation<T>, remote: Arc<dyn RemoteCollection<T>>) -> Self {
        Self {
            cache_key: cache_key.into(),
            mutation,
            remote,
        }
    }

    pub fn add(cache_key: impl Into<CacheKey>, item: T, remote: Arc<dyn RemoteCollection<T>>) -> Self {
        Self::new(cache_key, Mutation::Add { item }, remote)
    }

    pub fn update(
        cache_key: impl Into<CacheKey>,
        id: ItemId,
        patch: T::Patch,
        remote: Arc<dyn RemoteCollection<T>>,
    ) -> Self {
        Self::new(cache_key, Mutation::Update { id, patch }, remote)
    }

    pub fn delete(cache_key: impl Into<CacheKey>, id: ItemId, remote: Arc<dyn RemoteCollection<T>>) -> Self {
        Self::new(cache_key, Mutation::Delete { id }, remote)
    }

    pub fn kind(&self) -> ActionKind {
        self.mutation.kind()
    }
}

/// What the server confirmed for an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome<T> {
    Added(T),
    Updated(T),
    Deleted(ItemId),
    Reordered(Vec<T>),
}

impl<T> ActionOutcome<T> {
    /// The confirmed item, for adds and updates.
    pub fn into_item(self) -> Option<T> {
        match self {
            ActionOutcome::Added(item) | ActionOutcome::Updated(item) => Some(item),
            _ => None,
        }
    }
}

/// What happened to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "kind")]
pub enum SnapshotChange {
    /// The confirmed collection was (re)loaded from the server.
    Loaded,
    /// A provisional change is now displayed.
    Provisional(ActionKind),
    /// The server confirmed a change.
    Confirmed(ActionKind),
    /// A change was discarded after the remote rejected it.
    RolledBack(ActionKind),
}

/// Broadcast to display layers whenever the displayed collection changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEvent {
    pub cache_key: CacheKey,
    /// Monotonic per cache key.
    pub revision: u64,
    pub change: SnapshotChange,
}
