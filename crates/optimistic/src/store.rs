//! Per-cache-key confirmed state plus pending mutations.
//!
//! The displayed collection is never patched in place. It is recomputed as
//! `confirmed` folded through every pending mutation in submission order, so
//! discarding one mutation cannot disturb another that is still in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, Notify};
use tradeflow_core::{CacheKey, DomainResult, ItemId};

use crate::record::Record;
use crate::types::{resolve, ActionKind, Mutation, SnapshotChange, SnapshotEvent};

const EVENT_CAPACITY: usize = 256;

/// Server-confirmed result to fold into the confirmed collection.
#[derive(Debug, Clone)]
pub(crate) enum Confirmation<T> {
    Added { provisional: ItemId, item: T },
    Updated { item: T },
    Deleted { id: ItemId },
    Reordered { items: Vec<T> },
}

#[derive(Debug)]
struct PendingOp<T: Record> {
    seq: u64,
    mutation: Mutation<T>,
}

#[derive(Debug)]
struct Entry<T: Record> {
    confirmed: Vec<T>,
    pending: VecDeque<PendingOp<T>>,
    displayed: Vec<T>,
    /// provisional id → server id, for adds that have been confirmed.
    aliases: HashMap<ItemId, ItemId>,
    revision: u64,
    turn: Arc<Notify>,
}

impl<T: Record> Entry<T> {
    fn new() -> Self {
        Self {
            confirmed: Vec::new(),
            pending: VecDeque::new(),
            displayed: Vec::new(),
            aliases: HashMap::new(),
            revision: 0,
            turn: Arc::new(Notify::new()),
        }
    }

    fn recompute(&mut self) {
        let mut view = self.confirmed.clone();
        for op in &self.pending {
            op.mutation.apply(&mut view, &self.aliases);
        }
        self.displayed = view;
        self.revision += 1;
    }
}

/// Handle for a mutation that has been published but not yet settled.
#[derive(Debug, Clone)]
pub(crate) struct Ticket {
    pub seq: u64,
    pub turn: Arc<Notify>,
}

/// Holds, per cache key, the last-confirmed collection and the displayed one.
///
/// Cheap to share behind an `Arc`; the internal lock is never held across an
/// `.await`.
#[derive(Debug)]
pub struct SnapshotStore<T: Record> {
    entries: Mutex<HashMap<CacheKey, Entry<T>>>,
    next_seq: AtomicU64,
    events: broadcast::Sender<SnapshotEvent>,
}

impl<T: Record> SnapshotStore<T> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry<T>>> {
        // A panic while holding the lock cannot leave an entry half-updated:
        // every mutation recomputes `displayed` from scratch.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, cache_key: &CacheKey, revision: u64, change: SnapshotChange) {
        // No subscribers is fine.
        let _ = self.events.send(SnapshotEvent {
            cache_key: cache_key.clone(),
            revision,
            change,
        });
    }

    /// Replace the confirmed collection with a fresh server listing.
    ///
    /// Pending mutations stay queued and are re-applied on top.
    pub fn load(&self, cache_key: &CacheKey, items: Vec<T>) {
        let revision = {
            let mut entries = self.lock();
            let entry = entries.entry(cache_key.clone()).or_insert_with(Entry::new);
            entry.confirmed = items;
            entry.recompute();
            entry.revision
        };
        tracing::debug!(cache_key = %cache_key, revision, "snapshot loaded");
        self.publish(cache_key, revision, SnapshotChange::Loaded);
    }

    /// What readers should render right now (may include provisional items).
    pub fn displayed(&self, cache_key: &CacheKey) -> Vec<T> {
        self.lock()
            .get(cache_key)
            .map(|e| e.displayed.clone())
            .unwrap_or_default()
    }

    /// The last server-confirmed collection.
    pub fn confirmed(&self, cache_key: &CacheKey) -> Vec<T> {
        self.lock()
            .get(cache_key)
            .map(|e| e.confirmed.clone())
            .unwrap_or_default()
    }

    /// Number of mutations published but not yet confirmed or rolled back.
    pub fn pending_count(&self, cache_key: &CacheKey) -> usize {
        self.lock().get(cache_key).map(|e| e.pending.len()).unwrap_or(0)
    }

    /// True when the displayed collection equals the confirmed one.
    pub fn is_settled(&self, cache_key: &CacheKey) -> bool {
        self.pending_count(cache_key) == 0
    }

    /// Revision counter of the displayed collection (0 if never touched).
    pub fn revision(&self, cache_key: &CacheKey) -> u64 {
        self.lock().get(cache_key).map(|e| e.revision).unwrap_or(0)
    }

    /// Map a possibly-provisional id to the id readers should use now.
    pub fn resolve_id(&self, cache_key: &CacheKey, id: &ItemId) -> ItemId {
        self.lock()
            .get(cache_key)
            .map(|e| resolve(&e.aliases, id).clone())
            .unwrap_or_else(|| id.clone())
    }

    /// Subscribe to displayed-collection changes across all cache keys.
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotEvent> {
        self.events.subscribe()
    }

    /// Validate and publish a provisional mutation.
    pub(crate) fn begin(&self, cache_key: &CacheKey, mutation: Mutation<T>) -> DomainResult<Ticket> {
        let kind = mutation.kind();
        let (ticket, revision) = {
            let mut entries = self.lock();
            let entry = entries.entry(cache_key.clone()).or_insert_with(Entry::new);
            mutation.check(&entry.displayed, &entry.aliases)?;

            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            entry.pending.push_back(PendingOp { seq, mutation });
            entry.recompute();
            (
                Ticket {
                    seq,
                    turn: entry.turn.clone(),
                },
                entry.revision,
            )
        };
        self.publish(cache_key, revision, SnapshotChange::Provisional(kind));
        Ok(ticket)
    }

    /// Whether `seq` is the oldest pending mutation of its key.
    pub(crate) fn is_head(&self, cache_key: &CacheKey, seq: u64) -> bool {
        self.lock()
            .get(cache_key)
            .and_then(|e| e.pending.front())
            .is_some_and(|op| op.seq == seq)
    }

    /// Resolve ids through the alias table; `Err` carries the first id that is
    /// still provisional.
    pub(crate) fn resolve_permanent(&self, cache_key: &CacheKey, ids: &[ItemId]) -> Result<Vec<ItemId>, ItemId> {
        let entries = self.lock();
        let aliases = entries.get(cache_key).map(|e| &e.aliases);
        ids.iter()
            .map(|id| {
                let resolved = aliases.map(|a| resolve(a, id)).unwrap_or(id);
                if resolved.is_provisional() {
                    Err(id.clone())
                } else {
                    Ok(resolved.clone())
                }
            })
            .collect()
    }

    /// Fold a server result into the confirmed collection and retire `seq`.
    pub(crate) fn confirm(&self, cache_key: &CacheKey, seq: u64, kind: ActionKind, confirmation: Confirmation<T>) {
        let (revision, turn) = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(cache_key) else {
                return;
            };

            match confirmation {
                Confirmation::Added { provisional, item } => {
                    let id = item.id().clone();
                    match entry.confirmed.iter_mut().find(|it| *it.id() == id) {
                        Some(existing) => *existing = item,
                        None => entry.confirmed.push(item),
                    }
                    entry.aliases.insert(provisional, id);
                }
                Confirmation::Updated { item } => {
                    let id = item.id().clone();
                    match entry.confirmed.iter_mut().find(|it| *it.id() == id) {
                        Some(existing) => *existing = item,
                        None => tracing::debug!(cache_key = %cache_key, item_id = %id, "confirmed update for item absent from snapshot"),
                    }
                }
                Confirmation::Deleted { id } => {
                    entry.confirmed.retain(|it| *it.id() != id);
                }
                Confirmation::Reordered { items } => {
                    entry.confirmed = items;
                }
            }

            entry.pending.retain(|op| op.seq != seq);
            entry.recompute();
            (entry.revision, entry.turn.clone())
        };
        turn.notify_waiters();
        self.publish(cache_key, revision, SnapshotChange::Confirmed(kind));
    }

    /// Discard the provisional mutation `seq`; other pending mutations survive.
    pub(crate) fn rollback(&self, cache_key: &CacheKey, seq: u64, kind: ActionKind) {
        let (revision, turn) = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(cache_key) else {
                return;
            };
            let before = entry.pending.len();
            entry.pending.retain(|op| op.seq != seq);
            if entry.pending.len() == before {
                return;
            }
            entry.recompute();
            (entry.revision, entry.turn.clone())
        };
        turn.notify_waiters();
        self.publish(cache_key, revision, SnapshotChange::RolledBack(kind));
    }
}

impl<T: Record> Default for SnapshotStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
