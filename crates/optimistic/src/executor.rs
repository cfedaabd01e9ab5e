//! Optimistic mutation executor.
//!
//! Publish the provisional change first, confirm it remotely second. Remote
//! calls for one cache key run strictly in submission order; different keys
//! never wait on each other.

use std::future::Future;
use std::sync::Arc;

use tradeflow_core::{CacheKey, DomainError, ItemId};

use crate::config::MutationConfig;
use crate::error::MutationError;
use crate::id_gen::{MonotonicIdGenerator, ProvisionalIdGenerator};
use crate::record::Record;
use crate::remote::RemoteError;
use crate::store::{Confirmation, SnapshotStore, Ticket};
use crate::types::{Action, ActionKind, ActionOutcome, IdempotencyKey, Mutation};

/// Applies actions optimistically against a shared [`SnapshotStore`].
pub struct MutationExecutor<T: Record> {
    store: Arc<SnapshotStore<T>>,
    ids: Arc<dyn ProvisionalIdGenerator>,
    config: MutationConfig,
}

impl<T: Record> Clone for MutationExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ids: self.ids.clone(),
            config: self.config.clone(),
        }
    }
}

/// Rolls the pending mutation back if the executing future is dropped before
/// it settles, so an abandoned call cannot block its cache key forever.
struct InFlight<'a, T: Record> {
    store: &'a SnapshotStore<T>,
    cache_key: &'a CacheKey,
    seq: u64,
    kind: ActionKind,
    settled: bool,
}

impl<T: Record> InFlight<'_, T> {
    fn confirm(mut self, confirmation: Confirmation<T>) {
        self.store.confirm(self.cache_key, self.seq, self.kind, confirmation);
        self.settled = true;
    }

    fn rollback(mut self) {
        self.store.rollback(self.cache_key, self.seq, self.kind);
        self.settled = true;
    }
}

impl<T: Record> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(cache_key = %self.cache_key, seq = self.seq, "mutation abandoned before settling; rolling back");
            self.store.rollback(self.cache_key, self.seq, self.kind);
        }
    }
}

impl<T: Record> MutationExecutor<T> {
    pub fn new(store: Arc<SnapshotStore<T>>) -> Self {
        Self::with_parts(store, Arc::new(MonotonicIdGenerator::new()), MutationConfig::default())
    }

    pub fn with_parts(store: Arc<SnapshotStore<T>>, ids: Arc<dyn ProvisionalIdGenerator>, config: MutationConfig) -> Self {
        Self { store, ids, config }
    }

    pub fn with_config(mut self, config: MutationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<SnapshotStore<T>> {
        &self.store
    }

    pub fn config(&self) -> &MutationConfig {
        &self.config
    }

    /// Apply `action` provisionally, then confirm it with its remote.
    ///
    /// On any remote failure the provisional change is discarded before the
    /// error is returned; the displayed collection is then exactly what it
    /// would be had the action never been submitted.
    pub async fn execute(&self, action: Action<T>) -> Result<ActionOutcome<T>, MutationError> {
        let Action {
            cache_key,
            mutation,
            remote,
        } = action;
        let kind = mutation.kind();

        let mut idempotency_key = None;
        let mutation = match mutation {
            Mutation::Add { mut item } => {
                item.set_id(self.ids.next_id());
                idempotency_key = Some(IdempotencyKey::new());
                Mutation::Add { item }
            }
            other => other,
        };

        let ticket = match self.store.begin(&cache_key, mutation.clone()) {
            Ok(ticket) => ticket,
            Err(err) => {
                tracing::debug!(cache_key = %cache_key, kind = kind.as_str(), error = %err, "action rejected before publishing");
                return Err(MutationError::Validation(err));
            }
        };
        tracing::debug!(cache_key = %cache_key, kind = kind.as_str(), seq = ticket.seq, "provisional change published");

        let in_flight = InFlight {
            store: &self.store,
            cache_key: &cache_key,
            seq: ticket.seq,
            kind,
            settled: false,
        };

        self.wait_turn(&cache_key, &ticket).await;

        let result = match mutation {
            Mutation::Add { item } => {
                let provisional = item.id().clone();
                let key = idempotency_key.unwrap_or_default();
                self.call(|| remote.add(item.clone(), key)).await.and_then(|confirmed| {
                    ItemId::parse_authoritative(confirmed.id().as_str())
                        .map_err(|e| MutationError::InvalidResponse(e.to_string()))?;
                    Ok((
                        Confirmation::Added {
                            provisional,
                            item: confirmed.clone(),
                        },
                        ActionOutcome::Added(confirmed),
                    ))
                })
            }
            Mutation::Update { id, patch } => match self.permanent_id(&cache_key, &id) {
                Ok(target) => self.call(|| remote.update(target.clone(), patch.clone())).await.and_then(|confirmed| {
                    if *confirmed.id() != target {
                        return Err(MutationError::InvalidResponse(format!(
                            "update of {target} answered with item {}",
                            confirmed.id()
                        )));
                    }
                    Ok((
                        Confirmation::Updated { item: confirmed.clone() },
                        ActionOutcome::Updated(confirmed),
                    ))
                }),
                Err(err) => Err(err),
            },
            Mutation::Delete { id } => match self.permanent_id(&cache_key, &id) {
                Ok(target) => self
                    .call(|| remote.delete(target.clone()))
                    .await
                    .map(|()| (Confirmation::Deleted { id: target.clone() }, ActionOutcome::Deleted(target))),
                Err(err) => Err(err),
            },
            Mutation::Reorder { order } => match self.store.resolve_permanent(&cache_key, &order) {
                Ok(order) => self.call(|| remote.reorder(order.clone())).await.and_then(|items| {
                    if let Some(bad) = items.iter().find(|it| it.id().is_provisional()) {
                        return Err(MutationError::InvalidResponse(format!(
                            "canonical order contains provisional id {}",
                            bad.id()
                        )));
                    }
                    Ok((
                        Confirmation::Reordered { items: items.clone() },
                        ActionOutcome::Reordered(items),
                    ))
                }),
                Err(unresolved) => Err(MutationError::UnresolvedReference(unresolved)),
            },
        };

        match result {
            Ok((confirmation, outcome)) => {
                in_flight.confirm(confirmation);
                tracing::debug!(cache_key = %cache_key, kind = kind.as_str(), seq = ticket.seq, "action confirmed");
                Ok(outcome)
            }
            Err(err) => {
                in_flight.rollback();
                tracing::warn!(cache_key = %cache_key, kind = kind.as_str(), seq = ticket.seq, error = %err, "action rolled back");
                Err(err)
            }
        }
    }

    /// Suspend until every earlier mutation on this key has settled.
    async fn wait_turn(&self, cache_key: &CacheKey, ticket: &Ticket) {
        loop {
            // Register interest before checking, so a notify between the check
            // and the await is not lost.
            let notified = ticket.turn.notified();
            if self.store.is_head(cache_key, ticket.seq) {
                return;
            }
            notified.await;
        }
    }

    fn permanent_id(&self, cache_key: &CacheKey, id: &ItemId) -> Result<ItemId, MutationError> {
        self.store
            .resolve_permanent(cache_key, std::slice::from_ref(id))
            .map_err(MutationError::UnresolvedReference)
            .and_then(|mut ids| {
                ids.pop()
                    .ok_or_else(|| MutationError::Validation(DomainError::not_found(format!("item {id}"))))
            })
    }

    /// One remote call with timeout and bounded, backed-off retries.
    async fn call<R, F, Fut>(&self, mut attempt: F) -> Result<R, MutationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, RemoteError>>,
    {
        let mut delay = self.config.retry_backoff;
        let mut tries = 0u32;

        loop {
            let err = match tokio::time::timeout(self.config.remote_timeout, attempt()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if !err.is_retryable() => return Err(MutationError::MutationFailed(err)),
                Ok(Err(err)) => MutationError::MutationFailed(err),
                Err(_) => MutationError::TimedOut(self.config.remote_timeout),
            };

            if tries >= self.config.max_retries {
                return Err(err);
            }
            tries += 1;
            tracing::warn!(attempt = tries, error = %err, "remote call failed, retrying in {:?}", delay);
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}
