//! Provisional identifier generation.

use std::sync::atomic::{AtomicU64, Ordering};

use tradeflow_core::ItemId;
use uuid::Uuid;

/// Source of provisional item ids (`temp-…`).
pub trait ProvisionalIdGenerator: Send + Sync {
    fn next_id(&self) -> ItemId;
}

/// Process-local counter: `temp-1`, `temp-2`, …
///
/// Collision-free within one generator instance; share the instance across
/// executors that write to the same collection.
#[derive(Debug)]
pub struct MonotonicIdGenerator {
    next: AtomicU64,
}

impl MonotonicIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for MonotonicIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionalIdGenerator for MonotonicIdGenerator {
    fn next_id(&self) -> ItemId {
        ItemId::provisional(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// UUIDv7-suffixed ids, unique across processes and sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl ProvisionalIdGenerator for UuidIdGenerator {
    fn next_id(&self) -> ItemId {
        ItemId::provisional(Uuid::now_v7())
    }
}
