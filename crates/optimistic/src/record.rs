//! Items tracked by the snapshot store.

use tradeflow_core::{DomainResult, Entity, ItemId};

/// An item of an optimistically edited collection.
///
/// The identifier must be stable: pending mutations locate their target by id,
/// never by position.
pub trait Record: Entity<Id = ItemId> + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Partial update applied by [`crate::Mutation::Update`].
    type Patch: Clone + core::fmt::Debug + Send + Sync + 'static;

    /// Replace the identifier (used to stamp provisional ids on new items).
    fn set_id(&mut self, id: ItemId);

    /// Apply a patch in place. Must be pure and deterministic.
    fn apply_patch(&mut self, patch: &Self::Patch);

    /// Precondition checks run before any provisional change is published.
    fn validate(&self) -> DomainResult<()> {
        Ok(())
    }
}
