//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Collections tracked by the snapshot store are ordered sequences of entities;
/// the identifier is what lets a pending mutation find its target again after
/// other mutations have reshaped the list.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
