//! `tradeflow-optimistic`
//!
//! **Responsibility:** optimistic list editing with exact rollback.
//!
//! This crate provides:
//! - [`SnapshotStore`]: per cache key, the confirmed collection plus the ordered
//!   set of still-pending mutations; the displayed collection is always derived
//!   from the two
//! - [`MutationExecutor`]: publish a provisional change, call the remote
//!   collaborator (FIFO per cache key), then confirm or roll back
//! - [`ReorderCoordinator`]: drag-reorder expressed as an index permutation
//!
//! Remote collaborators are injected through [`RemoteCollection`]; nothing in
//! here knows about HTTP or a UI runtime.

pub mod config;
pub mod error;
pub mod executor;
pub mod id_gen;
pub mod record;
pub mod remote;
pub mod reorder;
pub mod store;
pub mod types;

pub use config::MutationConfig;
pub use error::MutationError;
pub use executor::MutationExecutor;
pub use id_gen::{MonotonicIdGenerator, ProvisionalIdGenerator, UuidIdGenerator};
pub use record::Record;
pub use remote::{RemoteCollection, RemoteError};
pub use reorder::{move_index, move_item, ReorderCoordinator};
pub use store::SnapshotStore;
pub use types::{Action, ActionKind, ActionOutcome, IdempotencyKey, Mutation, SnapshotChange, SnapshotEvent};
