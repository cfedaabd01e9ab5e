//! `tradeflow-core`: shared identifiers and domain errors.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CacheKey, ConflictId, ItemId, OrganizationId, ProviderId, TemplateId, PROVISIONAL_ID_PREFIX};
