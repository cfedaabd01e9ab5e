//! `tradeflow-sync`
//!
//! **Responsibility:** reconcile local records with external calendar /
//! work-order providers.
//!
//! This crate provides:
//! - [`SyncProviderRegistry`]: one persisted configuration per provider,
//!   including its external-reference links and conflict queue
//! - [`SyncEngine`]: one reconciliation pass per provider
//!   (`Idle → Syncing → {Idle, Conflict, Error}`)
//! - [`SyncScheduler`]: periodic passes over every enabled provider
//!
//! Provider transports, the local record store and durable storage are
//! injected ([`ProviderAdapter`], [`LocalRecordStore`], [`KeyValueStore`]).

pub mod adapter;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod kv;
pub mod registry;
pub mod scheduler;
pub mod sqlite_kv;
pub mod types;

pub use adapter::{
    AdapterError, ExternalBatch, InMemoryCalendar, InMemoryLocalRecordStore, LocalBatch, LocalRecordStore,
    LocalStoreError, PreparedLocalBatch, ProviderAdapter,
};
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{RegistryError, SyncError};
pub use kv::{InMemoryKeyValueStore, KeyValueStore, KvError};
pub use registry::{PassRecord, ProviderUpdate, SyncProviderRegistry};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use sqlite_kv::SqliteKeyValueStore;
pub use types::{
    ConflictResolution, ConflictType, ExternalId, ExternalRecord, LocalRecord, ProviderCredentials, ProviderType,
    RecordFields, SyncConflict, SyncDirection, SyncLink, SyncProviderConfig, SyncReport, SyncState, SyncWindow,
};
