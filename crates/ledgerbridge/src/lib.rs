//! Reconciliation engine between a local system of record and a remote
//! commerce catalog.
//!
//! A *cycle* pairs one entity across both sides, decides which side is
//! authoritative, applies the change and commits the sync marker. Sweeps run
//! one cycle per remote record modified since a persisted cursor.

pub mod config;
pub mod core;
pub mod field_map;
pub mod queue;
pub mod service;
pub mod storage;
pub mod sync;

pub mod testing;

pub use ledgerbridge_api::SyncError;

pub use config::{ServerConfig, SyncConfig, SyncSettings};
pub use crate::core::traits::{CursorKind, CursorStore, ListQuery, LocalStore, RemoteCatalog};
pub use service::{Dispatch, SyncResponse, SyncService, SyncTarget};
pub use sync::conflict::Action;
pub use sync::outcome::{CycleOutcome, SweepReport};

pub type Result<T> = std::result::Result<T, SyncError>;
