//! Persistent storage abstractions for the dataflow fabric.
//!
//! All cluster topology lives in an external *table service*: a set of
//! named tables of `(partition, row) -> value` entries with strongly
//! consistent single-row operations and eventually consistent scans.
//! Vertex binaries live next to it in an *artifact store* keyed by
//! definition name.
//!
//! Two backends ship with the crate: an in-memory one for tests and
//! single-node bring-up, and a Valkey/Redis one selected by the
//! `CRA_STORAGE_CONN_STRING` connection string.

mod artifact;
mod config;
mod error;
mod table;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "valkey")]
mod valkey;

pub use artifact::ArtifactStore;
pub use config::{StorageConfig, StorageProvider, STORAGE_CONN_STRING_KEY};
pub use error::StoreError;
pub use table::{delete_rows, TableEntry, TableService, DELETE_BATCH_SIZE};

#[cfg(feature = "memory")]
pub use memory::{MemoryArtifactStore, MemoryTableService};

#[cfg(feature = "valkey")]
pub use valkey::{ValkeyArtifactStore, ValkeyTableService};
