//! The artifact store contract.

use async_trait::async_trait;

use crate::error::StoreError;

/// Entry suffix under which a definition's binary is stored.
pub(crate) const BINARIES_ENTRY: &str = "binaries";

/// Opaque binary blobs keyed by vertex-definition name.
///
/// Entries live in the `cra` container under `<definition>/binaries`.
/// The store never interprets the bytes; packaging and loading of the
/// binaries is the caller's concern.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Uploads (or replaces) the binary for a definition.
    async fn upload(&self, definition: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Downloads the binary for a definition, if present.
    async fn download(&self, definition: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Deletes the binary for a definition; returns whether it existed.
    async fn delete(&self, definition: &str) -> Result<bool, StoreError>;

    /// Removes every entry in the container.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Full entry path for a definition's binary.
pub(crate) fn entry_path(definition: &str) -> String {
    format!("{definition}/{BINARIES_ENTRY}")
}
