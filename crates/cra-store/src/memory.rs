//! In-memory backends for testing and single-node bring-up.
//!
//! Data is lost when the process exits; production deployments use
//! the Valkey backend.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::artifact::{entry_path, ArtifactStore};
use crate::error::StoreError;
use crate::table::{TableEntry, TableService};

/// In-memory table service.
#[derive(Debug, Default)]
pub struct MemoryTableService {
    tables: DashMap<String, DashMap<(String, String), TableEntry>>,
}

impl MemoryTableService {
    /// Creates a new empty table service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableService for MemoryTableService {
    async fn upsert(
        &self,
        table: &str,
        partition: &str,
        row: &str,
        value: &[u8],
    ) -> Result<(), StoreError> {
        let table = self.tables.entry(table.to_owned()).or_default();
        let key = (partition.to_owned(), row.to_owned());

        // Replacement keeps the original insertion timestamp.
        let created_at = table
            .get(&key)
            .map_or_else(Utc::now, |existing| existing.created_at);

        table.insert(
            key,
            TableEntry {
                partition: partition.to_owned(),
                row: row.to_owned(),
                value: value.to_vec(),
                created_at,
            },
        );

        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<Option<TableEntry>, StoreError> {
        let Some(table) = self.tables.get(table) else {
            return Ok(None);
        };

        Ok(table
            .get(&(partition.to_owned(), row.to_owned()))
            .map(|entry| entry.clone()))
    }

    async fn delete(&self, table: &str, partition: &str, row: &str) -> Result<bool, StoreError> {
        let Some(table) = self.tables.get(table) else {
            return Ok(false);
        };

        Ok(table
            .remove(&(partition.to_owned(), row.to_owned()))
            .is_some())
    }

    async fn scan(
        &self,
        table: &str,
        partition: Option<&str>,
    ) -> Result<Vec<TableEntry>, StoreError> {
        let Some(table) = self.tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<TableEntry> = table
            .iter()
            .filter(|entry| partition.map_or(true, |p| entry.key().0 == p))
            .map(|entry| entry.value().clone())
            .collect();

        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.partition.cmp(&b.partition))
                .then_with(|| a.row.cmp(&b.row))
        });

        Ok(entries)
    }

    async fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        self.tables.remove(table);
        Ok(())
    }
}

/// In-memory artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryArtifactStore {
    /// Creates a new empty artifact store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn upload(&self, definition: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(entry_path(definition), bytes.to_vec());
        Ok(())
    }

    async fn download(&self, definition: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .entries
            .get(&entry_path(definition))
            .map(|entry| entry.clone()))
    }

    async fn delete(&self, definition: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(&entry_path(definition)).is_some())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }
}
