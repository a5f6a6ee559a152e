//! The abstract table service contract.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use crate::error::StoreError;

/// Rows deleted per submitted batch in [`delete_rows`].
pub const DELETE_BATCH_SIZE: usize = 100;

/// A single stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Partition key.
    pub partition: String,
    /// Row key, unique within the partition.
    pub row: String,
    /// Opaque row payload.
    pub value: Vec<u8>,
    /// First-insertion timestamp; preserved across replacement.
    pub created_at: DateTime<Utc>,
}

/// Partitioned key-value tables with strongly consistent single-row
/// operations.
///
/// Scans may be eventually consistent; callers must tolerate reading
/// old data immediately after a write to a different row.
#[async_trait]
pub trait TableService: Send + Sync {
    /// Inserts or replaces a single row.
    ///
    /// The `created_at` of an existing row is preserved so that
    /// insertion-order queries stay stable across replacement.
    async fn upsert(
        &self,
        table: &str,
        partition: &str,
        row: &str,
        value: &[u8],
    ) -> Result<(), StoreError>;

    /// Point lookup of a single row.
    async fn get(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<Option<TableEntry>, StoreError>;

    /// Deletes a single row; returns whether it existed.
    async fn delete(&self, table: &str, partition: &str, row: &str) -> Result<bool, StoreError>;

    /// Scans a whole table, or one partition of it.
    async fn scan(
        &self,
        table: &str,
        partition: Option<&str>,
    ) -> Result<Vec<TableEntry>, StoreError>;

    /// Drops a table and every row in it.
    async fn drop_table(&self, table: &str) -> Result<(), StoreError>;
}

/// Deletes many rows of one partition in batches of
/// [`DELETE_BATCH_SIZE`].
///
/// Batches are submitted concurrently within themselves and
/// sequentially between each other. The first error aborts the
/// partition's remaining batches; batches already committed are not
/// rolled back. Returns the number of rows that existed.
pub async fn delete_rows(
    service: &Arc<dyn TableService>,
    table: &str,
    partition: &str,
    rows: Vec<String>,
) -> Result<u64, StoreError> {
    let mut deleted = 0u64;

    for batch in rows.chunks(DELETE_BATCH_SIZE) {
        let mut tasks = JoinSet::new();

        for row in batch {
            let service = Arc::clone(service);
            let table = table.to_owned();
            let partition = partition.to_owned();
            let row = row.clone();
            tasks.spawn(async move { service.delete(&table, &partition, &row).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(existed)) => deleted += u64::from(existed),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(StoreError::Backend(format!("delete task: {e}")));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
    }

    Ok(deleted)
}
