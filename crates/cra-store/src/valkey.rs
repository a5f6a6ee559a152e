//! Valkey/Redis backends for the table service and artifact store.
//!
//! Layout: one hash per `(table, partition)` holding row payloads, a
//! sibling `:ts` hash holding first-insertion timestamps (written with
//! `HSETNX` so replacement keeps the original), and one set per table
//! indexing its partitions for whole-table scans.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{redis::AsyncCommands, Config, Pool, Runtime};

use crate::artifact::{entry_path, ArtifactStore};
use crate::error::StoreError;
use crate::table::{TableEntry, TableService};

/// Key namespace shared by both stores.
const NAMESPACE: &str = "cra";

async fn build_pool(url: &str, pool_size: usize) -> Result<Pool, StoreError> {
    let config = Config::from_url(url);
    let pool = config
        .builder()
        .map_err(|e| StoreError::Connection(e.to_string()))?
        .max_size(pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    // Test the connection
    let mut conn = pool
        .get()
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    deadpool_redis::redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    Ok(pool)
}

/// Valkey-backed table service.
#[derive(Clone)]
pub struct ValkeyTableService {
    pool: Pool,
}

impl ValkeyTableService {
    /// Connects to a Valkey server and verifies the connection.
    pub async fn new(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        Ok(Self {
            pool: build_pool(url, pool_size).await?,
        })
    }

    fn data_key(table: &str, partition: &str) -> String {
        format!("{NAMESPACE}:{table}:{partition}")
    }

    fn ts_key(table: &str, partition: &str) -> String {
        format!("{NAMESPACE}:{table}:{partition}:ts")
    }

    fn partitions_key(table: &str) -> String {
        format!("{NAMESPACE}:{table}:partitions")
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn scan_partition(
        &self,
        table: &str,
        partition: &str,
    ) -> Result<Vec<TableEntry>, StoreError> {
        let mut conn = self.conn().await?;

        let values: Vec<(String, Vec<u8>)> = conn
            .hgetall(Self::data_key(table, partition))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let stamps: Vec<(String, i64)> = conn
            .hgetall(Self::ts_key(table, partition))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let stamps: std::collections::HashMap<String, i64> = stamps.into_iter().collect();

        Ok(values
            .into_iter()
            .map(|(row, value)| {
                let millis = stamps.get(&row).copied().unwrap_or_default();
                TableEntry {
                    partition: partition.to_owned(),
                    row,
                    value,
                    created_at: DateTime::<Utc>::from_timestamp_millis(millis)
                        .unwrap_or_default(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl TableService for ValkeyTableService {
    async fn upsert(
        &self,
        table: &str,
        partition: &str,
        row: &str,
        value: &[u8],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        conn.hset_nx::<_, _, _, ()>(
            Self::ts_key(table, partition),
            row,
            Utc::now().timestamp_millis(),
        )
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        conn.hset::<_, _, _, ()>(Self::data_key(table, partition), row, value)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        conn.sadd::<_, _, ()>(Self::partitions_key(table), partition)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<Option<TableEntry>, StoreError> {
        let mut conn = self.conn().await?;

        let value: Option<Vec<u8>> = conn
            .hget(Self::data_key(table, partition), row)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some(value) = value else {
            return Ok(None);
        };

        let millis: Option<i64> = conn
            .hget(Self::ts_key(table, partition), row)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Some(TableEntry {
            partition: partition.to_owned(),
            row: row.to_owned(),
            value,
            created_at: DateTime::<Utc>::from_timestamp_millis(millis.unwrap_or_default())
                .unwrap_or_default(),
        }))
    }

    async fn delete(&self, table: &str, partition: &str, row: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;

        let removed: i64 = conn
            .hdel(Self::data_key(table, partition), row)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        conn.hdel::<_, _, ()>(Self::ts_key(table, partition), row)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(removed > 0)
    }

    async fn scan(
        &self,
        table: &str,
        partition: Option<&str>,
    ) -> Result<Vec<TableEntry>, StoreError> {
        let partitions: Vec<String> = match partition {
            Some(p) => vec![p.to_owned()],
            None => {
                let mut conn = self.conn().await?;
                conn.smembers(Self::partitions_key(table))
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?
            }
        };

        let mut entries = Vec::new();
        for p in partitions {
            entries.extend(self.scan_partition(table, &p).await?);
        }

        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.partition.cmp(&b.partition))
                .then_with(|| a.row.cmp(&b.row))
        });

        Ok(entries)
    }

    async fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        let partitions: Vec<String> = conn
            .smembers(Self::partitions_key(table))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        for partition in partitions {
            conn.del::<_, ()>(Self::data_key(table, &partition))
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            conn.del::<_, ()>(Self::ts_key(table, &partition))
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        conn.del::<_, ()>(Self::partitions_key(table))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}

impl std::fmt::Debug for ValkeyTableService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyTableService").finish_non_exhaustive()
    }
}

/// Valkey-backed artifact store.
#[derive(Clone)]
pub struct ValkeyArtifactStore {
    pool: Pool,
}

impl ValkeyArtifactStore {
    /// Connects to a Valkey server and verifies the connection.
    pub async fn new(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        Ok(Self {
            pool: build_pool(url, pool_size).await?,
        })
    }

    fn blob_key(definition: &str) -> String {
        format!("{NAMESPACE}:{}", entry_path(definition))
    }

    fn index_key() -> String {
        format!("{NAMESPACE}:artifacts")
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[async_trait]
impl ArtifactStore for ValkeyArtifactStore {
    async fn upload(&self, definition: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        conn.set::<_, _, ()>(Self::blob_key(definition), bytes)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        conn.sadd::<_, _, ()>(Self::index_key(), definition)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn download(&self, definition: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;

        conn.get(Self::blob_key(definition))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn delete(&self, definition: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;

        let removed: i64 = conn
            .del(Self::blob_key(definition))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        conn.srem::<_, _, ()>(Self::index_key(), definition)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        let definitions: Vec<String> = conn
            .smembers(Self::index_key())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        for definition in definitions {
            conn.del::<_, ()>(Self::blob_key(&definition))
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        conn.del::<_, ()>(Self::index_key())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}

impl std::fmt::Debug for ValkeyArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyArtifactStore").finish_non_exhaustive()
    }
}
