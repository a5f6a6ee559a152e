//! Manager for `crashardedvertextable` and the `base$N` naming
//! convention.

use std::sync::Arc;

use cra_store::{delete_rows, TableService};

use crate::error::MetaError;
use crate::rows::{decode, encode, ShardingInfo, VertexRecord};
use crate::tables;

/// Child vertex name for one shard of a group.
#[must_use]
pub fn shard_name(base: &str, shard: u32) -> String {
    format!("{base}${shard}")
}

/// Splits a `base$N` child name back into base and shard index.
#[must_use]
pub fn parse_shard_name(name: &str) -> Option<(&str, u32)> {
    let (base, shard) = name.rsplit_once('$')?;
    if base.is_empty() {
        return None;
    }
    shard.parse().ok().map(|shard| (base, shard))
}

/// Typed operations over the sharded-vertex table.
///
/// Descriptors are keyed by `(base, epoch)`; the highest epoch is
/// authoritative. Row keys are zero-padded so partition scans come
/// back in epoch order.
#[derive(Clone)]
pub struct ShardedVertexManager {
    service: Arc<dyn TableService>,
}

impl ShardedVertexManager {
    /// Creates a manager over the given table service.
    #[must_use]
    pub fn new(service: Arc<dyn TableService>) -> Self {
        Self { service }
    }

    fn epoch_key(epoch: u64) -> String {
        format!("{epoch:020}")
    }

    /// Writes a new descriptor epoch for a group and returns it.
    pub async fn register(
        &self,
        base: &str,
        all_instances: Vec<String>,
        all_shards: Vec<u32>,
        added_shards: Vec<u32>,
        removed_shards: Vec<u32>,
        shard_locator_expr: Option<String>,
    ) -> Result<ShardingInfo, MetaError> {
        let epoch = match self.latest_sharding_info(base).await? {
            Some(info) => info.epoch + 1,
            None => 0,
        };

        let info = ShardingInfo {
            base: base.to_owned(),
            epoch,
            all_instances,
            all_shards,
            added_shards,
            removed_shards,
            shard_locator_expr,
        };

        let value = encode(tables::SHARDED_VERTEX, &info)?;
        self.service
            .upsert(tables::SHARDED_VERTEX, base, &Self::epoch_key(epoch), &value)
            .await?;

        Ok(info)
    }

    /// The authoritative (highest-epoch) descriptor of a group.
    pub async fn latest_sharding_info(
        &self,
        base: &str,
    ) -> Result<Option<ShardingInfo>, MetaError> {
        let entries = self.service.scan(tables::SHARDED_VERTEX, Some(base)).await?;

        let mut latest: Option<ShardingInfo> = None;
        for entry in &entries {
            let info: ShardingInfo = decode(tables::SHARDED_VERTEX, entry)?;
            if latest.as_ref().map_or(true, |l| info.epoch > l.epoch) {
                latest = Some(info);
            }
        }

        Ok(latest)
    }

    /// Every vertex row belonging to a group, across all instances
    /// (prefix scan on `base$`).
    pub async fn rows_for_sharded_vertex(
        &self,
        base: &str,
    ) -> Result<Vec<VertexRecord>, MetaError> {
        let prefix = format!("{base}$");
        let entries = self.service.scan(tables::VERTEX, None).await?;

        entries
            .iter()
            .filter(|e| !e.partition.is_empty() && e.row.starts_with(&prefix))
            .map(|e| decode(tables::VERTEX, e))
            .collect()
    }

    /// Deletes every descriptor epoch of a group; returns the number
    /// removed.
    pub async fn delete_sharded_vertex(&self, base: &str) -> Result<u64, MetaError> {
        let rows: Vec<String> = self
            .service
            .scan(tables::SHARDED_VERTEX, Some(base))
            .await?
            .into_iter()
            .map(|e| e.row)
            .collect();

        Ok(delete_rows(&self.service, tables::SHARDED_VERTEX, base, rows).await?)
    }

    /// Partition-scoped prefix delete of a group's shards on one
    /// instance; returns the number removed.
    pub async fn delete_shards_on_instance(
        &self,
        instance: &str,
        base: &str,
    ) -> Result<u64, MetaError> {
        let prefix = format!("{base}$");
        let rows: Vec<String> = self
            .service
            .scan(tables::VERTEX, Some(instance))
            .await?
            .into_iter()
            .filter(|e| e.row.starts_with(&prefix))
            .map(|e| e.row)
            .collect();

        Ok(delete_rows(&self.service, tables::VERTEX, instance, rows).await?)
    }
}

impl std::fmt::Debug for ShardedVertexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedVertexManager").finish_non_exhaustive()
    }
}
