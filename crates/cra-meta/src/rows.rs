//! Row payload types shared by the managers.

use serde::{Deserialize, Serialize};

use cra_store::TableEntry;

use crate::error::MetaError;

/// Direction of an endpoint. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Consumes bytes from an inbound stream.
    Input,
    /// Produces bytes onto an outbound stream.
    Output,
}

/// One row of `cravertextable`.
///
/// The table stores three kinds of row under one schema:
/// - instance rows: `vertex` empty, `address`/`port` set;
/// - definition template rows: `instance` empty, `vertex` = definition
///   name, `is_sharded` meaningful;
/// - vertex rows: both keys set, `definition`/`parameter` meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexRecord {
    /// Hosting instance name; empty for definition templates.
    pub instance: String,
    /// Vertex name; empty for instance rows.
    pub vertex: String,
    /// Definition this vertex was materialised from.
    #[serde(default)]
    pub definition: String,
    /// Instance address; empty when unknown (detached instances).
    #[serde(default)]
    pub address: String,
    /// Instance listen port.
    #[serde(default)]
    pub port: u16,
    /// Opaque constructor parameter blob.
    #[serde(default)]
    pub parameter: Vec<u8>,
    /// Whether the definition produces sharded vertices.
    #[serde(default)]
    pub is_sharded: bool,
}

impl VertexRecord {
    /// True when the instance address is known and dialable.
    #[must_use]
    pub fn has_address(&self) -> bool {
        !self.address.is_empty()
    }
}

/// One row of `craendpointtable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    /// Owning vertex.
    pub vertex: String,
    /// Endpoint name, unique per vertex.
    pub endpoint: String,
    /// Input or output.
    pub direction: Direction,
    /// Async endpoints yield between reads/writes; sync endpoints may
    /// block a dedicated worker.
    pub is_async: bool,
}

/// One row of `craconnectiontable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub from_vertex: String,
    pub from_endpoint: String,
    pub to_vertex: String,
    pub to_endpoint: String,
}

/// The authoritative sharding descriptor of a sharded vertex group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingInfo {
    /// Base name of the group; children are `base$N`.
    pub base: String,
    /// Descriptor epoch; the highest epoch wins.
    pub epoch: u64,
    /// Instances hosting the group.
    pub all_instances: Vec<String>,
    /// Every live shard index.
    pub all_shards: Vec<u32>,
    /// Shards added in this epoch.
    pub added_shards: Vec<u32>,
    /// Shards removed in this epoch.
    pub removed_shards: Vec<u32>,
    /// Optional shard-locator expression, resolved per process.
    #[serde(default)]
    pub shard_locator_expr: Option<String>,
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    table: &str,
    entry: &TableEntry,
) -> Result<T, MetaError> {
    serde_json::from_slice(&entry.value).map_err(|e| MetaError::CorruptRow {
        table: table.to_owned(),
        reason: e.to_string(),
    })
}

pub(crate) fn encode<T: Serialize>(table: &str, value: &T) -> Result<Vec<u8>, MetaError> {
    serde_json::to_vec(value).map_err(|e| MetaError::CorruptRow {
        table: table.to_owned(),
        reason: e.to_string(),
    })
}
