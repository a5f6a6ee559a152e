//! Parameter blob helpers.
//!
//! Constructor parameters travel as opaque byte strings; these
//! helpers are the paired serialise/deserialise capability for users
//! whose parameters are serde types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::VertexError;

/// Serialises a parameter value into an opaque blob.
pub fn serialize_params<T: Serialize>(value: &T) -> Result<Vec<u8>, VertexError> {
    serde_json::to_vec(value).map_err(|e| VertexError::Serialisation(e.to_string()))
}

/// Deserialises a parameter blob produced by [`serialize_params`].
pub fn deserialize_params<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, VertexError> {
    serde_json::from_slice(bytes).map_err(|e| VertexError::Serialisation(e.to_string()))
}

/// Parameter tuple handed to each shard of a sharded vertex: the
/// shard index first, then the user's blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardedParameter {
    /// Index of this shard within the group.
    pub shard: u32,
    /// The user's opaque parameter blob.
    #[serde(default)]
    pub parameter: Vec<u8>,
}

impl ShardedParameter {
    /// Wraps a user blob for one shard.
    #[must_use]
    pub fn new(shard: u32, parameter: Vec<u8>) -> Self {
        Self { shard, parameter }
    }

    /// Encodes the tuple into an opaque blob.
    pub fn encode(&self) -> Result<Vec<u8>, VertexError> {
        serialize_params(self)
    }

    /// Decodes a tuple from a blob written by [`Self::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, VertexError> {
        deserialize_params(bytes)
    }
}
