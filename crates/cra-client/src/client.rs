//! The dataflow client.

use std::sync::Arc;

use rand::Rng;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cra_meta::{
    shard_name, tables, ConnectionManager, ConnectionRecord, EndpointManager,
    ShardedVertexManager, ShardingInfo, VertexManager,
};
use cra_net::{ControlClient, StreamPool};
use cra_proto::ErrorCode;
use cra_store::{ArtifactStore, TableService};
use cra_vertex::ShardedParameter;

use crate::detached::DetachedVertex;
use crate::error::ClientError;

/// Which side of a connection opens the TCP dial.
///
/// Bytes always flow `from -> to`; `ToSide` only reverses who dials,
/// for peers that cannot accept inbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionInitiator {
    /// The worker hosting the source vertex dials (the default).
    FromSide,
    /// The worker hosting the destination vertex dials.
    ToSide,
}

/// External control plane over the metadata store and the workers.
#[derive(Clone)]
pub struct DataflowClient {
    tables: Arc<dyn TableService>,
    artifacts: Arc<dyn ArtifactStore>,
    vertices: VertexManager,
    endpoints: EndpointManager,
    connections: ConnectionManager,
    sharded: ShardedVertexManager,
    control: ControlClient,
}

impl DataflowClient {
    /// Creates a client over the given stores.
    #[must_use]
    pub fn new(tables: Arc<dyn TableService>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            vertices: VertexManager::new(Arc::clone(&tables)),
            endpoints: EndpointManager::new(Arc::clone(&tables)),
            connections: ConnectionManager::new(Arc::clone(&tables)),
            sharded: ShardedVertexManager::new(Arc::clone(&tables)),
            control: ControlClient::new(Arc::new(StreamPool::new())),
            tables,
            artifacts,
        }
    }

    /// The vertex-table manager.
    #[must_use]
    pub fn vertices(&self) -> &VertexManager {
        &self.vertices
    }

    /// The endpoint-table manager.
    #[must_use]
    pub fn endpoints(&self) -> &EndpointManager {
        &self.endpoints
    }

    /// The connection-table manager.
    #[must_use]
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// The sharded-vertex-table manager.
    #[must_use]
    pub fn sharded(&self) -> &ShardedVertexManager {
        &self.sharded
    }

    pub(crate) fn control(&self) -> &ControlClient {
        &self.control
    }

    /// Defines a vertex type: uploads its binary to the artifact
    /// store and writes the definition template row.
    pub async fn define_vertex(
        &self,
        definition: &str,
        is_sharded: bool,
        binary: &[u8],
    ) -> Result<(), ClientError> {
        cra_meta::validate_definition_name(definition)?;

        self.artifacts.upload(definition, binary).await?;
        self.vertices.define(definition, is_sharded).await?;

        info!(definition, is_sharded, "vertex defined");
        Ok(())
    }

    /// Materialises a vertex on an instance: writes the vertex row,
    /// then asks the hosting worker to load it.
    ///
    /// The row write is authoritative; a worker that cannot be
    /// reached now loads the vertex from the row on its next start.
    pub async fn instantiate_vertex(
        &self,
        instance: &str,
        vertex: &str,
        definition: &str,
        parameter: &[u8],
    ) -> Result<ErrorCode, ClientError> {
        if self.vertices.row_for_definition(definition).await?.is_none() {
            return Ok(ErrorCode::VertexNotDefined);
        }

        self.vertices
            .put_vertex(instance, vertex, definition, parameter)
            .await?;

        let Some(row) = self.vertices.instance_for_name(instance).await? else {
            warn!(instance, vertex, "instance not registered, load deferred");
            return Ok(ErrorCode::ServerFailed);
        };
        if !row.has_address() {
            warn!(instance, vertex, "instance has no address, load deferred");
            return Ok(ErrorCode::ServerFailed);
        }

        match self
            .control
            .load_vertex(&row.address, row.port, vertex, definition, parameter)
            .await
        {
            Ok(code) => Ok(code),
            Err(e) => {
                warn!(instance, vertex, error = %e, "load RPC failed");
                Ok(ErrorCode::ServerFailed)
            }
        }
    }

    /// Materialises a sharded vertex group across instances:
    /// `shards_per_instance` shards on each named instance, placed
    /// round-robin, each receiving `(shardIndex, parameter)`.
    ///
    /// The sharding descriptor is written after the per-shard loads
    /// are launched; a descriptor write failure does not cancel them,
    /// since the shards exist in the vertex table on their own. The
    /// returned code is the first non-success, or success.
    pub async fn instantiate_sharded_vertex(
        &self,
        instances: &[String],
        base: &str,
        definition: &str,
        parameter: &[u8],
        shards_per_instance: u32,
        shard_locator_expr: Option<String>,
    ) -> Result<ErrorCode, ClientError> {
        if instances.is_empty() || shards_per_instance == 0 {
            return Ok(ErrorCode::VerticesEndpointsNotMatched);
        }
        if self.vertices.row_for_definition(definition).await?.is_none() {
            return Ok(ErrorCode::VertexNotDefined);
        }

        #[allow(clippy::cast_possible_truncation)]
        let shard_count = instances.len() as u32 * shards_per_instance;
        let all_shards: Vec<u32> = (0..shard_count).collect();

        let mut loads = JoinSet::new();
        for shard in 0..shard_count {
            let client = self.clone();
            let instance = instances[shard as usize % instances.len()].clone();
            let vertex = shard_name(base, shard);
            let definition = definition.to_owned();
            let wrapped = ShardedParameter::new(shard, parameter.to_vec()).encode()?;

            loads.spawn(async move {
                client
                    .instantiate_vertex(&instance, &vertex, &definition, &wrapped)
                    .await
            });
        }

        let descriptor = self
            .sharded
            .register(
                base,
                instances.to_vec(),
                all_shards.clone(),
                all_shards,
                Vec::new(),
                shard_locator_expr,
            )
            .await;

        let mut aggregate = ErrorCode::Success;
        while let Some(joined) = loads.join_next().await {
            let code = match joined {
                Ok(Ok(code)) => code,
                Ok(Err(e)) => {
                    warn!(base, error = %e, "shard instantiation failed");
                    ErrorCode::ServerFailed
                }
                Err(e) => {
                    warn!(base, error = %e, "shard instantiation task failed");
                    ErrorCode::ServerFailed
                }
            };
            if aggregate.is_success() && !code.is_success() {
                aggregate = code;
            }
        }

        descriptor?;

        info!(base, shards = shard_count, code = %aggregate, "sharded vertex instantiated");
        Ok(aggregate)
    }

    /// The latest sharding descriptor of a group.
    pub async fn get_sharding_info(&self, base: &str) -> Result<Option<ShardingInfo>, ClientError> {
        Ok(self.sharded.latest_sharding_info(base).await?)
    }

    /// Connects an output endpoint to an input endpoint, dialling
    /// from the source side.
    pub async fn connect(
        &self,
        from_vertex: &str,
        from_endpoint: &str,
        to_vertex: &str,
        to_endpoint: &str,
    ) -> Result<ErrorCode, ClientError> {
        self.connect_with_initiator(
            from_vertex,
            from_endpoint,
            to_vertex,
            to_endpoint,
            ConnectionInitiator::FromSide,
        )
        .await
    }

    /// Connects an output endpoint to an input endpoint with an
    /// explicit dial direction.
    ///
    /// The connection row is inserted before the control RPC; on RPC
    /// failure the row remains and the initiating worker retries on
    /// its next reconcile.
    pub async fn connect_with_initiator(
        &self,
        from_vertex: &str,
        from_endpoint: &str,
        to_vertex: &str,
        to_endpoint: &str,
        initiator: ConnectionInitiator,
    ) -> Result<ErrorCode, ClientError> {
        if !self.vertices.vertex_exists(from_vertex).await?
            || !self.vertices.vertex_exists(to_vertex).await?
        {
            return Ok(ErrorCode::VertexNotFound);
        }

        let record = ConnectionRecord {
            from_vertex: from_vertex.to_owned(),
            from_endpoint: from_endpoint.to_owned(),
            to_vertex: to_vertex.to_owned(),
            to_endpoint: to_endpoint.to_owned(),
        };
        self.connections.add_connection(&record).await?;

        let reverse = initiator == ConnectionInitiator::ToSide;
        let initiator_vertex = if reverse { to_vertex } else { from_vertex };

        let Some(row) = self.vertices.row_for_active_vertex(initiator_vertex).await? else {
            debug!(
                vertex = initiator_vertex,
                "initiator not active, establishment deferred to reconcile"
            );
            return Ok(ErrorCode::ConnectionEstablishFailed);
        };
        let Some(instance) = self.vertices.instance_for_name(&row.instance).await? else {
            return Ok(ErrorCode::ConnectionEstablishFailed);
        };

        match self
            .control
            .connect_initiator(
                &instance.address,
                instance.port,
                reverse,
                from_vertex,
                from_endpoint,
                to_vertex,
                to_endpoint,
            )
            .await
        {
            Ok(code) => Ok(code),
            Err(e) => {
                warn!(
                    from = from_vertex,
                    to = to_vertex,
                    error = %e,
                    "connect RPC failed, row remains for reconcile"
                );
                Ok(ErrorCode::ConnectionEstablishFailed)
            }
        }
    }

    /// Wires two sharded groups with a full mesh.
    ///
    /// With `F` source shards exposing `from_endpoints` each and `T`
    /// destination shards exposing `to_endpoints` each, requires
    /// `from_endpoints.len() == T` and `to_endpoints.len() == F`; an
    /// arity mismatch creates no rows.
    pub async fn connect_sharded_vertices_with_full_mesh(
        &self,
        from_base: &str,
        from_endpoints: &[&str],
        to_base: &str,
        to_endpoints: &[&str],
    ) -> Result<ErrorCode, ClientError> {
        let Some(from_info) = self.sharded.latest_sharding_info(from_base).await? else {
            return Ok(ErrorCode::VertexNotFound);
        };
        let Some(to_info) = self.sharded.latest_sharding_info(to_base).await? else {
            return Ok(ErrorCode::VertexNotFound);
        };

        let mut from_shards = from_info.all_shards;
        let mut to_shards = to_info.all_shards;
        from_shards.sort_unstable();
        to_shards.sort_unstable();

        if from_endpoints.len() != to_shards.len() || to_endpoints.len() != from_shards.len() {
            return Ok(ErrorCode::VerticesEndpointsNotMatched);
        }

        let mut connects = JoinSet::new();
        for (i, from_endpoint) in from_endpoints.iter().enumerate() {
            for (j, from_shard) in from_shards.iter().enumerate() {
                let client = self.clone();
                let from_vertex = shard_name(from_base, *from_shard);
                let from_endpoint = (*from_endpoint).to_owned();
                let to_vertex = shard_name(to_base, to_shards[i]);
                let to_endpoint = to_endpoints[j].to_owned();

                connects.spawn(async move {
                    client
                        .connect(&from_vertex, &from_endpoint, &to_vertex, &to_endpoint)
                        .await
                });
            }
        }

        let mut aggregate = ErrorCode::Success;
        while let Some(joined) = connects.join_next().await {
            let code = match joined {
                Ok(Ok(code)) => code,
                Ok(Err(e)) => {
                    warn!(from_base, to_base, error = %e, "mesh connect failed");
                    ErrorCode::ServerFailed
                }
                Err(e) => {
                    warn!(from_base, to_base, error = %e, "mesh connect task failed");
                    ErrorCode::ServerFailed
                }
            };
            if aggregate.is_success() && !code.is_success() {
                aggregate = code;
            }
        }

        Ok(aggregate)
    }

    /// Deletes a connection row. Fire-and-forget: live streams are
    /// left to close on their own.
    pub async fn disconnect(
        &self,
        from_vertex: &str,
        from_endpoint: &str,
        to_vertex: &str,
        to_endpoint: &str,
    ) -> Result<(), ClientError> {
        self.connections
            .delete_connection(from_vertex, from_endpoint, to_vertex, to_endpoint)
            .await?;
        Ok(())
    }

    /// Deletes a vertex row.
    pub async fn delete_vertex(&self, instance: &str, vertex: &str) -> Result<(), ClientError> {
        self.vertices.delete_vertex(instance, vertex).await?;
        Ok(())
    }

    /// Deletes an instance row.
    pub async fn delete_instance(&self, instance: &str) -> Result<(), ClientError> {
        self.vertices.delete_instance(instance).await?;
        Ok(())
    }

    /// Deletes a sharded group: prefix-deletes its shards on every
    /// hosting instance in parallel, then drops its descriptors.
    pub async fn delete_sharded_vertex(&self, base: &str) -> Result<(), ClientError> {
        let Some(info) = self.sharded.latest_sharding_info(base).await? else {
            return Ok(());
        };

        let mut deletes = JoinSet::new();
        for instance in info.all_instances {
            let sharded = self.sharded.clone();
            let base = base.to_owned();
            deletes.spawn(async move { sharded.delete_shards_on_instance(&instance, &base).await });
        }

        while let Some(joined) = deletes.join_next().await {
            joined.map_err(|e| ClientError::Internal(e.to_string()))??;
        }

        self.sharded.delete_sharded_vertex(base).await?;
        Ok(())
    }

    /// Registers a detached vertex living in this process. With no
    /// instance name, an ephemeral instance (16 random lowercase
    /// letters, deleted on dispose) is created for it.
    pub async fn register_as_vertex(
        &self,
        name: &str,
        instance: Option<&str>,
    ) -> Result<DetachedVertex, ClientError> {
        let (instance_name, ephemeral) = match instance {
            Some(existing) if !existing.is_empty() => (existing.to_owned(), false),
            _ => {
                let generated = ephemeral_instance_name();
                // No address: nothing must ever dial a detached vertex.
                self.vertices.register_instance(&generated, "", 0).await?;
                (generated, true)
            }
        };

        self.vertices
            .put_vertex(&instance_name, name, "", &[])
            .await?;

        info!(vertex = name, instance = %instance_name, ephemeral, "detached vertex registered");
        Ok(DetachedVertex::new(name, &instance_name, ephemeral, self.clone()))
    }

    /// Drops every reserved table and clears the artifact container.
    /// Intended for tests and fresh bring-up.
    pub async fn reset(&self) -> Result<(), ClientError> {
        for table in tables::ALL {
            self.tables.drop_table(table).await?;
        }
        self.artifacts.clear().await?;

        info!("metadata store reset");
        Ok(())
    }
}

impl std::fmt::Debug for DataflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataflowClient").finish_non_exhaustive()
    }
}

/// 16 random lowercase letters, drawn from the thread-local RNG.
fn ephemeral_instance_name() -> String {
    let mut rng = rand::thread_rng();
    (0..16).map(|_| rng.gen_range('a'..='z')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_names_are_lowercase_and_fresh() {
        let first = ephemeral_instance_name();
        let second = ephemeral_instance_name();

        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_lowercase()));
        assert_ne!(first, second);
    }
}
