//! Detached vertices: fabric participants living in the client
//! process.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cra_meta::{ConnectionRecord, Direction, MetaError, VertexRecord};
use cra_proto::ErrorCode;

use crate::client::DataflowClient;
use crate::error::ClientError;

/// Shared handle to an established data stream.
pub type SharedStream = Arc<Mutex<TcpStream>>;

/// A vertex hosted by the caller rather than a worker.
///
/// It registers under a (possibly ephemeral) instance with no
/// address, adds endpoint rows explicitly, and opens its streams by
/// dialling the relevant worker itself - it never accepts inbound
/// dials, so every handoff is sent with `killRemote` set and the
/// remote closes the stream if its endpoint goes away.
pub struct DetachedVertex {
    name: String,
    instance: String,
    ephemeral_instance: bool,
    client: DataflowClient,
    /// Streams this vertex reads from, keyed by connection.
    inputs: DashMap<ConnectionRecord, SharedStream>,
    /// Streams this vertex writes to, keyed by connection.
    outputs: DashMap<ConnectionRecord, SharedStream>,
}

impl DetachedVertex {
    pub(crate) fn new(
        name: &str,
        instance: &str,
        ephemeral_instance: bool,
        client: DataflowClient,
    ) -> Self {
        Self {
            name: name.to_owned(),
            instance: instance.to_owned(),
            ephemeral_instance,
            client,
            inputs: DashMap::new(),
            outputs: DashMap::new(),
        }
    }

    /// Vertex name in the fabric.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance this vertex registered under.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Number of open inbound streams.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of open outbound streams.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Registers an input endpoint row for this vertex.
    pub async fn add_input_endpoint(&self, endpoint: &str) -> Result<(), ClientError> {
        self.client
            .endpoints()
            .add_endpoint(&self.name, endpoint, Direction::Input, true)
            .await?;
        Ok(())
    }

    /// Registers an output endpoint row for this vertex.
    pub async fn add_output_endpoint(&self, endpoint: &str) -> Result<(), ClientError> {
        self.client
            .endpoints()
            .add_endpoint(&self.name, endpoint, Direction::Output, true)
            .await?;
        Ok(())
    }

    /// Opens an outbound stream from one of this vertex's outputs to
    /// a hosted vertex's input: writes the connection row, dials the
    /// hosting worker and performs the receiver handoff.
    pub async fn connect_to_vertex(
        &self,
        from_endpoint: &str,
        to_vertex: &str,
        to_endpoint: &str,
    ) -> Result<SharedStream, ClientError> {
        let record = ConnectionRecord {
            from_vertex: self.name.clone(),
            from_endpoint: from_endpoint.to_owned(),
            to_vertex: to_vertex.to_owned(),
            to_endpoint: to_endpoint.to_owned(),
        };
        self.client.connections().add_connection(&record).await?;

        let stream = self.dial(&record, false).await?;
        let shared = Arc::new(Mutex::new(stream));
        self.outputs.insert(record, Arc::clone(&shared));
        Ok(shared)
    }

    /// Opens an inbound stream from a hosted vertex's output to one
    /// of this vertex's inputs, using the reverse handoff since the
    /// source worker cannot dial back.
    pub async fn connect_from_vertex(
        &self,
        from_vertex: &str,
        from_endpoint: &str,
        to_endpoint: &str,
    ) -> Result<SharedStream, ClientError> {
        let record = ConnectionRecord {
            from_vertex: from_vertex.to_owned(),
            from_endpoint: from_endpoint.to_owned(),
            to_vertex: self.name.clone(),
            to_endpoint: to_endpoint.to_owned(),
        };
        self.client.connections().add_connection(&record).await?;

        let stream = self.dial(&record, true).await?;
        let shared = Arc::new(Mutex::new(stream));
        self.inputs.insert(record, Arc::clone(&shared));
        Ok(shared)
    }

    /// Re-reads this vertex's connections from metadata and redials
    /// every one of them: outbound rows into the output map, inbound
    /// rows into the input map.
    pub async fn restore(&self) -> Result<(), ClientError> {
        for record in self
            .client
            .connections()
            .connections_from(&self.name)
            .await?
        {
            match self.dial(&record, false).await {
                Ok(stream) => {
                    self.outputs.insert(record, Arc::new(Mutex::new(stream)));
                }
                Err(e) => warn!(
                    to = %record.to_vertex,
                    error = %e,
                    "failed to restore outbound stream"
                ),
            }
        }

        for record in self.client.connections().connections_to(&self.name).await? {
            match self.dial(&record, true).await {
                Ok(stream) => {
                    self.inputs.insert(record, Arc::new(Mutex::new(stream)));
                }
                Err(e) => warn!(
                    from = %record.from_vertex,
                    error = %e,
                    "failed to restore inbound stream"
                ),
            }
        }

        info!(
            vertex = %self.name,
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            "detached vertex restored"
        );
        Ok(())
    }

    /// Releases everything this vertex owns: shuts both stream maps,
    /// deletes its connection, endpoint and vertex rows, and its
    /// ephemeral instance row if one was created. Errors are logged
    /// and suppressed.
    pub async fn dispose(&self) {
        let streams: Vec<SharedStream> = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.inputs.clear();
        self.outputs.clear();

        for shared in streams {
            let mut stream = shared.lock().await;
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "stream shutdown failed");
            }
        }

        if let Err(e) = self
            .client
            .connections()
            .delete_all_for_vertex(&self.name)
            .await
        {
            warn!(vertex = %self.name, error = %e, "connection row cleanup failed");
        }
        if let Err(e) = self.client.endpoints().delete_all_for_vertex(&self.name).await {
            warn!(vertex = %self.name, error = %e, "endpoint row cleanup failed");
        }
        if let Err(e) = self
            .client
            .vertices()
            .delete_vertex(&self.instance, &self.name)
            .await
        {
            warn!(vertex = %self.name, error = %e, "vertex row cleanup failed");
        }

        if self.ephemeral_instance {
            if let Err(e) = self.client.vertices().delete_instance(&self.instance).await {
                warn!(instance = %self.instance, error = %e, "instance row cleanup failed");
            }
        }

        info!(vertex = %self.name, "detached vertex disposed");
    }

    /// Resolves the remote side of a connection and performs the
    /// receiver handoff with `killRemote` set.
    ///
    /// `reverse` selects which side this vertex is: `false` when this
    /// vertex is the source dialling the destination's input, `true`
    /// when it is the destination dialling the source's output.
    async fn dial(
        &self,
        record: &ConnectionRecord,
        reverse: bool,
    ) -> Result<TcpStream, ClientError> {
        let remote_vertex = if reverse {
            &record.from_vertex
        } else {
            &record.to_vertex
        };

        let instance = self.resolve_instance(remote_vertex).await?;

        let stream = self
            .client
            .control()
            .open_receiver_stream(
                &instance.address,
                instance.port,
                reverse,
                &record.from_vertex,
                &record.from_endpoint,
                &record.to_vertex,
                &record.to_endpoint,
                true,
            )
            .await?;

        debug!(
            vertex = %self.name,
            remote = %remote_vertex,
            reverse,
            "detached stream established"
        );
        Ok(stream)
    }

    async fn resolve_instance(&self, vertex: &str) -> Result<VertexRecord, ClientError> {
        let Some(row) = self.client.vertices().row_for_active_vertex(vertex).await? else {
            return Err(ClientError::Meta(MetaError::VertexNotFound(
                vertex.to_owned(),
            )));
        };

        let Some(instance) = self
            .client
            .vertices()
            .instance_for_name(&row.instance)
            .await?
        else {
            return Err(ClientError::Meta(MetaError::InstanceNotFound(row.instance)));
        };

        if !instance.has_address() {
            return Err(ClientError::Net(cra_net::NetError::Refused(
                ErrorCode::ConnectionEstablishFailed,
            )));
        }

        Ok(instance)
    }
}

impl std::fmt::Debug for DetachedVertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetachedVertex")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .field("ephemeral_instance", &self.ephemeral_instance)
            .finish_non_exhaustive()
    }
}
