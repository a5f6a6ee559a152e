//! Worker start-up, accept loop and control dispatch.

use std::io::ErrorKind;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cra_meta::{ConnectionManager, ConnectionRecord, EndpointManager, VertexManager};
use cra_net::{ControlClient, StreamPool};
use cra_proto::{codec, ErrorCode, MessageTag, ProtocolError};
use cra_store::{ArtifactStore, TableService};
use cra_vertex::{VertexContext, VertexFactoryRegistry};

use crate::connections::{LiveKey, LiveStream};
use crate::error::WorkerError;
use crate::hosted::{HostedVertex, RowRegistrar};

/// A worker instance: hosts vertices, serves the control protocol and
/// owns connection setup for the vertices it hosts.
pub struct WorkerServer {
    pub(crate) instance: String,
    pub(crate) address: String,
    pub(crate) port: u16,
    pub(crate) vertices: VertexManager,
    pub(crate) endpoints: EndpointManager,
    pub(crate) connections: ConnectionManager,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    pub(crate) registry: VertexFactoryRegistry,
    pub(crate) control: ControlClient,
    pub(crate) hosted: DashMap<String, Arc<HostedVertex>>,
    pub(crate) blob_cache: DashMap<String, Vec<u8>>,
    pub(crate) live: DashMap<LiveKey, LiveStream>,
    pub(crate) stream_seq: AtomicU64,
    pub(crate) cancel: CancellationToken,
}

impl WorkerServer {
    /// Creates a worker for the named instance.
    ///
    /// `address` is the routable address other processes dial; the
    /// listener itself binds the wildcard address on `port`.
    #[must_use]
    pub fn new(
        instance: &str,
        address: &str,
        port: u16,
        tables: Arc<dyn TableService>,
        artifacts: Arc<dyn ArtifactStore>,
        registry: VertexFactoryRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            instance: instance.to_owned(),
            address: address.to_owned(),
            port,
            vertices: VertexManager::new(Arc::clone(&tables)),
            endpoints: EndpointManager::new(Arc::clone(&tables)),
            connections: ConnectionManager::new(tables),
            artifacts,
            registry,
            control: ControlClient::new(Arc::new(StreamPool::new())),
            hosted: DashMap::new(),
            blob_cache: DashMap::new(),
            live: DashMap::new(),
            stream_seq: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        })
    }

    /// Instance name this worker registered under.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance
    }

    /// Control port of this worker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Requests shutdown of the accept loop, the reconciler and every
    /// live stream task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Registers the instance, restores hosted vertices, starts the
    /// reconciler and serves control connections until shutdown.
    ///
    /// A port already in use is a fatal start-up error.
    pub async fn run(self: &Arc<Self>) -> Result<(), WorkerError> {
        self.vertices
            .register_instance(&self.instance, &self.address, self.port)
            .await?;
        info!(
            instance = %self.instance,
            address = %self.address,
            port = self.port,
            "instance registered"
        );

        let rows = self.vertices.vertices_for_instance(&self.instance).await?;
        for row in rows {
            let code = self
                .load_vertex_local(&row.vertex, &row.definition, &row.parameter)
                .await;
            if !code.is_success() {
                warn!(vertex = %row.vertex, code = %code, "failed to restore vertex");
            }
        }

        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|source| WorkerError::Bind {
                address: "0.0.0.0".to_owned(),
                port: self.port,
                source,
            })?;
        info!(port = self.port, "listening for control connections");

        let reconciler = Arc::clone(self);
        tokio::spawn(async move { reconciler.run_reconciler().await });

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!(instance = %self.instance, "worker shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "accepted control connection");
                        let server = Arc::clone(self);
                        tokio::spawn(async move { server.handle_connection(stream).await });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }

    /// Serves framed control messages on one accepted socket until
    /// EOF, an error, or a receiver handoff that consumes the socket.
    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) {
        loop {
            let raw = match codec::read_i32(&mut stream).await {
                Ok(raw) => raw,
                Err(ProtocolError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => return,
                Err(e) => {
                    debug!(error = %e, "control stream read failed");
                    return;
                }
            };

            let Some(tag) = MessageTag::from_i32(raw) else {
                warn!(tag = raw, "unknown message tag, closing stream");
                return;
            };

            let result = match tag {
                MessageTag::LoadVertex => self.handle_load(&mut stream).await,
                MessageTag::ConnectVertexInitiator | MessageTag::ConnectVertexInitiatorReverse => {
                    self.handle_initiator(&mut stream, tag.is_reverse()).await
                }
                MessageTag::ConnectVertexReceiver | MessageTag::ConnectVertexReceiverReverse => {
                    // The socket becomes a data stream on success and
                    // must not be read here again either way.
                    if let Err(e) = self.handle_receiver(stream, tag.is_reverse()).await {
                        debug!(error = %e, "receiver handoff failed");
                    }
                    return;
                }
            };

            if let Err(e) = result {
                debug!(error = %e, "control exchange failed");
                return;
            }
        }
    }

    async fn handle_load(&self, stream: &mut TcpStream) -> Result<(), ProtocolError> {
        let vertex = codec::read_string(stream).await?;
        let definition = codec::read_string(stream).await?;
        let parameter = codec::read_byte_array(stream).await?;

        let code = self
            .load_vertex_local(&vertex, &definition, &parameter)
            .await;
        codec::write_i32(stream, code.as_i32()).await
    }

    async fn handle_initiator(
        self: &Arc<Self>,
        stream: &mut TcpStream,
        reverse: bool,
    ) -> Result<(), ProtocolError> {
        let conn = read_connection(stream).await?;
        let code = self.initiate_connection(&conn, reverse).await;
        codec::write_i32(stream, code.as_i32()).await
    }

    /// Materialises and initialises a vertex in this process.
    ///
    /// Idempotent: re-loading an existing name disposes the prior
    /// instance first. The vertex row is (re)written before
    /// initialisation so endpoint rows never exist without it.
    pub(crate) async fn load_vertex_local(
        &self,
        name: &str,
        definition: &str,
        parameter: &[u8],
    ) -> ErrorCode {
        if self.hosted.contains_key(name) {
            self.dispose_vertex(name).await;
        }

        match self.vertices.row_for_definition(definition).await {
            Ok(Some(_)) => {}
            Ok(None) => return ErrorCode::VertexNotDefined,
            Err(e) => {
                warn!(definition, error = %e, "definition lookup failed");
                return ErrorCode::ServerFailed;
            }
        }

        if !self.blob_cache.contains_key(definition) {
            match self.artifacts.download(definition).await {
                Ok(Some(blob)) => {
                    self.blob_cache.insert(definition.to_owned(), blob);
                }
                Ok(None) => debug!(definition, "no artifact binary stored"),
                Err(e) => warn!(definition, error = %e, "artifact download failed"),
            }
        }

        let Some(vertex) = self.registry.create(definition) else {
            warn!(definition, "no factory registered for definition");
            return ErrorCode::InitializationFailed;
        };

        if let Err(e) = self
            .vertices
            .put_vertex(&self.instance, name, definition, parameter)
            .await
        {
            warn!(vertex = name, error = %e, "vertex row write failed");
            return ErrorCode::ServerFailed;
        }

        let context = Arc::new(VertexContext::new(
            name,
            Arc::new(RowRegistrar::new(self.endpoints.clone())),
        ));

        if let Err(e) = vertex.initialize(&context, parameter).await {
            warn!(vertex = name, error = %e, "vertex initialisation failed");
            return ErrorCode::InitializationFailed;
        }

        self.hosted.insert(
            name.to_owned(),
            Arc::new(HostedVertex {
                name: name.to_owned(),
                definition: definition.to_owned(),
                vertex,
                context,
            }),
        );

        info!(vertex = name, definition, "vertex loaded");
        ErrorCode::Success
    }

    /// Disposes a hosted vertex: closes its streams, runs user
    /// dispose, deletes its endpoint rows and its vertex row, and
    /// drops it from the in-process table. Internal errors are logged
    /// and suppressed; the local resources are released regardless.
    pub(crate) async fn dispose_vertex(&self, name: &str) -> bool {
        let Some((_, hosted)) = self.hosted.remove(name) else {
            return false;
        };

        self.cancel_streams_for_vertex(name);
        hosted.vertex.dispose().await;

        if let Err(e) = self.endpoints.delete_all_for_vertex(name).await {
            warn!(vertex = name, error = %e, "endpoint row cleanup failed");
        }
        if let Err(e) = self.vertices.delete_vertex(&self.instance, name).await {
            warn!(vertex = name, error = %e, "vertex row cleanup failed");
        }

        info!(vertex = name, definition = %hosted.definition, "vertex disposed");
        true
    }
}

impl std::fmt::Debug for WorkerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerServer")
            .field("instance", &self.instance)
            .field("address", &self.address)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Reads the 4-tuple arguments of a connection message.
pub(crate) async fn read_connection(
    stream: &mut TcpStream,
) -> Result<ConnectionRecord, ProtocolError> {
    Ok(ConnectionRecord {
        from_vertex: codec::read_string(stream).await?,
        from_endpoint: codec::read_string(stream).await?,
        to_vertex: codec::read_string(stream).await?,
        to_endpoint: codec::read_string(stream).await?,
    })
}
