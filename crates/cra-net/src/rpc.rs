//! Framed control-RPC calls against a remote worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use cra_proto::{codec, ErrorCode, MessageTag, ProtocolError};

use crate::error::NetError;
use crate::pool::StreamPool;

/// Timeout applied to dials and reply reads.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues control RPCs, reusing pooled streams where possible.
///
/// Request/response RPCs (`LoadVertex`, the initiator messages)
/// return the stream to the pool on completion. Receiver handoffs
/// consume the stream: on success it becomes the data stream and is
/// handed to the caller.
#[derive(Clone)]
pub struct ControlClient {
    pool: Arc<StreamPool>,
}

impl ControlClient {
    /// Creates a client over the given pool.
    #[must_use]
    pub fn new(pool: Arc<StreamPool>) -> Self {
        Self { pool }
    }

    /// The pool used for outbound streams.
    #[must_use]
    pub fn pool(&self) -> &Arc<StreamPool> {
        &self.pool
    }

    async fn dial(&self, address: &str, port: u16) -> Result<TcpStream, NetError> {
        tokio::time::timeout(RPC_TIMEOUT, self.pool.acquire(address, port))
            .await
            .map_err(|_| NetError::Timeout)?
            .map_err(|e| NetError::Dial {
                address: address.to_owned(),
                port,
                reason: e.to_string(),
            })
    }

    async fn read_reply(stream: &mut TcpStream) -> Result<ErrorCode, NetError> {
        let raw = tokio::time::timeout(RPC_TIMEOUT, codec::read_i32(stream))
            .await
            .map_err(|_| NetError::Timeout)??;

        ErrorCode::from_i32(raw)
            .ok_or_else(|| NetError::Protocol(ProtocolError::UnknownErrorCode(raw)))
    }

    /// Asks the remote worker to load a vertex. The stream is pooled
    /// again after the reply.
    pub async fn load_vertex(
        &self,
        address: &str,
        port: u16,
        vertex: &str,
        definition: &str,
        parameter: &[u8],
    ) -> Result<ErrorCode, NetError> {
        let mut stream = self.dial(address, port).await?;

        codec::write_i32(&mut stream, MessageTag::LoadVertex.as_i32()).await?;
        codec::write_string(&mut stream, vertex).await?;
        codec::write_string(&mut stream, definition).await?;
        codec::write_byte_array(&mut stream, parameter).await?;

        let code = Self::read_reply(&mut stream).await?;
        debug!(address, port, vertex, code = %code, "load_vertex reply");

        self.pool.release(address, port, stream);
        Ok(code)
    }

    /// Asks the remote worker to initiate the connection it owns. The
    /// stream is pooled again after the reply.
    pub async fn connect_initiator(
        &self,
        address: &str,
        port: u16,
        reverse: bool,
        from_vertex: &str,
        from_endpoint: &str,
        to_vertex: &str,
        to_endpoint: &str,
    ) -> Result<ErrorCode, NetError> {
        let tag = if reverse {
            MessageTag::ConnectVertexInitiatorReverse
        } else {
            MessageTag::ConnectVertexInitiator
        };

        let mut stream = self.dial(address, port).await?;

        codec::write_i32(&mut stream, tag.as_i32()).await?;
        codec::write_string(&mut stream, from_vertex).await?;
        codec::write_string(&mut stream, from_endpoint).await?;
        codec::write_string(&mut stream, to_vertex).await?;
        codec::write_string(&mut stream, to_endpoint).await?;

        let code = Self::read_reply(&mut stream).await?;
        debug!(
            address,
            port,
            from = from_vertex,
            to = to_vertex,
            reverse,
            code = %code,
            "connect_initiator reply"
        );

        self.pool.release(address, port, stream);
        Ok(code)
    }

    /// Performs a receiver handoff against the remote worker. On
    /// success the returned stream is the established data stream; it
    /// never goes back to the pool.
    ///
    /// `kill_remote` asks the remote to close the stream if its local
    /// endpoint is later removed; detached vertices set it because
    /// they cannot accept a redial.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_receiver_stream(
        &self,
        address: &str,
        port: u16,
        reverse: bool,
        from_vertex: &str,
        from_endpoint: &str,
        to_vertex: &str,
        to_endpoint: &str,
        kill_remote: bool,
    ) -> Result<TcpStream, NetError> {
        let tag = if reverse {
            MessageTag::ConnectVertexReceiverReverse
        } else {
            MessageTag::ConnectVertexReceiver
        };

        let mut stream = self.dial(address, port).await?;

        codec::write_i32(&mut stream, tag.as_i32()).await?;
        codec::write_string(&mut stream, from_vertex).await?;
        codec::write_string(&mut stream, from_endpoint).await?;
        codec::write_string(&mut stream, to_vertex).await?;
        codec::write_string(&mut stream, to_endpoint).await?;
        codec::write_i32(&mut stream, i32::from(kill_remote)).await?;

        let code = Self::read_reply(&mut stream).await?;
        if !code.is_success() {
            return Err(NetError::Refused(code));
        }

        debug!(
            address,
            port,
            from = from_vertex,
            to = to_vertex,
            reverse,
            "receiver handoff accepted"
        );

        Ok(stream)
    }
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient").finish_non_exhaustive()
    }
}
