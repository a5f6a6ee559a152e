//! The connection engine: establishment, receiver handoff, stream
//! teardown and the reconciler.
//!
//! Establishment always follows *initiator dials receiver*. In the
//! reverse variants the TCP dial originates from the destination
//! side, but bytes still flow `from -> to` through the established
//! stream; the reverse bit only selects which endpoint map each side
//! consults.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cra_meta::{ConnectionRecord, Direction};
use cra_proto::{codec, ErrorCode, ProtocolError};

use crate::hosted::HostedVertex;
use crate::server::{read_connection, WorkerServer};

/// Reconciler wake-up cadence.
const RECONCILE_TICK: Duration = Duration::from_secs(1);
/// First retry delay for a failed establishment.
const BACKOFF_INITIAL: Duration = Duration::from_secs(2);
/// Retry delay ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Identity of one established stream: the connection plus which
/// side this worker plays. Both sides of a self-hosted connection
/// coexist under distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct LiveKey {
    pub conn: ConnectionRecord,
    pub local_vertex: String,
}

/// Book-keeping for one established stream.
pub(crate) struct LiveStream {
    pub id: u64,
    pub token: CancellationToken,
    /// Set by peers that cannot accept a redial; removing the local
    /// endpoint must close the stream so they learn quickly.
    pub kill_remote: bool,
}

impl WorkerServer {
    /// Establishes a connection this worker initiates.
    ///
    /// Normal direction: this worker hosts `from` and dials the
    /// worker hosting `to`. Reverse: this worker hosts `to` and dials
    /// the worker hosting `from`. Already-live connections succeed
    /// immediately.
    pub(crate) async fn initiate_connection(
        self: &Arc<Self>,
        conn: &ConnectionRecord,
        reverse: bool,
    ) -> ErrorCode {
        let (local_vertex, local_endpoint, remote_vertex) = if reverse {
            (&conn.to_vertex, &conn.to_endpoint, &conn.from_vertex)
        } else {
            (&conn.from_vertex, &conn.from_endpoint, &conn.to_vertex)
        };

        let key = LiveKey {
            conn: conn.clone(),
            local_vertex: local_vertex.clone(),
        };
        if self.live.contains_key(&key) {
            return ErrorCode::Success;
        }

        let Some(hosted) = self.hosted.get(local_vertex).map(|h| Arc::clone(h.value())) else {
            return ErrorCode::VertexNotFound;
        };
        if !hosted.context.has_endpoint(local_endpoint) {
            return ErrorCode::EndpointNotFound;
        }

        // A dormant row whose peer cannot be resolved right now is a
        // transient failure, not a reason to delete the row.
        let row = match self.vertices.row_for_active_vertex(remote_vertex).await {
            Ok(Some(row)) => row,
            Ok(None) => return ErrorCode::VertexNotFound,
            Err(e) => {
                warn!(vertex = %remote_vertex, error = %e, "remote vertex lookup failed");
                return ErrorCode::ConnectionEstablishFailed;
            }
        };

        let instance = match self.vertices.instance_for_name(&row.instance).await {
            Ok(Some(instance)) if instance.has_address() => instance,
            Ok(_) => return ErrorCode::ConnectionEstablishFailed,
            Err(e) => {
                warn!(instance = %row.instance, error = %e, "instance lookup failed");
                return ErrorCode::ConnectionEstablishFailed;
            }
        };

        let stream = match self
            .control
            .open_receiver_stream(
                &instance.address,
                instance.port,
                reverse,
                &conn.from_vertex,
                &conn.from_endpoint,
                &conn.to_vertex,
                &conn.to_endpoint,
                false,
            )
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                debug!(
                    from = %conn.from_vertex,
                    to = %conn.to_vertex,
                    reverse,
                    error = %e,
                    "receiver handshake failed"
                );
                return ErrorCode::ConnectionEstablishFailed;
            }
        };

        // Initiator side: normal produces from the output endpoint,
        // reverse consumes into the input endpoint.
        let direction = if reverse {
            Direction::Input
        } else {
            Direction::Output
        };

        let local_endpoint = local_endpoint.clone();
        match self.spawn_endpoint_task(&hosted, &local_endpoint, direction, key, stream, false) {
            Ok(()) => ErrorCode::Success,
            Err(code) => code,
        }
    }

    /// Accepts a receiver handoff on an inbound socket: resolves the
    /// local endpoint, replies, and on success detaches the socket
    /// into an endpoint task.
    pub(crate) async fn handle_receiver(
        self: &Arc<Self>,
        mut stream: TcpStream,
        reverse: bool,
    ) -> Result<(), ProtocolError> {
        let conn = read_connection(&mut stream).await?;
        let kill_remote = codec::read_i32(&mut stream).await? != 0;

        // Receiver side: normal consumes into the destination input,
        // reverse produces from the source output.
        let (local_vertex, local_endpoint, direction) = if reverse {
            (
                conn.from_vertex.clone(),
                conn.from_endpoint.clone(),
                Direction::Output,
            )
        } else {
            (
                conn.to_vertex.clone(),
                conn.to_endpoint.clone(),
                Direction::Input,
            )
        };

        let Some(hosted) = self.hosted.get(&local_vertex).map(|h| Arc::clone(h.value())) else {
            codec::write_i32(&mut stream, ErrorCode::VertexNotFound.as_i32()).await?;
            return Ok(());
        };
        if !hosted.context.has_endpoint(&local_endpoint) {
            codec::write_i32(&mut stream, ErrorCode::EndpointNotFound.as_i32()).await?;
            return Ok(());
        }

        codec::write_i32(&mut stream, ErrorCode::Success.as_i32()).await?;

        let key = LiveKey {
            conn,
            local_vertex: local_vertex.clone(),
        };
        if let Err(code) =
            self.spawn_endpoint_task(&hosted, &local_endpoint, direction, key, stream, kill_remote)
        {
            debug!(
                vertex = %local_vertex,
                endpoint = %local_endpoint,
                code = %code,
                "stream handoff failed after accept"
            );
        }

        Ok(())
    }

    /// Routes an established stream to the named endpoint and runs it
    /// on its own task. Async endpoints get the tokio stream and obey
    /// the teardown token; sync endpoints get a blocking stream on a
    /// dedicated thread, where closure is driven by peer EOF.
    pub(crate) fn spawn_endpoint_task(
        self: &Arc<Self>,
        hosted: &Arc<HostedVertex>,
        endpoint: &str,
        direction: Direction,
        key: LiveKey,
        stream: TcpStream,
        kill_remote: bool,
    ) -> Result<(), ErrorCode> {
        let id = self.stream_seq.fetch_add(1, Ordering::Relaxed);
        let token = self.cancel.child_token();

        let previous = self.live.insert(
            key.clone(),
            LiveStream {
                id,
                token: token.clone(),
                kill_remote,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let server = Arc::clone(self);
        let vertex = hosted.name.clone();
        let name = endpoint.to_owned();

        match direction {
            Direction::Input => {
                if let Some(ep) = hosted.context.async_input(endpoint) {
                    tokio::spawn(async move {
                        tokio::select! {
                            () = token.cancelled() => {
                                debug!(vertex = %vertex, endpoint = %name, "input stream torn down");
                            }
                            result = ep.run(stream) => {
                                if let Err(e) = result {
                                    debug!(vertex = %vertex, endpoint = %name, error = %e, "input endpoint finished with error");
                                }
                            }
                        }
                        server.live.remove_if(&key, |_, v| v.id == id);
                    });
                    Ok(())
                } else if let Some(ep) = hosted.context.input(endpoint) {
                    let Ok(blocking) = into_blocking(stream) else {
                        self.live.remove_if(&key, |_, v| v.id == id);
                        return Err(ErrorCode::ServerFailed);
                    };
                    tokio::spawn(async move {
                        match tokio::task::spawn_blocking(move || ep.run(blocking)).await {
                            Ok(Err(e)) => {
                                debug!(vertex = %vertex, endpoint = %name, error = %e, "input endpoint finished with error");
                            }
                            Err(e) => {
                                warn!(vertex = %vertex, endpoint = %name, error = %e, "input endpoint panicked");
                            }
                            Ok(Ok(())) => {}
                        }
                        server.live.remove_if(&key, |_, v| v.id == id);
                    });
                    Ok(())
                } else {
                    self.live.remove_if(&key, |_, v| v.id == id);
                    Err(ErrorCode::EndpointNotFound)
                }
            }
            Direction::Output => {
                if let Some(ep) = hosted.context.async_output(endpoint) {
                    tokio::spawn(async move {
                        tokio::select! {
                            () = token.cancelled() => {
                                debug!(vertex = %vertex, endpoint = %name, "output stream torn down");
                            }
                            result = ep.run(stream) => {
                                if let Err(e) = result {
                                    debug!(vertex = %vertex, endpoint = %name, error = %e, "output endpoint finished with error");
                                }
                            }
                        }
                        server.live.remove_if(&key, |_, v| v.id == id);
                    });
                    Ok(())
                } else if let Some(ep) = hosted.context.output(endpoint) {
                    let Ok(blocking) = into_blocking(stream) else {
                        self.live.remove_if(&key, |_, v| v.id == id);
                        return Err(ErrorCode::ServerFailed);
                    };
                    tokio::spawn(async move {
                        match tokio::task::spawn_blocking(move || ep.run(blocking)).await {
                            Ok(Err(e)) => {
                                debug!(vertex = %vertex, endpoint = %name, error = %e, "output endpoint finished with error");
                            }
                            Err(e) => {
                                warn!(vertex = %vertex, endpoint = %name, error = %e, "output endpoint panicked");
                            }
                            Ok(Ok(())) => {}
                        }
                        server.live.remove_if(&key, |_, v| v.id == id);
                    });
                    Ok(())
                } else {
                    self.live.remove_if(&key, |_, v| v.id == id);
                    Err(ErrorCode::EndpointNotFound)
                }
            }
        }
    }

    /// Cancels every live stream owned by a vertex. Peers observe EOF
    /// and treat it as normal termination.
    pub(crate) fn cancel_streams_for_vertex(&self, vertex: &str) {
        let keys: Vec<LiveKey> = self
            .live
            .iter()
            .filter(|e| e.key().local_vertex == vertex)
            .map(|e| e.key().clone())
            .collect();

        for key in keys {
            if let Some((_, stream)) = self.live.remove(&key) {
                debug!(
                    vertex,
                    kill_remote = stream.kill_remote,
                    "closing stream for disposed vertex"
                );
                stream.token.cancel();
            }
        }
    }

    /// Re-attempts every connection row whose source is hosted here
    /// and not currently live, with per-connection exponential
    /// backoff.
    pub(crate) async fn run_reconciler(self: Arc<Self>) {
        let mut backoffs: HashMap<ConnectionRecord, (Duration, Instant)> = HashMap::new();
        let mut ticker = tokio::time::interval(RECONCILE_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let hosted: Vec<String> = self.hosted.iter().map(|e| e.key().clone()).collect();

            for vertex in hosted {
                let rows = match self.connections.connections_from(&vertex).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!(vertex = %vertex, error = %e, "connection scan failed");
                        continue;
                    }
                };

                for conn in rows {
                    let key = LiveKey {
                        conn: conn.clone(),
                        local_vertex: conn.from_vertex.clone(),
                    };
                    if self.live.contains_key(&key) {
                        backoffs.remove(&conn);
                        continue;
                    }

                    let now = Instant::now();
                    if backoffs.get(&conn).is_some_and(|(_, next)| *next > now) {
                        continue;
                    }

                    let code = self.initiate_connection(&conn, false).await;
                    if code.is_success() {
                        info!(
                            from = %conn.from_vertex,
                            from_endpoint = %conn.from_endpoint,
                            to = %conn.to_vertex,
                            to_endpoint = %conn.to_endpoint,
                            "connection established"
                        );
                        backoffs.remove(&conn);
                    } else {
                        let delay = backoffs
                            .get(&conn)
                            .map_or(BACKOFF_INITIAL, |(d, _)| (*d * 2).min(BACKOFF_CAP));
                        debug!(
                            from = %conn.from_vertex,
                            to = %conn.to_vertex,
                            code = %code,
                            retry_in_secs = delay.as_secs(),
                            "connection attempt failed"
                        );
                        backoffs.insert(conn, (delay, now + delay));
                    }
                }
            }
        }
    }
}

fn into_blocking(stream: TcpStream) -> std::io::Result<std::net::TcpStream> {
    let blocking = stream.into_std()?;
    blocking.set_nonblocking(false)?;
    Ok(blocking)
}
