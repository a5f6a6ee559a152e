use cra_meta::MetaError;
use cra_net::NetError;
use cra_store::StoreError;
use cra_vertex::VertexError;
use thiserror::Error;

/// Errors surfaced by the client control plane.
///
/// Metadata errors are synchronous and never retried here; transient
/// RPC failures are returned as wire error codes by the individual
/// operations instead.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Vertex(#[from] VertexError),

    #[error("internal error: {0}")]
    Internal(String),
}
