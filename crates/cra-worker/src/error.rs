use cra_meta::MetaError;
use cra_proto::ProtocolError;
use thiserror::Error;

/// Fatal worker errors. Per-request failures travel as wire error
/// codes instead.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The instance port could not be bound.
    #[error("failed to bind {address}:{port}: {source}")]
    Bind {
        address: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Metadata access failed during start-up.
    #[error(transparent)]
    Meta(#[from] MetaError),

    /// Framing failure on a control stream.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
