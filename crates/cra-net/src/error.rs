use cra_proto::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Errors raised while dialling or speaking the control protocol.
#[derive(Debug, Error)]
pub enum NetError {
    /// Could not reach the remote worker.
    #[error("dial failed for {address}:{port}: {reason}")]
    Dial {
        address: String,
        port: u16,
        reason: String,
    },

    /// The remote did not answer within [`crate::RPC_TIMEOUT`].
    #[error("timed out waiting for reply")]
    Timeout,

    /// The remote refused a receiver handoff.
    #[error("remote refused stream: {0}")]
    Refused(ErrorCode),

    /// Framing failure on the control stream.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
