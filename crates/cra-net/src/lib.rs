//! Network plumbing shared by workers and clients: a process-wide
//! pool of idle outbound TCP streams, and the framed control-RPC
//! calls of the wire protocol.

mod error;
mod pool;
mod rpc;

pub use error::NetError;
pub use pool::{StreamPool, DEFAULT_POOL_CAPACITY};
pub use rpc::{ControlClient, RPC_TIMEOUT};
