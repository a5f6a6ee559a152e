//! Endpoint capability traits.
//!
//! An endpoint owns one side of an established byte stream: inputs
//! consume bytes until closure, outputs produce them. Peers treat EOF
//! as normal termination. Async endpoints yield between reads and
//! writes and run on an ordinary task; sync endpoints receive a
//! blocking stream and run on a dedicated blocking thread.

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::VertexError;

/// Async input endpoint: consumes an inbound stream.
#[async_trait]
pub trait AsyncInputEndpoint: Send + Sync {
    /// Consumes bytes from the stream until closure.
    async fn run(&self, stream: TcpStream) -> Result<(), VertexError>;
}

/// Async output endpoint: produces onto an outbound stream.
#[async_trait]
pub trait AsyncOutputEndpoint: Send + Sync {
    /// Produces bytes onto the stream until done or closed.
    async fn run(&self, stream: TcpStream) -> Result<(), VertexError>;
}

/// Sync input endpoint. Permitted to block its thread.
pub trait InputEndpoint: Send + Sync {
    /// Consumes bytes from the stream until closure.
    fn run(&self, stream: std::net::TcpStream) -> Result<(), VertexError>;
}

/// Sync output endpoint. Permitted to block its thread.
pub trait OutputEndpoint: Send + Sync {
    /// Produces bytes onto the stream until done or closed.
    fn run(&self, stream: std::net::TcpStream) -> Result<(), VertexError>;
}
