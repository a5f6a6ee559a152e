//! The user-facing vertex contract.

use async_trait::async_trait;

use crate::context::VertexContext;
use crate::error::VertexError;

/// A user computation hosted in a worker (or, detached, in a client
/// process).
///
/// The runtime calls [`Vertex::initialize`] exactly once after
/// creation, synchronously with the load; endpoint registration
/// happens there through the supplied context. [`Vertex::dispose`] is
/// infallible from the runtime's point of view: the runtime releases
/// endpoint rows and streams regardless of what user code does here.
#[async_trait]
pub trait Vertex: Send + Sync {
    /// Called once after creation; may register endpoints.
    async fn initialize(&self, ctx: &VertexContext, parameter: &[u8]) -> Result<(), VertexError>;

    /// Releases user resources. Default does nothing.
    async fn dispose(&self) {}
}
