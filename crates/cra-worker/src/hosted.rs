//! Live vertices hosted in this process.

use std::sync::Arc;

use async_trait::async_trait;

use cra_meta::{Direction, EndpointManager};
use cra_vertex::{EndpointRegistrar, Vertex, VertexContext, VertexError};

/// A materialised vertex and its endpoint maps.
pub(crate) struct HostedVertex {
    pub name: String,
    pub definition: String,
    pub vertex: Arc<dyn Vertex>,
    pub context: Arc<VertexContext>,
}

/// Registrar that persists endpoint registrations as rows.
pub(crate) struct RowRegistrar {
    endpoints: EndpointManager,
}

impl RowRegistrar {
    pub fn new(endpoints: EndpointManager) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl EndpointRegistrar for RowRegistrar {
    async fn endpoint_added(
        &self,
        vertex: &str,
        endpoint: &str,
        direction: Direction,
        is_async: bool,
    ) -> Result<(), VertexError> {
        self.endpoints
            .add_endpoint(vertex, endpoint, direction, is_async)
            .await
            .map_err(|e| VertexError::Registration(e.to_string()))
    }

    async fn endpoint_removed(&self, vertex: &str, endpoint: &str) -> Result<(), VertexError> {
        self.endpoints
            .delete_endpoint(vertex, endpoint)
            .await
            .map(|_| ())
            .map_err(|e| VertexError::Registration(e.to_string()))
    }
}
