//! The per-vertex endpoint registry handed to user code.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use cra_meta::Direction;

use crate::endpoint::{AsyncInputEndpoint, AsyncOutputEndpoint, InputEndpoint, OutputEndpoint};
use crate::error::VertexError;

/// Runtime-injected callbacks fired when a vertex registers or loses
/// an endpoint. The hosting worker persists the endpoint row here; a
/// detached vertex wires its own persistence.
#[async_trait]
pub trait EndpointRegistrar: Send + Sync {
    /// An endpoint was registered on the vertex.
    async fn endpoint_added(
        &self,
        vertex: &str,
        endpoint: &str,
        direction: Direction,
        is_async: bool,
    ) -> Result<(), VertexError>;

    /// An endpoint was removed from the vertex.
    async fn endpoint_removed(&self, vertex: &str, endpoint: &str) -> Result<(), VertexError>;
}

/// Registrar that persists nothing. For tests and local experiments.
#[derive(Debug, Default)]
pub struct NoopRegistrar;

#[async_trait]
impl EndpointRegistrar for NoopRegistrar {
    async fn endpoint_added(
        &self,
        _vertex: &str,
        _endpoint: &str,
        _direction: Direction,
        _is_async: bool,
    ) -> Result<(), VertexError> {
        Ok(())
    }

    async fn endpoint_removed(&self, _vertex: &str, _endpoint: &str) -> Result<(), VertexError> {
        Ok(())
    }
}

/// Endpoint maps of one hosted vertex, plus the registrar that
/// persists changes to them.
///
/// Handed to [`crate::Vertex::initialize`]; the runtime consults the
/// same maps when an established stream has to be routed to an
/// endpoint by name.
pub struct VertexContext {
    vertex: String,
    inputs: DashMap<String, Arc<dyn InputEndpoint>>,
    outputs: DashMap<String, Arc<dyn OutputEndpoint>>,
    async_inputs: DashMap<String, Arc<dyn AsyncInputEndpoint>>,
    async_outputs: DashMap<String, Arc<dyn AsyncOutputEndpoint>>,
    registrar: Arc<dyn EndpointRegistrar>,
}

impl VertexContext {
    /// Creates an empty context for the named vertex.
    #[must_use]
    pub fn new(vertex: impl Into<String>, registrar: Arc<dyn EndpointRegistrar>) -> Self {
        Self {
            vertex: vertex.into(),
            inputs: DashMap::new(),
            outputs: DashMap::new(),
            async_inputs: DashMap::new(),
            async_outputs: DashMap::new(),
            registrar,
        }
    }

    /// Name of the vertex this context belongs to.
    #[must_use]
    pub fn vertex_name(&self) -> &str {
        &self.vertex
    }

    /// Registers a sync input endpoint.
    pub async fn add_input_endpoint(
        &self,
        name: &str,
        endpoint: Arc<dyn InputEndpoint>,
    ) -> Result<(), VertexError> {
        if self.inputs.contains_key(name) {
            return Err(VertexError::EndpointExists(name.to_owned()));
        }
        self.inputs.insert(name.to_owned(), endpoint);
        self.registrar
            .endpoint_added(&self.vertex, name, Direction::Input, false)
            .await
    }

    /// Registers a sync output endpoint.
    pub async fn add_output_endpoint(
        &self,
        name: &str,
        endpoint: Arc<dyn OutputEndpoint>,
    ) -> Result<(), VertexError> {
        if self.outputs.contains_key(name) {
            return Err(VertexError::EndpointExists(name.to_owned()));
        }
        self.outputs.insert(name.to_owned(), endpoint);
        self.registrar
            .endpoint_added(&self.vertex, name, Direction::Output, false)
            .await
    }

    /// Registers an async input endpoint.
    pub async fn add_async_input_endpoint(
        &self,
        name: &str,
        endpoint: Arc<dyn AsyncInputEndpoint>,
    ) -> Result<(), VertexError> {
        if self.async_inputs.contains_key(name) {
            return Err(VertexError::EndpointExists(name.to_owned()));
        }
        self.async_inputs.insert(name.to_owned(), endpoint);
        self.registrar
            .endpoint_added(&self.vertex, name, Direction::Input, true)
            .await
    }

    /// Registers an async output endpoint.
    pub async fn add_async_output_endpoint(
        &self,
        name: &str,
        endpoint: Arc<dyn AsyncOutputEndpoint>,
    ) -> Result<(), VertexError> {
        if self.async_outputs.contains_key(name) {
            return Err(VertexError::EndpointExists(name.to_owned()));
        }
        self.async_outputs.insert(name.to_owned(), endpoint);
        self.registrar
            .endpoint_added(&self.vertex, name, Direction::Output, true)
            .await
    }

    /// Removes an endpoint from whichever map holds it, notifying the
    /// registrar when one was present.
    pub async fn remove_endpoint(&self, name: &str) -> Result<bool, VertexError> {
        let removed = self.inputs.remove(name).is_some()
            | self.outputs.remove(name).is_some()
            | self.async_inputs.remove(name).is_some()
            | self.async_outputs.remove(name).is_some();

        if removed {
            self.registrar.endpoint_removed(&self.vertex, name).await?;
        }

        Ok(removed)
    }

    /// Looks up a sync input endpoint.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<Arc<dyn InputEndpoint>> {
        self.inputs.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Looks up a sync output endpoint.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<Arc<dyn OutputEndpoint>> {
        self.outputs.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Looks up an async input endpoint.
    #[must_use]
    pub fn async_input(&self, name: &str) -> Option<Arc<dyn AsyncInputEndpoint>> {
        self.async_inputs.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Looks up an async output endpoint.
    #[must_use]
    pub fn async_output(&self, name: &str) -> Option<Arc<dyn AsyncOutputEndpoint>> {
        self.async_outputs.get(name).map(|e| Arc::clone(e.value()))
    }

    /// True when any map holds an endpoint with this name.
    #[must_use]
    pub fn has_endpoint(&self, name: &str) -> bool {
        self.inputs.contains_key(name)
            || self.outputs.contains_key(name)
            || self.async_inputs.contains_key(name)
            || self.async_outputs.contains_key(name)
    }

    /// Names of every registered endpoint.
    #[must_use]
    pub fn endpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inputs
            .iter()
            .map(|e| e.key().clone())
            .chain(self.outputs.iter().map(|e| e.key().clone()))
            .collect();
        names.extend(self.async_inputs.iter().map(|e| e.key().clone()));
        names.extend(self.async_outputs.iter().map(|e| e.key().clone()));
        names.sort();
        names
    }
}

impl std::fmt::Debug for VertexContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexContext")
            .field("vertex", &self.vertex)
            .field("endpoints", &self.endpoint_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    struct Sink;

    #[async_trait]
    impl AsyncInputEndpoint for Sink {
        async fn run(&self, _stream: TcpStream) -> Result<(), VertexError> {
            Ok(())
        }
    }

    #[async_trait]
    impl AsyncOutputEndpoint for Sink {
        async fn run(&self, _stream: TcpStream) -> Result<(), VertexError> {
            Ok(())
        }
    }

    fn context() -> VertexContext {
        VertexContext::new("ea", Arc::new(NoopRegistrar))
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let ctx = context();

        ctx.add_async_input_endpoint("in", Arc::new(Sink))
            .await
            .unwrap();
        ctx.add_async_output_endpoint("out", Arc::new(Sink))
            .await
            .unwrap();

        assert!(ctx.async_input("in").is_some());
        assert!(ctx.async_output("out").is_some());
        assert!(ctx.async_input("out").is_none());
        assert!(ctx.has_endpoint("in"));
        assert_eq!(ctx.endpoint_names(), ["in", "out"]);
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let ctx = context();

        ctx.add_async_input_endpoint("in", Arc::new(Sink))
            .await
            .unwrap();
        let err = ctx
            .add_async_input_endpoint("in", Arc::new(Sink))
            .await
            .unwrap_err();
        assert!(matches!(err, VertexError::EndpointExists(_)));
    }

    #[tokio::test]
    async fn remove_endpoint() {
        let ctx = context();

        ctx.add_async_input_endpoint("in", Arc::new(Sink))
            .await
            .unwrap();

        assert!(ctx.remove_endpoint("in").await.unwrap());
        assert!(!ctx.has_endpoint("in"));
        assert!(!ctx.remove_endpoint("in").await.unwrap());
    }
}
