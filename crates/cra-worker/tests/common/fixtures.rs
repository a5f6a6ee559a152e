//! Test vertices.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use cra_vertex::{
    AsyncInputEndpoint, AsyncOutputEndpoint, Vertex, VertexContext, VertexError,
    VertexFactoryRegistry,
};

/// Registry holding every test vertex definition.
pub fn test_registry() -> VertexFactoryRegistry {
    let registry = VertexFactoryRegistry::new();
    registry.register("echo", || Arc::new(EchoVertex::new()) as Arc<dyn Vertex>);
    registry.register("labeled", || Arc::new(LabeledVertex) as Arc<dyn Vertex>);
    registry
}

/// Echoes every byte received on `in` back out of `out`.
pub struct EchoVertex {
    tx: mpsc::Sender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
}

impl EchoVertex {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

#[async_trait]
impl Vertex for EchoVertex {
    async fn initialize(&self, ctx: &VertexContext, _parameter: &[u8]) -> Result<(), VertexError> {
        ctx.add_async_input_endpoint("in", Arc::new(EchoIn(self.tx.clone())))
            .await?;
        ctx.add_async_output_endpoint("out", Arc::new(EchoOut(Arc::clone(&self.rx))))
            .await?;
        Ok(())
    }
}

struct EchoIn(mpsc::Sender<Vec<u8>>);

#[async_trait]
impl AsyncInputEndpoint for EchoIn {
    async fn run(&self, mut stream: TcpStream) -> Result<(), VertexError> {
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            if self.0.send(buf[..n].to_vec()).await.is_err() {
                return Ok(());
            }
        }
    }
}

struct EchoOut(Arc<Mutex<mpsc::Receiver<Vec<u8>>>>);

#[async_trait]
impl AsyncOutputEndpoint for EchoOut {
    async fn run(&self, mut stream: TcpStream) -> Result<(), VertexError> {
        let mut rx = self.0.lock().await;
        while let Some(chunk) = rx.recv().await {
            stream.write_all(&chunk).await?;
            stream.flush().await?;
        }
        Ok(())
    }
}

/// Registers one input endpoint named after its parameter blob, for
/// reload tests.
pub struct LabeledVertex;

#[async_trait]
impl Vertex for LabeledVertex {
    async fn initialize(&self, ctx: &VertexContext, parameter: &[u8]) -> Result<(), VertexError> {
        let label = String::from_utf8_lossy(parameter);
        ctx.add_async_input_endpoint(&format!("in-{label}"), Arc::new(DrainIn))
            .await?;
        Ok(())
    }
}

struct DrainIn;

#[async_trait]
impl AsyncInputEndpoint for DrainIn {
    async fn run(&self, mut stream: TcpStream) -> Result<(), VertexError> {
        let mut buf = [0u8; 1024];
        while stream.read(&mut buf).await? > 0 {}
        Ok(())
    }
}
