//! Common test utilities for worker integration tests.

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use cra_client::DataflowClient;
use cra_store::{ArtifactStore, MemoryArtifactStore, MemoryTableService, TableService};
use cra_worker::WorkerServer;

/// A loopback cluster over a shared in-memory metadata store.
pub struct TestCluster {
    pub tables: Arc<dyn TableService>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub client: DataflowClient,
}

impl TestCluster {
    /// Creates a cluster with empty stores.
    pub fn new() -> Self {
        let tables: Arc<dyn TableService> = Arc::new(MemoryTableService::new());
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
        let client = DataflowClient::new(Arc::clone(&tables), Arc::clone(&artifacts));

        Self {
            tables,
            artifacts,
            client,
        }
    }

    /// Starts a worker on a free loopback port and waits until it
    /// accepts connections.
    pub async fn start_worker(&self, instance: &str) -> Arc<WorkerServer> {
        self.start_worker_on(instance, free_port()).await
    }

    /// Starts a worker on the given port, for restart scenarios.
    pub async fn start_worker_on(&self, instance: &str, port: u16) -> Arc<WorkerServer> {
        let server = WorkerServer::new(
            instance,
            "127.0.0.1",
            port,
            Arc::clone(&self.tables),
            Arc::clone(&self.artifacts),
            fixtures::test_registry(),
        );

        let runner = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                panic!("worker failed: {e}");
            }
        });

        wait_for_port(port).await;
        server
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks a currently-free loopback port.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    listener.local_addr().expect("probe addr").port()
}

/// Polls until something accepts connections on the port.
pub async fn wait_for_port(port: u16) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("port {port} never came up");
}

/// Retries an async operation until it yields `Some`, or panics after
/// the deadline.
pub async fn eventually<F, Fut, T>(deadline: Duration, mut operation: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let start = tokio::time::Instant::now();
    loop {
        if let Some(value) = operation().await {
            return value;
        }
        if start.elapsed() > deadline {
            panic!("condition not reached within {deadline:?}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
