//! Cached idle outbound TCP streams.

use dashmap::DashMap;
use tokio::net::TcpStream;
use tracing::debug;

/// Default idle streams kept per `(address, port)`.
pub const DEFAULT_POOL_CAPACITY: usize = 8;

/// Process-wide pool of idle outbound streams, keyed by remote
/// `(address, port)`, each bucket a bounded LIFO.
///
/// Callers that observe an I/O error on a stream must drop it rather
/// than release it; the pool assumes released streams are healthy.
/// Entries carry no TTL.
pub struct StreamPool {
    buckets: DashMap<(String, u16), Vec<TcpStream>>,
    capacity: usize,
}

impl StreamPool {
    /// Creates a pool with [`DEFAULT_POOL_CAPACITY`] per bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Creates a pool with the given per-bucket capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
        }
    }

    /// Pops an idle stream for the remote, if one is cached.
    #[must_use]
    pub fn try_get(&self, address: &str, port: u16) -> Option<TcpStream> {
        let mut bucket = self.buckets.get_mut(&(address.to_owned(), port))?;
        bucket.pop()
    }

    /// Returns a healthy stream to the pool. Over-capacity streams
    /// are dropped, which closes them.
    pub fn release(&self, address: &str, port: u16, stream: TcpStream) {
        let mut bucket = self
            .buckets
            .entry((address.to_owned(), port))
            .or_default();

        if bucket.len() < self.capacity {
            bucket.push(stream);
        } else {
            debug!(address, port, "stream pool bucket full, closing stream");
        }
    }

    /// A pooled stream if one is idle, otherwise a fresh dial.
    pub async fn acquire(&self, address: &str, port: u16) -> std::io::Result<TcpStream> {
        if let Some(stream) = self.try_get(address, port) {
            return Ok(stream);
        }
        TcpStream::connect((address, port)).await
    }

    /// Number of idle streams cached for the remote.
    #[must_use]
    pub fn idle_count(&self, address: &str, port: u16) -> usize {
        self.buckets
            .get(&(address.to_owned(), port))
            .map_or(0, |bucket| bucket.len())
    }
}

impl Default for StreamPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPool")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
