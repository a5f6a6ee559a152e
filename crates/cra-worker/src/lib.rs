//! The worker process of the dataflow fabric.
//!
//! A worker registers its `(instance, address, port)` row, loads
//! every vertex metadata says it should host, reconciles outstanding
//! connections, and serves the framed control protocol on its
//! instance port. Each accepted socket runs on its own task; after a
//! successful receiver handoff the socket leaves the dispatcher and
//! becomes a data stream owned by an endpoint task.
//!
//! Connection establishment is best-effort: the metadata row is
//! authoritative, and anything not established live is retried by the
//! reconciler with exponential backoff.

mod connections;
mod error;
mod hosted;
mod server;

pub use error::WorkerError;
pub use server::WorkerServer;
