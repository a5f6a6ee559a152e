//! Client control plane of the dataflow fabric.
//!
//! The client mutates topology in the metadata store and issues
//! best-effort control RPCs to workers. Metadata writes are
//! authoritative: a failed RPC returns its error code without rolling
//! anything back, and the owning worker re-applies the intent on its
//! next reconcile.
//!
//! A *detached vertex* participates in the same naming and connection
//! fabric while living in the client process. It dials workers
//! directly for its streams and never accepts inbound dials.

mod client;
mod detached;
mod error;

pub use client::{ConnectionInitiator, DataflowClient};
pub use detached::DetachedVertex;
pub use error::ClientError;
