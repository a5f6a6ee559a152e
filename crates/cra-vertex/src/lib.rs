//! In-process vertex lifecycle.
//!
//! A *vertex* is a user-supplied computation hosted by a worker. The
//! runtime creates it from a registered factory, calls
//! [`Vertex::initialize`] exactly once, and hands established byte
//! streams to the endpoints it registered. Endpoint registration
//! flows through a [`VertexContext`], which stores the endpoint
//! locally and notifies a runtime-provided [`EndpointRegistrar`] so
//! the endpoint row can be persisted.
//!
//! Factories are resolved by definition name from a process-wide
//! registry; the definition row in metadata stores only the registry
//! key, so any worker that links the user crate can materialise any
//! defined vertex.

mod context;
mod endpoint;
mod error;
mod factory;
mod params;
mod vertex;

pub use context::{EndpointRegistrar, NoopRegistrar, VertexContext};
pub use endpoint::{AsyncInputEndpoint, AsyncOutputEndpoint, InputEndpoint, OutputEndpoint};
pub use error::VertexError;
pub use factory::{global_registry, VertexConstructor, VertexFactoryRegistry};
pub use params::{deserialize_params, serialize_params, ShardedParameter};
pub use vertex::Vertex;
