use thiserror::Error;

/// Errors raised by the vertex runtime.
#[derive(Debug, Error)]
pub enum VertexError {
    /// The vertex initialiser failed.
    #[error("initialisation failed: {0}")]
    Initialization(String),

    /// Persisting or removing an endpoint row failed.
    #[error("endpoint registration failed: {0}")]
    Registration(String),

    /// An endpoint with this name and kind already exists.
    #[error("endpoint already registered: {0}")]
    EndpointExists(String),

    /// Parameter blob could not be encoded or decoded.
    #[error("parameter serialisation failed: {0}")]
    Serialisation(String),

    /// I/O failure on an endpoint stream.
    #[error("endpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}
