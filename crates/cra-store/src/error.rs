use thiserror::Error;

/// Errors surfaced by the table service and artifact store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialisation error: {0}")]
    Serialisation(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}
