use cra_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the metadata managers.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("invalid definition name: {0:?}")]
    InvalidDefinitionName(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("vertex not found: {0}")]
    VertexNotFound(String),

    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
