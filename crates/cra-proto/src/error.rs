//! Protocol error types and the wire error code.

use thiserror::Error;

/// Errors raised while framing or parsing protocol traffic.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Byte array exceeds the framing limit.
    #[error("byte array too large: {size} bytes (max {max})")]
    ArrayTooLarge { size: usize, max: usize },

    /// Malformed 7-bit varint length prefix.
    #[error("invalid varint length prefix")]
    InvalidVarint,

    /// String argument was not valid UTF-8.
    #[error("invalid UTF-8 string: {0}")]
    InvalidUtf8(String),

    /// Unknown control message tag.
    #[error("unknown message tag: {0}")]
    UnknownMessageTag(i32),

    /// Unknown wire error code in a reply.
    #[error("unknown error code: {0}")]
    UnknownErrorCode(i32),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result code carried in every control reply.
///
/// The numeric values are part of the wire contract and must not
/// change across versions; new codes may be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Operation completed.
    Success = 0,
    /// Referenced vertex does not exist in metadata.
    VertexNotFound = 1,
    /// Referenced endpoint is not registered on the vertex.
    EndpointNotFound = 2,
    /// Sharded endpoint arities do not line up for a full mesh.
    VerticesEndpointsNotMatched = 3,
    /// The connection could not be established live.
    ConnectionEstablishFailed = 4,
    /// No definition row exists for the requested vertex type.
    VertexNotDefined = 5,
    /// The vertex factory or its initialiser failed.
    InitializationFailed = 6,
    /// Unclassified failure inside the serving worker.
    ServerFailed = 7,
}

impl ErrorCode {
    /// Returns the numeric wire value of this code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Creates an error code from its numeric wire value.
    #[must_use]
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::VertexNotFound),
            2 => Some(Self::EndpointNotFound),
            3 => Some(Self::VerticesEndpointsNotMatched),
            4 => Some(Self::ConnectionEstablishFailed),
            5 => Some(Self::VertexNotDefined),
            6 => Some(Self::InitializationFailed),
            7 => Some(Self::ServerFailed),
            _ => None,
        }
    }

    /// True for [`ErrorCode::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::VertexNotFound => write!(f, "vertex_not_found"),
            Self::EndpointNotFound => write!(f, "endpoint_not_found"),
            Self::VerticesEndpointsNotMatched => write!(f, "vertices_endpoints_not_matched"),
            Self::ConnectionEstablishFailed => write!(f, "connection_establish_failed"),
            Self::VertexNotDefined => write!(f, "vertex_not_defined"),
            Self::InitializationFailed => write!(f, "initialization_failed"),
            Self::ServerFailed => write!(f, "server_failed"),
        }
    }
}
