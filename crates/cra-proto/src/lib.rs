//! Wire protocol for CRA inter-process communication.
//!
//! Every control exchange between clients and workers, and between
//! workers, uses the same byte-oriented framing over a duplex TCP
//! stream:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │        Message tag (int32, little-endian)                │
//! ├──────────────────────────────────────────────────────────┤
//! │        Arguments (length-prefixed byte arrays)           │
//! ├──────────────────────────────────────────────────────────┤
//! │        Reply: error code (int32, little-endian)          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Byte arrays carry a 7-bit-encoded varint length prefix (seven
//! payload bits per byte, continuation bit high) followed by the raw
//! payload. Strings travel as UTF-8 byte arrays. There are no
//! checksums and no version negotiation; streams are point-to-point
//! and trusted once the connection is accepted.
//!
//! After a successful `ConnectVertexReceiver` reply the same socket
//! becomes the data stream and the dispatcher must not read from it
//! again.

pub mod codec;
mod error;
mod message;

pub use error::{ErrorCode, ProtocolError};
pub use message::MessageTag;
