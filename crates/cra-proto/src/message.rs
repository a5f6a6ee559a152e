//! Control message tags.

/// Tag opening every control frame.
///
/// Numeric values are fixed by the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageTag {
    /// Instantiate a vertex on the receiving worker.
    LoadVertex = 0,
    /// Ask the receiving worker to initiate a connection it owns.
    ConnectVertexInitiator = 1,
    /// Initiator variant with the TCP dial reversed.
    ConnectVertexInitiatorReverse = 2,
    /// Hand the receiving worker one side of a data stream.
    ConnectVertexReceiver = 3,
    /// Receiver variant with the TCP dial reversed.
    ConnectVertexReceiverReverse = 4,
}

impl MessageTag {
    /// Returns the numeric wire value of this tag.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Creates a tag from its numeric wire value.
    #[must_use]
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::LoadVertex),
            1 => Some(Self::ConnectVertexInitiator),
            2 => Some(Self::ConnectVertexInitiatorReverse),
            3 => Some(Self::ConnectVertexReceiver),
            4 => Some(Self::ConnectVertexReceiverReverse),
            _ => None,
        }
    }

    /// True for the reverse-dial variants.
    ///
    /// Reverse only swaps who opens the TCP connection; the data
    /// direction stays `from -> to`.
    #[must_use]
    pub const fn is_reverse(self) -> bool {
        matches!(
            self,
            Self::ConnectVertexInitiatorReverse | Self::ConnectVertexReceiverReverse
        )
    }

    /// True for the receiver-side tags, after which the socket becomes
    /// a data stream.
    #[must_use]
    pub const fn is_receiver(self) -> bool {
        matches!(
            self,
            Self::ConnectVertexReceiver | Self::ConnectVertexReceiverReverse
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        let tags = [
            MessageTag::LoadVertex,
            MessageTag::ConnectVertexInitiator,
            MessageTag::ConnectVertexInitiatorReverse,
            MessageTag::ConnectVertexReceiver,
            MessageTag::ConnectVertexReceiverReverse,
        ];

        for tag in tags {
            assert_eq!(MessageTag::from_i32(tag.as_i32()), Some(tag));
        }

        assert_eq!(MessageTag::from_i32(5), None);
        assert_eq!(MessageTag::from_i32(-1), None);
    }

    #[test]
    fn tag_classification() {
        assert!(MessageTag::ConnectVertexInitiatorReverse.is_reverse());
        assert!(MessageTag::ConnectVertexReceiverReverse.is_reverse());
        assert!(!MessageTag::ConnectVertexInitiator.is_reverse());

        assert!(MessageTag::ConnectVertexReceiver.is_receiver());
        assert!(!MessageTag::LoadVertex.is_receiver());
    }
}
