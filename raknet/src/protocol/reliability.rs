use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::protocol::binary::CodecError;

/// The delivery guarantee requested for an encapsulated packet.
///
/// The `*WithAckReceipt` variants only exist locally: they ask the send layer to report delivery
///  of the packet, and they go on the wire as their base class (see [PacketReliability::wire_class]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PacketReliability {
    Unreliable = 0,
    UnreliableSequenced = 1,
    Reliable = 2,
    ReliableOrdered = 3,
    ReliableSequenced = 4,
    UnreliableWithAckReceipt = 5,
    ReliableWithAckReceipt = 6,
    ReliableOrderedWithAckReceipt = 7,
}

impl PacketReliability {
    pub fn is_reliable(self) -> bool {
        use PacketReliability::*;
        matches!(self, Reliable | ReliableOrdered | ReliableSequenced | ReliableWithAckReceipt | ReliableOrderedWithAckReceipt)
    }

    pub fn is_sequenced(self) -> bool {
        use PacketReliability::*;
        matches!(self, UnreliableSequenced | ReliableSequenced)
    }

    pub fn is_ordered(self) -> bool {
        use PacketReliability::*;
        matches!(self, ReliableOrdered | ReliableOrderedWithAckReceipt)
    }

    pub fn is_sequenced_or_ordered(self) -> bool {
        self.is_sequenced() || self.is_ordered()
    }

    /// The reliability class that is actually written to the wire
    pub fn wire_class(self) -> PacketReliability {
        use PacketReliability::*;
        match self {
            UnreliableWithAckReceipt => Unreliable,
            ReliableWithAckReceipt => Reliable,
            ReliableOrderedWithAckReceipt => ReliableOrdered,
            other => other,
        }
    }

    /// decodes the top three bits of an encapsulated packet's flags byte
    pub fn from_wire(raw: u8) -> Result<PacketReliability, CodecError> {
        PacketReliability::try_from(raw)
            .map_err(|_| CodecError::InvalidReliability(raw))
    }
}
