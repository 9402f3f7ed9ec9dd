use bytes::{Buf, BufMut, Bytes};
use crate::protocol::binary::{CodecError, CodecResult, RakBuf, RakBufMut};
use crate::protocol::reliability::PacketReliability;
use crate::safe_converter::PrecheckedCast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderInfo {
    pub order_index: u32,
    pub order_channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitPacketInfo {
    pub split_id: u16,
    pub part_index: u32,
    pub total_part_count: u32,
}

/// The reliability metadata of an encapsulated packet, one variant per wire reliability class.
///  Each variant carries exactly the indices its class puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliabilityHeader {
    Unreliable,
    UnreliableSequenced {
        sequence_index: u32,
        order: OrderInfo,
    },
    Reliable {
        message_index: u32,
    },
    ReliableOrdered {
        message_index: u32,
        order: OrderInfo,
    },
    ReliableSequenced {
        message_index: u32,
        sequence_index: u32,
        order: OrderInfo,
    },
}

impl ReliabilityHeader {
    pub fn reliability(&self) -> PacketReliability {
        match self {
            ReliabilityHeader::Unreliable => PacketReliability::Unreliable,
            ReliabilityHeader::UnreliableSequenced { .. } => PacketReliability::UnreliableSequenced,
            ReliabilityHeader::Reliable { .. } => PacketReliability::Reliable,
            ReliabilityHeader::ReliableOrdered { .. } => PacketReliability::ReliableOrdered,
            ReliabilityHeader::ReliableSequenced { .. } => PacketReliability::ReliableSequenced,
        }
    }

    pub fn message_index(&self) -> Option<u32> {
        match self {
            ReliabilityHeader::Reliable { message_index }
            | ReliabilityHeader::ReliableOrdered { message_index, .. }
            | ReliabilityHeader::ReliableSequenced { message_index, .. } => Some(*message_index),
            _ => None,
        }
    }

    pub fn sequence_index(&self) -> Option<u32> {
        match self {
            ReliabilityHeader::UnreliableSequenced { sequence_index, .. }
            | ReliabilityHeader::ReliableSequenced { sequence_index, .. } => Some(*sequence_index),
            _ => None,
        }
    }

    pub fn order(&self) -> Option<OrderInfo> {
        match self {
            ReliabilityHeader::UnreliableSequenced { order, .. }
            | ReliabilityHeader::ReliableOrdered { order, .. }
            | ReliabilityHeader::ReliableSequenced { order, .. } => Some(*order),
            _ => None,
        }
    }

    /// Builds the header for a wire reliability class from the indices the sender assigned. Indices
    ///  that the class does not carry are ignored, missing ones default to 0.
    pub fn for_reliability(reliability: PacketReliability, message_index: Option<u32>, sequence_index: Option<u32>, order: Option<OrderInfo>) -> ReliabilityHeader {
        use PacketReliability::*;

        let message_index = message_index.unwrap_or(0);
        let sequence_index = sequence_index.unwrap_or(0);
        let order = order.unwrap_or(OrderInfo { order_index: 0, order_channel: 0 });

        match reliability.wire_class() {
            UnreliableSequenced => ReliabilityHeader::UnreliableSequenced { sequence_index, order },
            Reliable => ReliabilityHeader::Reliable { message_index },
            ReliableOrdered => ReliabilityHeader::ReliableOrdered { message_index, order },
            ReliableSequenced => ReliabilityHeader::ReliableSequenced { message_index, sequence_index, order },
            Unreliable | UnreliableWithAckReceipt | ReliableWithAckReceipt | ReliableOrderedWithAckReceipt => ReliabilityHeader::Unreliable,
        }
    }

    fn ser(&self, buf: &mut impl BufMut) {
        if let Some(message_index) = self.message_index() {
            buf.put_triad(message_index);
        }
        if let Some(sequence_index) = self.sequence_index() {
            buf.put_triad(sequence_index);
        }
        if let Some(order) = self.order() {
            buf.put_triad(order.order_index);
            buf.put_u8(order.order_channel);
        }
    }

    fn deser(reliability: PacketReliability, buf: &mut impl Buf) -> CodecResult<ReliabilityHeader> {
        let message_index = if reliability.is_reliable() { Some(buf.read_triad()?) } else { None };
        let sequence_index = if reliability.is_sequenced() { Some(buf.read_triad()?) } else { None };
        let order = if reliability.is_sequenced_or_ordered() {
            let order_index = buf.read_triad()?;
            let order_channel = buf.read_u8()?;
            Some(OrderInfo { order_index, order_channel })
        }
        else {
            None
        };

        Ok(ReliabilityHeader::for_reliability(reliability, message_index, sequence_index, order))
    }

    fn serialized_len(&self) -> usize {
        let mut result = 0;
        if self.message_index().is_some() {
            result += 3;
        }
        if self.sequence_index().is_some() {
            result += 3;
        }
        if self.order().is_some() {
            result += 4;
        }
        result
    }
}

/// One logical message unit inside a datagram, possibly a fragment of a bigger message:
///
/// ```ascii
/// 0: flags (u8): reliability << 5, 0x10 if split
/// 1: payload length in *bits* (u16)
/// 3: message index (triad) if reliable
///    sequence index (triad) if sequenced
///    order index (triad) + order channel (u8) if sequenced or ordered
///    split count (u32), split id (u16), split index (u32) if split
///    payload
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapsulatedPacket {
    pub header: ReliabilityHeader,
    pub split: Option<SplitPacketInfo>,
    pub buffer: Bytes,
    /// local only: the delivery receipt requested for this packet, never on the wire
    pub identifier_ack: Option<u32>,
}

impl EncapsulatedPacket {
    const SPLIT_FLAG: u8 = 0x10;
    const SPLIT_INFO_LEN: usize = 10;

    /// flags and length, present for every encapsulated packet
    pub const MIN_HEADER_LEN: usize = 3;

    pub fn new(header: ReliabilityHeader, buffer: Bytes) -> EncapsulatedPacket {
        EncapsulatedPacket {
            header,
            split: None,
            buffer,
            identifier_ack: None,
        }
    }

    pub fn reliability(&self) -> PacketReliability {
        self.header.reliability()
    }

    pub fn header_len(&self) -> usize {
        Self::MIN_HEADER_LEN
            + self.header.serialized_len()
            + if self.split.is_some() { Self::SPLIT_INFO_LEN } else { 0 }
    }

    pub fn total_len(&self) -> usize {
        self.header_len() + self.buffer.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let reliability: u8 = self.reliability().into();
        let split_flag = if self.split.is_some() { Self::SPLIT_FLAG } else { 0 };
        buf.put_u8((reliability << 5) | split_flag);

        let len_bits: u16 = (self.buffer.len() * 8).prechecked_cast();
        buf.put_u16(len_bits);

        self.header.ser(buf);

        if let Some(split) = &self.split {
            buf.put_u32(split.total_part_count);
            buf.put_u16(split.split_id);
            buf.put_u32(split.part_index);
        }

        buf.put_slice(&self.buffer);
    }

    pub fn deser(buf: &mut impl Buf) -> CodecResult<EncapsulatedPacket> {
        let flags = buf.read_u8()?;
        let reliability = PacketReliability::from_wire(flags >> 5)?.wire_class();
        let has_split = flags & Self::SPLIT_FLAG != 0;

        let len_bits = buf.read_u16()?;
        let len = usize::from(len_bits).div_ceil(8);
        if len == 0 {
            return Err(CodecError::ZeroLengthPayload);
        }

        let header = ReliabilityHeader::deser(reliability, buf)?;

        let split = if has_split {
            let total_part_count = buf.read_u32()?;
            let split_id = buf.read_u16()?;
            let part_index = buf.read_u32()?;
            Some(SplitPacketInfo { split_id, part_index, total_part_count })
        }
        else {
            None
        };

        let buffer = buf.read_bytes(len)?;

        Ok(EncapsulatedPacket {
            header,
            split,
            buffer,
            identifier_ack: None,
        })
    }
}
