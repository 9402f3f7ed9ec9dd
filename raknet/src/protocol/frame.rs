use bytes::{Buf, BufMut};
use crate::protocol::acknowledge_packet::AcknowledgePacket;
use crate::protocol::binary::{CodecError, CodecResult, RakBuf};
use crate::protocol::datagram::{Datagram, DatagramFlags};

/// Everything a connected peer can send, distinguished by the flags in the leading byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectedFrame {
    Datagram(Datagram),
    Ack(AcknowledgePacket),
    Nack(AcknowledgePacket),
}

impl ConnectedFrame {
    pub const ACK_HEADER: u8 = DatagramFlags::VALID.bits() | DatagramFlags::ACK.bits();
    pub const NACK_HEADER: u8 = DatagramFlags::VALID.bits() | DatagramFlags::NAK.bits();

    /// checks whether a UDP payload is a connected frame (as opposed to an offline message)
    pub fn is_connected_frame(packet_buf: &[u8]) -> bool {
        packet_buf.first()
            .is_some_and(|&b| DatagramFlags::from_bits_truncate(b).contains(DatagramFlags::VALID))
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        match self {
            ConnectedFrame::Datagram(datagram) => datagram.ser(buf),
            ConnectedFrame::Ack(ack) => {
                buf.put_u8(Self::ACK_HEADER);
                ack.ser(buf);
            }
            ConnectedFrame::Nack(nack) => {
                buf.put_u8(Self::NACK_HEADER);
                nack.ser(buf);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> CodecResult<ConnectedFrame> {
        buf.ensure_remaining(1)?;
        let raw_flags = buf.chunk()[0];
        let flags = DatagramFlags::from_bits_truncate(raw_flags);

        if !flags.contains(DatagramFlags::VALID) {
            return Err(CodecError::UnexpectedFrameHeader(raw_flags));
        }

        if flags.contains(DatagramFlags::ACK) {
            buf.advance(1);
            Ok(ConnectedFrame::Ack(AcknowledgePacket::deser(buf)?))
        }
        else if flags.contains(DatagramFlags::NAK) {
            buf.advance(1);
            Ok(ConnectedFrame::Nack(AcknowledgePacket::deser(buf)?))
        }
        else {
            Ok(ConnectedFrame::Datagram(Datagram::deser(buf)?))
        }
    }
}
