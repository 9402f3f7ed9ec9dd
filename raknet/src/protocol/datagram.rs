use bitflags::bitflags;
use bytes::{Buf, BufMut};
use crate::protocol::binary::{CodecResult, RakBuf, RakBufMut};
use crate::protocol::encapsulated_packet::EncapsulatedPacket;

bitflags! {
    /// The leading byte of every connected frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DatagramFlags: u8 {
        const VALID           = 0b1000_0000;
        const ACK             = 0b0100_0000;
        const NAK             = 0b0010_0000;

        // vestigial, carried through but not interpreted
        const PACKET_PAIR     = 0b0001_0000;
        const CONTINUOUS_SEND = 0b0000_1000;
        const NEEDS_B_AND_AS  = 0b0000_0100;
    }
}

/// A data frame: the unit that is numbered, acknowledged and resent.
///
/// ```ascii
/// 0: flags (u8), VALID always set
/// 1: sequence number (triad)
/// 4: encapsulated packets, back to back until the end of the UDP payload
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// additional flags besides VALID
    pub header_flags: DatagramFlags,
    pub seq_number: u32,
    pub packets: Vec<EncapsulatedPacket>,
}

impl Datagram {
    pub const HEADER_LEN: usize = 4;

    pub fn new(seq_number: u32, packets: Vec<EncapsulatedPacket>) -> Datagram {
        Datagram {
            header_flags: DatagramFlags::empty(),
            seq_number,
            packets,
        }
    }

    pub fn total_len(&self) -> usize {
        Self::HEADER_LEN + self.packets.iter()
            .map(|p| p.total_len())
            .sum::<usize>()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8((DatagramFlags::VALID | self.header_flags).bits());
        buf.put_triad(self.seq_number);
        for packet in &self.packets {
            packet.ser(buf);
        }
    }

    pub fn deser(buf: &mut impl Buf) -> CodecResult<Datagram> {
        let header_flags = DatagramFlags::from_bits_truncate(buf.read_u8()?)
            .difference(DatagramFlags::VALID);
        let seq_number = buf.read_triad()?;

        let mut packets = Vec::new();
        while buf.has_remaining() {
            packets.push(EncapsulatedPacket::deser(buf)?);
        }

        Ok(Datagram {
            header_flags,
            seq_number,
            packets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};
    use rstest::rstest;
    use crate::protocol::binary::CodecError;
    use crate::protocol::encapsulated_packet::{OrderInfo, ReliabilityHeader};

    fn packet(header: ReliabilityHeader, payload: &'static [u8]) -> EncapsulatedPacket {
        EncapsulatedPacket::new(header, Bytes::from_static(payload))
    }

    #[rstest]
    #[case::empty(0, vec![], vec![0x80, 0,0,0])]
    #[case::single(0x030201, vec![packet(ReliabilityHeader::Unreliable, &[0x86])], vec![0x80, 1,2,3, 0x00,0,8,0x86])]
    #[case::two(5, vec![
        packet(ReliabilityHeader::Reliable { message_index: 4 }, &[0x86, 1]),
        packet(ReliabilityHeader::ReliableOrdered { message_index: 5, order: OrderInfo { order_index: 2, order_channel: 1 } }, &[0x87]),
    ], vec![0x80, 5,0,0, 0x40,0,16,4,0,0,0x86,1, 0x60,0,8,5,0,0,2,0,0,1,0x87])]
    fn test_ser(#[case] seq_number: u32, #[case] packets: Vec<EncapsulatedPacket>, #[case] expected: Vec<u8>) {
        let original = Datagram::new(seq_number, packets);

        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(original.total_len(), buf.len());

        let mut b: &[u8] = &buf;
        assert_eq!(Datagram::deser(&mut b).unwrap(), original);
    }

    #[test]
    fn test_deser_keeps_vestigial_flags() {
        let data = vec![0x80 | 0x08 | 0x04, 1, 0, 0];
        let deser = Datagram::deser(&mut data.as_slice()).unwrap();
        assert_eq!(deser.header_flags, DatagramFlags::CONTINUOUS_SEND | DatagramFlags::NEEDS_B_AND_AS);
        assert_eq!(deser.seq_number, 1);
        assert!(deser.packets.is_empty());
    }

    #[rstest]
    #[case::no_seq(vec![0x80, 1], CodecError::Truncated { needed: 3, remaining: 1 })]
    #[case::trailing_garbage(vec![0x80, 1,0,0, 0x00,0,8,1, 0x00], CodecError::Truncated { needed: 2, remaining: 0 })]
    #[case::zero_length_packet(vec![0x80, 1,0,0, 0x00,0,0], CodecError::ZeroLengthPayload)]
    fn test_deser_invalid(#[case] data: Vec<u8>, #[case] expected: CodecError) {
        assert_eq!(Datagram::deser(&mut data.as_slice()), Err(expected));
    }
}
