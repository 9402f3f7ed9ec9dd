use bytes::{Buf, BufMut};
use crate::protocol::binary::{CodecResult, RakBuf, RakBufMut};
use crate::safe_converter::PrecheckedCast;

/// The body of an ACK or NACK frame: a set of datagram sequence numbers, compressed into records of
///  single values and contiguous ranges.
///
/// ```ascii
/// 0: number of records (u16)
/// 2: records, each
///    * 0x00 (u8), range start (triad), range end (triad) - inclusive
///    * 0x01 (u8), sequence number (triad)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AcknowledgePacket {
    pub seq_numbers: Vec<u32>,
}

impl AcknowledgePacket {
    const RECORD_TYPE_RANGE: u8 = 0;
    const RECORD_TYPE_SINGLE: u8 = 1;

    /// the number of entries a single range record may expand to beyond its start
    pub const MAX_RANGE_EXPANSION: u32 = 512;
    /// the total number of sequence numbers decoded from one packet
    pub const MAX_ENTRIES: usize = 4096;

    pub fn new(seq_numbers: Vec<u32>) -> AcknowledgePacket {
        AcknowledgePacket { seq_numbers }
    }

    /// (start, end) pairs of consecutive sequence numbers, duplicates collapsed
    fn records(&self) -> Vec<(u32, u32)> {
        let mut sorted = self.seq_numbers.clone();
        sorted.sort_unstable();
        sorted.dedup();

        let mut result = Vec::new();
        let mut iter = sorted.into_iter();
        if let Some(first) = iter.next() {
            let mut start = first;
            let mut last = first;
            for current in iter {
                if current == last + 1 {
                    last = current;
                }
                else {
                    result.push((start, last));
                    start = current;
                    last = current;
                }
            }
            result.push((start, last));
        }
        result
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let records = self.records();
        //NB: a 24-bit sequence space cannot produce more than 2^23 disjoint records, but we do
        //     not send more than one tick's worth of sequence numbers anyway
        buf.put_u16(records.len().prechecked_cast());

        for (start, end) in records {
            if start == end {
                buf.put_u8(Self::RECORD_TYPE_SINGLE);
                buf.put_triad(start);
            }
            else {
                buf.put_u8(Self::RECORD_TYPE_RANGE);
                buf.put_triad(start);
                buf.put_triad(end);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> CodecResult<AcknowledgePacket> {
        let num_records = buf.read_u16()?;

        let mut seq_numbers = Vec::new();
        for _ in 0..num_records {
            if !buf.has_remaining() || seq_numbers.len() >= Self::MAX_ENTRIES {
                break;
            }

            if buf.read_u8()? == Self::RECORD_TYPE_RANGE {
                let start = buf.read_triad()?;
                let end = buf.read_triad()?
                    .min(start + Self::MAX_RANGE_EXPANSION);

                for seq in start..=end {
                    if seq_numbers.len() >= Self::MAX_ENTRIES {
                        break;
                    }
                    seq_numbers.push(seq);
                }
            }
            else {
                seq_numbers.push(buf.read_triad()?);
            }
        }

        Ok(AcknowledgePacket { seq_numbers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;
    use crate::protocol::binary::CodecError;

    #[rstest]
    #[case::empty(vec![], vec![0,0])]
    #[case::single(vec![5], vec![0,1, 1,5,0,0])]
    #[case::range(vec![1,2,3], vec![0,1, 0,1,0,0,3,0,0])]
    #[case::unsorted_range(vec![3,1,2], vec![0,1, 0,1,0,0,3,0,0])]
    #[case::duplicates(vec![2,2,3,3], vec![0,1, 0,2,0,0,3,0,0])]
    #[case::mixed(vec![1,3,4,5,9], vec![0,3, 1,1,0,0, 0,3,0,0,5,0,0, 1,9,0,0])]
    #[case::two_singles(vec![7,0x010000], vec![0,2, 1,7,0,0, 1,0,0,1])]
    fn test_ser(#[case] seq_numbers: Vec<u32>, #[case] expected: Vec<u8>) {
        let original = AcknowledgePacket::new(seq_numbers.clone());

        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &buf;
        let deser = AcknowledgePacket::deser(&mut b).unwrap();
        assert!(b.is_empty());

        let mut expected_seq_numbers = seq_numbers;
        expected_seq_numbers.sort();
        expected_seq_numbers.dedup();
        assert_eq!(deser.seq_numbers, expected_seq_numbers);
    }

    #[test]
    fn test_deser_caps_range() {
        let data = vec![0,1, 0, 0,0,0, 0xff,0xff,0];
        let deser = AcknowledgePacket::deser(&mut data.as_slice()).unwrap();
        assert_eq!(deser.seq_numbers.len(), AcknowledgePacket::MAX_RANGE_EXPANSION as usize + 1);
        assert_eq!(deser.seq_numbers.last(), Some(&AcknowledgePacket::MAX_RANGE_EXPANSION));
    }

    #[test]
    fn test_deser_caps_total() {
        let mut buf = BytesMut::new();
        buf.put_u16(100);
        for i in 0..100u32 {
            buf.put_u8(0);
            buf.put_triad(i * 1000);
            buf.put_triad(i * 1000 + 999);
        }

        let deser = AcknowledgePacket::deser(&mut buf.as_ref()).unwrap();
        assert_eq!(deser.seq_numbers.len(), AcknowledgePacket::MAX_ENTRIES);
    }

    #[rstest]
    #[case::reversed_range(vec![0,1, 0, 5,0,0, 3,0,0], vec![])]
    #[case::stream_ends_early(vec![0,5, 1,7,0,0], vec![7])]
    fn test_deser_lenient(#[case] data: Vec<u8>, #[case] expected: Vec<u32>) {
        let deser = AcknowledgePacket::deser(&mut data.as_slice()).unwrap();
        assert_eq!(deser.seq_numbers, expected);
    }

    #[rstest]
    #[case::no_count(vec![0], CodecError::Truncated { needed: 2, remaining: 1 })]
    #[case::partial_record(vec![0,1, 0, 1,0,0, 2], CodecError::Truncated { needed: 3, remaining: 1 })]
    fn test_deser_invalid(#[case] data: Vec<u8>, #[case] expected: CodecError) {
        assert_eq!(AcknowledgePacket::deser(&mut data.as_slice()), Err(expected));
    }
}
