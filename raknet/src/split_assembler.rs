use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};
use crate::protocol::encapsulated_packet::EncapsulatedPacket;
use crate::safe_converter::SafeCast;

struct SplitAssembly {
    total_part_count: u32,
    parts: Vec<Option<Bytes>>,
    num_received: u32,
}

/// Re-assembles split packets. Both the number of parts per message and the number of messages
///  being assembled at the same time are limited, so a peer can not make us buffer arbitrary
///  amounts of data.
pub struct SplitAssembler {
    max_part_count: u32,
    max_concurrent_splits: usize,
    assemblies: FxHashMap<u16, SplitAssembly>,
}

impl SplitAssembler {
    pub fn new(max_part_count: u32, max_concurrent_splits: usize) -> SplitAssembler {
        SplitAssembler {
            max_part_count,
            max_concurrent_splits,
            assemblies: FxHashMap::default(),
        }
    }

    pub fn num_in_flight(&self) -> usize {
        self.assemblies.len()
    }

    /// Adds a part, returning the re-assembled packet when it was the last missing part. The
    ///  re-assembled packet has the reliability header of the part that completed it.
    ///
    /// Packets without split info are returned unchanged.
    pub fn add_part(&mut self, packet: EncapsulatedPacket) -> Option<EncapsulatedPacket> {
        let split = match packet.split {
            Some(split) => split,
            None => return Some(packet),
        };

        if split.total_part_count >= self.max_part_count || split.part_index >= split.total_part_count {
            debug!("invalid split packet part: index {} of {}, limit is {} - dropping", split.part_index, split.total_part_count, self.max_part_count);
            return None;
        }

        if let Some(existing) = self.assemblies.get(&split.split_id) {
            if existing.total_part_count != split.total_part_count {
                debug!("split packet {}: part count {} does not match previous part count {} - dropping", split.split_id, split.total_part_count, existing.total_part_count);
                return None;
            }
        }
        else if self.assemblies.len() >= self.max_concurrent_splits {
            debug!("split packet {}: reached the limit of {} concurrent split packets - dropping", split.split_id, self.max_concurrent_splits);
            return None;
        }

        let assembly = self.assemblies.entry(split.split_id)
            .or_insert_with(|| SplitAssembly {
                total_part_count: split.total_part_count,
                parts: vec![None; split.total_part_count.safe_cast()],
                num_received: 0,
            });

        let slot = &mut assembly.parts[split.part_index.safe_cast()];
        if slot.is_none() {
            assembly.num_received += 1;
        }
        *slot = Some(packet.buffer);

        if assembly.num_received < assembly.total_part_count {
            trace!("split packet {}: received part {} of {}", split.split_id, split.part_index, split.total_part_count);
            return None;
        }

        let assembly = self.assemblies.remove(&split.split_id)?;
        let mut buffer = BytesMut::new();
        for part in assembly.parts.into_iter().flatten() {
            buffer.extend_from_slice(&part);
        }
        trace!("split packet {}: re-assembled {} parts to {} bytes", split.split_id, split.total_part_count, buffer.len());

        Some(EncapsulatedPacket {
            header: packet.header,
            split: None,
            buffer: buffer.freeze(),
            identifier_ack: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::protocol::encapsulated_packet::{OrderInfo, ReliabilityHeader, SplitPacketInfo};

    fn part(split_id: u16, part_index: u32, total_part_count: u32, payload: &[u8]) -> EncapsulatedPacket {
        EncapsulatedPacket {
            header: ReliabilityHeader::ReliableOrdered {
                message_index: part_index,
                order: OrderInfo { order_index: 3, order_channel: 1 },
            },
            split: Some(SplitPacketInfo { split_id, part_index, total_part_count }),
            buffer: Bytes::copy_from_slice(payload),
            identifier_ack: None,
        }
    }

    #[rstest]
    #[case::in_order(vec![0,1,2])]
    #[case::reversed(vec![2,1,0])]
    #[case::mixed(vec![1,2,0])]
    #[case::duplicate_before_completion(vec![1,1,0,2])]
    fn test_reassembly(#[case] arrival_order: Vec<u32>) {
        let mut assembler = SplitAssembler::new(128, 4);
        let payloads: [&[u8]; 3] = [&[1, 2], &[3, 4], &[5]];

        let mut results = Vec::new();
        for index in arrival_order {
            if let Some(p) = assembler.add_part(part(7, index, 3, payloads[index as usize])) {
                results.push(p);
            }
        }

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].buffer.as_ref(), &[1, 2, 3, 4, 5]);
        assert_eq!(results[0].split, None);
        assert_eq!(results[0].header.order(), Some(OrderInfo { order_index: 3, order_channel: 1 }));
        assert_eq!(assembler.num_in_flight(), 0);
    }

    #[test]
    fn test_part_after_completion_starts_new_assembly() {
        let mut assembler = SplitAssembler::new(128, 4);
        assert!(assembler.add_part(part(7, 0, 2, &[1])).is_none());
        assert!(assembler.add_part(part(7, 1, 2, &[2])).is_some());

        assert!(assembler.add_part(part(7, 1, 2, &[2])).is_none());
        assert_eq!(assembler.num_in_flight(), 1);
    }

    #[test]
    fn test_unsplit_passes_through() {
        let mut assembler = SplitAssembler::new(128, 4);
        let packet = EncapsulatedPacket::new(ReliabilityHeader::Unreliable, Bytes::from_static(&[9]));
        assert_eq!(assembler.add_part(packet.clone()), Some(packet));
    }

    #[rstest]
    #[case::too_many_parts(0, 128)]
    #[case::index_beyond_count(3, 3)]
    #[case::index_at_limit(200, 10)]
    fn test_invalid_part(#[case] part_index: u32, #[case] total_part_count: u32) {
        let mut assembler = SplitAssembler::new(128, 4);
        assert!(assembler.add_part(part(1, part_index, total_part_count, &[1])).is_none());
        assert_eq!(assembler.num_in_flight(), 0);
    }

    #[test]
    fn test_part_count_mismatch() {
        let mut assembler = SplitAssembler::new(128, 4);
        assert!(assembler.add_part(part(1, 0, 2, &[1])).is_none());
        assert!(assembler.add_part(part(1, 1, 3, &[2])).is_none());

        // the inconsistent part was not stored
        assert!(assembler.add_part(part(1, 1, 2, &[2])).is_some());
    }

    #[test]
    fn test_concurrent_limit() {
        let mut assembler = SplitAssembler::new(128, 2);
        assert!(assembler.add_part(part(1, 0, 2, &[1])).is_none());
        assert!(assembler.add_part(part(2, 0, 2, &[1])).is_none());
        assert!(assembler.add_part(part(3, 0, 2, &[1])).is_none());
        assert_eq!(assembler.num_in_flight(), 2);

        // completing one assembly makes room for another
        assert!(assembler.add_part(part(3, 1, 2, &[2])).is_none());
        assert!(assembler.add_part(part(1, 1, 2, &[2])).is_some());
        assert!(assembler.add_part(part(3, 0, 2, &[1])).is_none());
        assert!(assembler.add_part(part(3, 1, 2, &[2])).is_some());
    }
}
