use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use bytes::BytesMut;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};
use crate::config::{ReceiveLayerConfig, MAX_ORDER_CHANNELS};
use crate::packet_sink::PacketSink;
use crate::protocol::acknowledge_packet::AcknowledgePacket;
use crate::protocol::datagram::Datagram;
use crate::protocol::encapsulated_packet::{EncapsulatedPacket, OrderInfo, ReliabilityHeader};
use crate::protocol::frame::ConnectedFrame;
use crate::reliable_window::ReliableWindow;
use crate::safe_converter::SafeCast;
use crate::split_assembler::SplitAssembler;

/// The receiving half of a session's reliability: it admits datagrams into a sliding window,
///  collects ACKs and NACKs for them, and turns their encapsulated packets into a stream of
///  de-duplicated, re-assembled packets in the order their reliability class requires.
///
/// ACKs and NACKs are accumulated and sent on [ReceiveReliabilityLayer::update].
pub struct ReceiveReliabilityLayer {
    config: ReceiveLayerConfig,
    packet_sink: Arc<dyn PacketSink>,
    peer_addr: SocketAddr,

    window_start: u32,
    /// inclusive
    window_end: u32,
    highest_seq_number: Option<u32>,
    ack_queue: FxHashSet<u32>,
    nack_queue: FxHashSet<u32>,

    reliable_window: ReliableWindow,
    split_assembler: SplitAssembler,

    receive_ordered_index: [u32; MAX_ORDER_CHANNELS],
    receive_sequenced_highest_index: [u32; MAX_ORDER_CHANNELS],
    receive_ordered_packets: Vec<BTreeMap<u32, EncapsulatedPacket>>,
}

impl ReceiveReliabilityLayer {
    pub fn new(config: ReceiveLayerConfig, packet_sink: Arc<dyn PacketSink>, peer_addr: SocketAddr) -> ReceiveReliabilityLayer {
        ReceiveReliabilityLayer {
            window_start: 0,
            window_end: config.window_size,
            highest_seq_number: None,
            ack_queue: FxHashSet::default(),
            nack_queue: FxHashSet::default(),
            reliable_window: ReliableWindow::new(config.window_size),
            split_assembler: SplitAssembler::new(config.max_split_part_count, config.max_concurrent_splits),
            receive_ordered_index: [0; MAX_ORDER_CHANNELS],
            receive_sequenced_highest_index: [0; MAX_ORDER_CHANNELS],
            receive_ordered_packets: vec![BTreeMap::new(); MAX_ORDER_CHANNELS],
            config,
            packet_sink,
            peer_addr,
        }
    }

    /// Admits a datagram and returns the packets that are ready for delivery as a consequence,
    ///  in delivery order
    pub fn on_datagram(&mut self, datagram: Datagram) -> Vec<EncapsulatedPacket> {
        let seq_number = datagram.seq_number;
        if seq_number < self.window_start || seq_number > self.window_end || self.ack_queue.contains(&seq_number) {
            debug!("received duplicate or out-of-window datagram {} from {:?} (window [{}, {}])", seq_number, self.peer_addr, self.window_start, self.window_end);
            return Vec::new();
        }

        self.nack_queue.remove(&seq_number);
        self.ack_queue.insert(seq_number);
        if self.highest_seq_number.map_or(true, |highest| seq_number > highest) {
            self.highest_seq_number = Some(seq_number);
        }

        if seq_number == self.window_start {
            // slide the window through everything that arrived contiguously
            while self.ack_queue.contains(&self.window_start) {
                self.window_start += 1;
                self.window_end += 1;
            }
        }
        else {
            // gap: everything between the window start and this datagram is missing so far
            for missing in self.window_start..seq_number {
                if !self.ack_queue.contains(&missing) {
                    self.nack_queue.insert(missing);
                }
            }
        }

        trace!("admitted datagram {} from {:?} with {} packets", seq_number, self.peer_addr, datagram.packets.len());

        let mut deliverable = Vec::new();
        for packet in datagram.packets {
            self.handle_encapsulated_packet(packet, &mut deliverable);
        }
        deliverable
    }

    fn handle_encapsulated_packet(&mut self, packet: EncapsulatedPacket, deliverable: &mut Vec<EncapsulatedPacket>) {
        if let Some(message_index) = packet.header.message_index() {
            if !self.reliable_window.insert(message_index) {
                debug!("dropping duplicate reliable packet {} from {:?}", message_index, self.peer_addr);
                return;
            }
        }

        let packet = match self.split_assembler.add_part(packet) {
            Some(p) => p,
            None => return,
        };

        match packet.header {
            ReliabilityHeader::Unreliable | ReliabilityHeader::Reliable { .. } => {
                deliverable.push(packet);
            }
            ReliabilityHeader::UnreliableSequenced { sequence_index, order }
            | ReliabilityHeader::ReliableSequenced { sequence_index, order, .. } => {
                let Some(channel) = self.checked_channel(order) else { return };

                if sequence_index < self.receive_sequenced_highest_index[channel] || order.order_index < self.receive_ordered_index[channel] {
                    debug!("dropping stale sequenced packet {} (order index {}) on channel {} from {:?}", sequence_index, order.order_index, channel, self.peer_addr);
                    return;
                }
                self.receive_sequenced_highest_index[channel] = sequence_index + 1;
                deliverable.push(packet);
            }
            ReliabilityHeader::ReliableOrdered { order, .. } => {
                let Some(channel) = self.checked_channel(order) else { return };

                let expected = self.receive_ordered_index[channel];
                if order.order_index == expected {
                    // an ordered packet supersedes sequenced packets that were sent before it
                    self.receive_sequenced_highest_index[channel] = 0;
                    deliverable.push(packet);

                    let buffered = &mut self.receive_ordered_packets[channel];
                    let mut next = expected + 1;
                    while let Some(p) = buffered.remove(&next) {
                        deliverable.push(p);
                        next += 1;
                    }
                    self.receive_ordered_index[channel] = next;
                }
                else if order.order_index > expected {
                    let buffered = &mut self.receive_ordered_packets[channel];
                    if buffered.len() >= self.config.window_size.safe_cast() {
                        debug!("ordering buffer for channel {} from {:?} is full - dropping packet {}", channel, self.peer_addr, order.order_index);
                        return;
                    }
                    trace!("buffering packet {} on channel {} from {:?}, waiting for {}", order.order_index, channel, self.peer_addr, expected);
                    buffered.insert(order.order_index, packet);
                }
                else {
                    debug!("dropping duplicate ordered packet {} on channel {} from {:?}", order.order_index, channel, self.peer_addr);
                }
            }
        }
    }

    fn checked_channel(&self, order: OrderInfo) -> Option<usize> {
        let channel = order.order_channel.safe_cast();
        if channel >= MAX_ORDER_CHANNELS {
            debug!("invalid packet from {:?}: bad order channel {} - dropping", self.peer_addr, channel);
            return None;
        }
        Some(channel)
    }

    /// Skips the window past datagrams that are already due for a NACK, and sends the ACKs and
    ///  NACKs collected since the last call
    pub fn update(&mut self) {
        if let Some(highest) = self.highest_seq_number {
            let diff = (highest + 1).saturating_sub(self.window_start);
            self.window_start += diff;
            self.window_end += diff;
        }

        if !self.ack_queue.is_empty() {
            let ack = AcknowledgePacket::new(self.ack_queue.drain().collect());
            self.send_frame(ConnectedFrame::Ack(ack));
        }
        if !self.nack_queue.is_empty() {
            let nack = AcknowledgePacket::new(self.nack_queue.drain().collect());
            self.send_frame(ConnectedFrame::Nack(nack));
        }
    }

    pub fn needs_update(&self) -> bool {
        !self.ack_queue.is_empty() || !self.nack_queue.is_empty()
    }

    fn send_frame(&self, frame: ConnectedFrame) {
        trace!("sending {:?} to {:?}", frame, self.peer_addr);
        let mut buf = BytesMut::new();
        frame.ser(&mut buf);
        self.packet_sink.send_packet(self.peer_addr, &buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mockall::predicate::eq;
    use rstest::rstest;
    use crate::packet_sink::MockPacketSink;
    use crate::protocol::encapsulated_packet::SplitPacketInfo;
    use crate::test_util::{test_peer_addr, TrackingPacketSink};

    fn config() -> ReceiveLayerConfig {
        ReceiveLayerConfig {
            window_size: 8,
            max_split_part_count: 16,
            max_concurrent_splits: 2,
        }
    }

    fn layer(packet_sink: Arc<dyn PacketSink>) -> ReceiveReliabilityLayer {
        ReceiveReliabilityLayer::new(config(), packet_sink, test_peer_addr())
    }

    fn unreliable(payload: u8) -> EncapsulatedPacket {
        EncapsulatedPacket::new(ReliabilityHeader::Unreliable, Bytes::copy_from_slice(&[payload]))
    }

    fn reliable(message_index: u32, payload: u8) -> EncapsulatedPacket {
        EncapsulatedPacket::new(ReliabilityHeader::Reliable { message_index }, Bytes::copy_from_slice(&[payload]))
    }

    fn ordered(message_index: u32, order_index: u32, order_channel: u8) -> EncapsulatedPacket {
        EncapsulatedPacket::new(
            ReliabilityHeader::ReliableOrdered { message_index, order: OrderInfo { order_index, order_channel } },
            Bytes::copy_from_slice(&[order_index as u8]),
        )
    }

    fn sequenced(sequence_index: u32, order_index: u32) -> EncapsulatedPacket {
        EncapsulatedPacket::new(
            ReliabilityHeader::UnreliableSequenced { sequence_index, order: OrderInfo { order_index, order_channel: 0 } },
            Bytes::copy_from_slice(&[sequence_index as u8]),
        )
    }

    fn payloads(packets: &[EncapsulatedPacket]) -> Vec<u8> {
        packets.iter()
            .map(|p| p.buffer[0])
            .collect()
    }

    fn sorted(mut seq_numbers: Vec<u32>) -> Vec<u32> {
        seq_numbers.sort();
        seq_numbers
    }

    #[rstest]
    #[case::in_order(vec![0,1,2], vec![0,1,2], vec![0,1,2], vec![], 3)]
    #[case::gap(vec![0,2], vec![0,2], vec![0,2], vec![1], 1)]
    #[case::gap_filled(vec![0,2,1], vec![0,2,1], vec![0,1,2], vec![], 3)]
    #[case::duplicate(vec![0,0,1], vec![0,1], vec![0,1], vec![], 2)]
    #[case::duplicate_in_gap(vec![2,2], vec![2], vec![2], vec![0,1], 0)]
    #[case::beyond_window(vec![9], vec![], vec![], vec![], 0)]
    #[case::window_end_inclusive(vec![8], vec![8], vec![8], (0..8).collect(), 0)]
    fn test_on_datagram_window(
        #[case] seq_numbers: Vec<u32>,
        #[case] expected_delivered: Vec<u8>,
        #[case] expected_ack: Vec<u32>,
        #[case] expected_nack: Vec<u32>,
        #[case] expected_window_start: u32,
    ) {
        let mut layer = layer(TrackingPacketSink::new());

        let mut delivered = Vec::new();
        for seq in seq_numbers {
            delivered.extend(layer.on_datagram(Datagram::new(seq, vec![unreliable(seq as u8)])));
        }

        assert_eq!(payloads(&delivered), expected_delivered);
        assert_eq!(sorted(layer.ack_queue.iter().cloned().collect()), expected_ack);
        assert_eq!(sorted(layer.nack_queue.iter().cloned().collect()), expected_nack);
        assert_eq!(layer.window_start, expected_window_start);
        assert_eq!(layer.window_end, expected_window_start + 8);
        assert_eq!(layer.needs_update(), !expected_ack.is_empty());
    }

    #[test]
    fn test_update_sends_ack_and_nack() {
        let packet_sink = TrackingPacketSink::new();
        let mut layer = layer(packet_sink.clone());

        layer.on_datagram(Datagram::new(0, vec![unreliable(0)]));
        layer.on_datagram(Datagram::new(3, vec![unreliable(3)]));
        assert!(layer.needs_update());

        layer.update();
        assert!(!layer.needs_update());
        assert_eq!(layer.window_start, 4);
        assert_eq!(layer.window_end, 12);

        let frames = packet_sink.take_frames();
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            ConnectedFrame::Ack(ack) => assert_eq!(sorted(ack.seq_numbers.clone()), vec![0, 3]),
            other => panic!("expected ACK, was {:?}", other),
        }
        match &frames[1] {
            ConnectedFrame::Nack(nack) => assert_eq!(sorted(nack.seq_numbers.clone()), vec![1, 2]),
            other => panic!("expected NACK, was {:?}", other),
        }

        // skipped datagrams are not admitted any more
        assert!(layer.on_datagram(Datagram::new(1, vec![unreliable(1)])).is_empty());
        assert!(!layer.needs_update());

        layer.update();
        packet_sink.assert_no_remaining_packets();
    }

    #[test]
    fn test_update_without_traffic_sends_nothing() {
        let mut packet_sink = MockPacketSink::new();
        packet_sink.expect_send_packet().never();

        let mut layer = layer(Arc::new(packet_sink));
        layer.update();
        assert_eq!(layer.window_start, 0);
    }

    #[test]
    fn test_update_sends_single_ack() {
        let mut packet_sink = MockPacketSink::new();
        packet_sink.expect_send_packet()
            .once()
            .with(eq(test_peer_addr()), eq(vec![0xc0, 0,1, 1,0,0,0]))
            .return_const(());

        let mut layer = layer(Arc::new(packet_sink));
        layer.on_datagram(Datagram::new(0, vec![]));
        layer.update();
    }

    #[rstest]
    #[case::in_order(vec![0,1,2,3])]
    #[case::reversed(vec![3,2,1,0])]
    #[case::interleaved(vec![1,0,3,2])]
    #[case::last_first(vec![3,0,1,2])]
    fn test_ordered_delivery(#[case] arrival_order: Vec<u32>) {
        let mut layer = layer(TrackingPacketSink::new());

        let mut delivered = Vec::new();
        for (seq, order_index) in arrival_order.into_iter().enumerate() {
            delivered.extend(layer.on_datagram(Datagram::new(seq as u32, vec![ordered(order_index, order_index, 3)])));
        }

        assert_eq!(payloads(&delivered), vec![0, 1, 2, 3]);
        assert_eq!(layer.receive_ordered_index[3], 4);
        assert!(layer.receive_ordered_packets[3].is_empty());
    }

    #[test]
    fn test_ordered_channels_are_independent() {
        let mut layer = layer(TrackingPacketSink::new());

        let delivered = layer.on_datagram(Datagram::new(0, vec![
            ordered(0, 1, 0),
            ordered(1, 0, 1),
            ordered(2, 0, 0),
        ]));

        assert_eq!(payloads(&delivered), vec![0, 0, 1]);
        assert_eq!(layer.receive_ordered_index[0], 2);
        assert_eq!(layer.receive_ordered_index[1], 1);
    }

    #[test]
    fn test_ordered_duplicate_order_index() {
        let mut layer = layer(TrackingPacketSink::new());

        let delivered = layer.on_datagram(Datagram::new(0, vec![
            ordered(0, 0, 0),
            // same order index, different message index: not caught by reliable de-dup
            ordered(1, 0, 0),
        ]));
        assert_eq!(payloads(&delivered), vec![0]);
    }

    #[rstest]
    #[case::stale_dropped(vec![(0,1), (2,1), (1,1)], vec![0, 2])]
    #[case::in_order(vec![(0,1), (1,1), (2,1)], vec![0, 1, 2])]
    #[case::gaps_are_not_waited_for(vec![(3,1), (5,1)], vec![3, 5])]
    #[case::stale_order_index(vec![(0,0), (1,1)], vec![1])]
    #[case::future_order_index(vec![(0,5)], vec![0])]
    fn test_sequenced_delivery(#[case] packets: Vec<(u32, u32)>, #[case] expected: Vec<u8>) {
        let mut layer = layer(TrackingPacketSink::new());
        // advance the order cursor of channel 0 to 1
        layer.on_datagram(Datagram::new(0, vec![ordered(0, 0, 0)]));

        let mut delivered = Vec::new();
        for (i, (sequence_index, order_index)) in packets.into_iter().enumerate() {
            delivered.extend(layer.on_datagram(Datagram::new(i as u32 + 1, vec![sequenced(sequence_index, order_index)])));
        }
        assert_eq!(payloads(&delivered), expected);
    }

    #[test]
    fn test_ordered_packet_resets_sequenced_highest() {
        let mut layer = layer(TrackingPacketSink::new());

        assert_eq!(payloads(&layer.on_datagram(Datagram::new(0, vec![sequenced(5, 0)]))), vec![5]);
        assert_eq!(layer.receive_sequenced_highest_index[0], 6);

        layer.on_datagram(Datagram::new(1, vec![ordered(0, 0, 0)]));
        assert_eq!(layer.receive_sequenced_highest_index[0], 0);

        // an old sequence index is accepted again, but only with the new order index
        assert!(layer.on_datagram(Datagram::new(2, vec![sequenced(1, 0)])).is_empty());
        assert_eq!(payloads(&layer.on_datagram(Datagram::new(3, vec![sequenced(1, 1)]))), vec![1]);
    }

    #[rstest]
    #[case::unreliable_sequenced(ReliabilityHeader::UnreliableSequenced { sequence_index: 0, order: OrderInfo { order_index: 0, order_channel: 32 } })]
    #[case::reliable_ordered(ReliabilityHeader::ReliableOrdered { message_index: 0, order: OrderInfo { order_index: 0, order_channel: 200 } })]
    fn test_bad_order_channel(#[case] header: ReliabilityHeader) {
        let mut layer = layer(TrackingPacketSink::new());

        let delivered = layer.on_datagram(Datagram::new(0, vec![
            EncapsulatedPacket::new(header, Bytes::from_static(&[1])),
            unreliable(2),
        ]));

        // the datagram is still acknowledged and the rest of it is processed
        assert_eq!(payloads(&delivered), vec![2]);
        assert!(layer.ack_queue.contains(&0));
    }

    #[test]
    fn test_reliable_dedup() {
        let mut layer = layer(TrackingPacketSink::new());

        // the same reliable packet, resent in a new datagram
        let first = layer.on_datagram(Datagram::new(0, vec![reliable(0, 7)]));
        let second = layer.on_datagram(Datagram::new(1, vec![reliable(0, 7)]));

        assert_eq!(payloads(&first), vec![7]);
        assert!(second.is_empty());
    }

    #[rstest]
    #[case::in_order(vec![0,1,2])]
    #[case::reversed(vec![2,1,0])]
    #[case::middle_first(vec![1,0,2])]
    fn test_split_reassembly(#[case] arrival_order: Vec<u32>) {
        let mut layer = layer(TrackingPacketSink::new());

        let mut delivered = Vec::new();
        for (seq, part_index) in arrival_order.iter().enumerate() {
            let part = EncapsulatedPacket {
                header: ReliabilityHeader::ReliableOrdered {
                    message_index: *part_index,
                    order: OrderInfo { order_index: 0, order_channel: 0 },
                },
                split: Some(SplitPacketInfo { split_id: 1, part_index: *part_index, total_part_count: 3 }),
                buffer: Bytes::copy_from_slice(&[10 + *part_index as u8, 20 + *part_index as u8]),
                identifier_ack: None,
            };
            delivered.extend(layer.on_datagram(Datagram::new(seq as u32, vec![part])));
        }

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].buffer.as_ref(), &[10, 20, 11, 21, 12, 22]);
        assert_eq!(layer.receive_ordered_index[0], 1);

        // a duplicate fragment after completion is caught by reliable de-dup
        let duplicate = EncapsulatedPacket {
            header: ReliabilityHeader::ReliableOrdered {
                message_index: 1,
                order: OrderInfo { order_index: 0, order_channel: 0 },
            },
            split: Some(SplitPacketInfo { split_id: 1, part_index: 1, total_part_count: 3 }),
            buffer: Bytes::from_static(&[11, 21]),
            identifier_ack: None,
        };
        assert!(layer.on_datagram(Datagram::new(3, vec![duplicate])).is_empty());
        assert_eq!(layer.split_assembler.num_in_flight(), 0);
    }

    #[test]
    fn test_ordering_buffer_is_bounded() {
        let mut layer = layer(TrackingPacketSink::new());

        // window size is 8, so at most 8 packets are buffered waiting for order index 0
        let packets = (1..=9)
            .map(|i| ordered(i - 1, i, 0))
            .collect::<Vec<_>>();
        assert!(layer.on_datagram(Datagram::new(0, packets)).is_empty());
        assert_eq!(layer.receive_ordered_packets[0].len(), 8);

        let delivered = layer.on_datagram(Datagram::new(1, vec![ordered(9, 0, 0)]));
        assert_eq!(payloads(&delivered), (0..=8).collect::<Vec<u8>>());
        assert_eq!(layer.receive_ordered_index[0], 9);
    }
}
