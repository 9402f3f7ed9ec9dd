use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use anyhow::bail;
use bytes::{Bytes, BytesMut};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};
use crate::config::{SendLayerConfig, MAX_ORDER_CHANNELS};
use crate::packet_sink::PacketSink;
use crate::protocol::acknowledge_packet::AcknowledgePacket;
use crate::protocol::datagram::Datagram;
use crate::protocol::encapsulated_packet::{EncapsulatedPacket, OrderInfo, ReliabilityHeader, SplitPacketInfo};
use crate::protocol::reliability::PacketReliability;
use crate::safe_converter::{PrecheckedCast, SafeCast};

/// A message as the application hands it to a session, before any reliability metadata is assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub reliability: PacketReliability,
    /// ignored unless the reliability is sequenced or ordered
    pub order_channel: u8,
    pub buffer: Bytes,
    /// If set, the session reports this identifier once the peer acknowledged every part of the
    ///  message. Only reliable messages are ever acknowledged.
    pub identifier_ack: Option<u32>,
}

impl OutboundMessage {
    pub fn new(reliability: PacketReliability, order_channel: u8, buffer: Bytes) -> OutboundMessage {
        OutboundMessage {
            reliability,
            order_channel,
            buffer,
            identifier_ack: None,
        }
    }
}

struct ReliableCacheEntry {
    packets: Vec<EncapsulatedPacket>,
    timestamp: Instant,
}

/// The sending half of a session's reliability: it assigns message, order and sequence indices,
///  splits messages that do not fit into a datagram, batches packets into datagrams, and keeps
///  reliable packets until the peer acknowledges the datagram that carried them.
///
/// Retransmission never re-uses a sequence number: resent packets go into new datagrams.
pub struct SendReliabilityLayer {
    config: SendLayerConfig,
    packet_sink: Arc<dyn PacketSink>,
    peer_addr: SocketAddr,

    /// the packets of the datagram that is currently being built
    send_queue: Vec<EncapsulatedPacket>,
    send_queue_len: usize,

    send_seq_number: u32,
    message_index: u32,
    send_ordered_index: [u32; MAX_ORDER_CHANNELS],
    send_sequenced_index: [u32; MAX_ORDER_CHANNELS],
    split_id: u16,

    resend_queue: VecDeque<EncapsulatedPacket>,
    reliable_cache: BTreeMap<u32, ReliableCacheEntry>,
    /// identifier_ack -> message indices not acknowledged yet
    need_ack: FxHashMap<u32, FxHashSet<u32>>,
}

impl SendReliabilityLayer {
    pub fn new(config: SendLayerConfig, packet_sink: Arc<dyn PacketSink>, peer_addr: SocketAddr) -> SendReliabilityLayer {
        SendReliabilityLayer {
            config,
            packet_sink,
            peer_addr,
            send_queue: Vec::new(),
            send_queue_len: Datagram::HEADER_LEN,
            send_seq_number: 0,
            message_index: 0,
            send_ordered_index: [0; MAX_ORDER_CHANNELS],
            send_sequenced_index: [0; MAX_ORDER_CHANNELS],
            split_id: 0,
            resend_queue: VecDeque::new(),
            reliable_cache: BTreeMap::new(),
            need_ack: FxHashMap::default(),
        }
    }

    fn next_message_index(&mut self, reliability: PacketReliability) -> Option<u32> {
        if !reliability.is_reliable() {
            return None;
        }
        let result = self.message_index;
        self.message_index += 1;
        Some(result)
    }

    /// Queues a message for sending, splitting it if necessary. With `immediate`, the datagram
    ///  containing it is sent right away rather than on the next [SendReliabilityLayer::update].
    ///
    /// This fails only for messages that can not be encoded: empty messages and order channels
    ///  outside `0..32`.
    pub fn add_encapsulated_to_queue(&mut self, message: OutboundMessage, immediate: bool, now: Instant) -> anyhow::Result<()> {
        let reliability = message.reliability;

        if message.buffer.is_empty() {
            bail!("empty messages can not be sent");
        }

        let (order, sequence_index) = if reliability.is_sequenced_or_ordered() {
            let channel = message.order_channel.safe_cast();
            if channel >= MAX_ORDER_CHANNELS {
                bail!("invalid order channel {}", message.order_channel);
            }

            if reliability.is_ordered() {
                let order_index = self.send_ordered_index[channel];
                self.send_ordered_index[channel] += 1;
                (Some(OrderInfo { order_index, order_channel: message.order_channel }), None)
            }
            else {
                // sequenced packets ride on the current order index without incrementing it
                let order_index = self.send_ordered_index[channel];
                let sequence_index = self.send_sequenced_index[channel];
                self.send_sequenced_index[channel] += 1;
                (Some(OrderInfo { order_index, order_channel: message.order_channel }), Some(sequence_index))
            }
        }
        else {
            (None, None)
        };

        let max_chunk_len = self.config.max_split_chunk_len();
        if message.buffer.len() > max_chunk_len {
            self.split_id = self.split_id.wrapping_add(1);
            let split_id = self.split_id;

            let total_part_count = message.buffer.len().div_ceil(max_chunk_len);
            trace!("splitting message of {} bytes for {:?} into {} parts with split id {}", message.buffer.len(), self.peer_addr, total_part_count, split_id);

            for part_index in 0..total_part_count {
                let start = part_index * max_chunk_len;
                let end = message.buffer.len().min(start + max_chunk_len);

                let message_index = self.next_message_index(reliability);
                let packet = EncapsulatedPacket {
                    header: ReliabilityHeader::for_reliability(reliability, message_index, sequence_index, order),
                    split: Some(SplitPacketInfo {
                        split_id,
                        part_index: part_index.prechecked_cast(),
                        total_part_count: total_part_count.prechecked_cast(),
                    }),
                    buffer: message.buffer.slice(start..end),
                    identifier_ack: message.identifier_ack,
                };
                // parts of a split message go out without delay
                self.add_to_queue(packet, true, now);
            }
        }
        else {
            let message_index = self.next_message_index(reliability);
            let packet = EncapsulatedPacket {
                header: ReliabilityHeader::for_reliability(reliability, message_index, sequence_index, order),
                split: None,
                buffer: message.buffer,
                identifier_ack: message.identifier_ack,
            };
            self.add_to_queue(packet, immediate, now);
        }

        Ok(())
    }

    fn add_to_queue(&mut self, packet: EncapsulatedPacket, immediate: bool, now: Instant) {
        if let (Some(identifier_ack), Some(message_index)) = (packet.identifier_ack, packet.header.message_index()) {
            self.need_ack.entry(identifier_ack)
                .or_default()
                .insert(message_index);
        }

        if self.send_queue_len + packet.total_len() > self.config.max_datagram_payload_len() {
            self.send_queue(now);
        }

        self.send_queue_len += packet.total_len();
        self.send_queue.push(packet);

        if immediate {
            self.send_queue(now);
        }
    }

    /// sends the datagram that is currently being built, if any
    pub fn send_queue(&mut self, now: Instant) {
        if self.send_queue.is_empty() {
            return;
        }

        let packets = std::mem::take(&mut self.send_queue);
        self.send_queue_len = Datagram::HEADER_LEN;
        self.send_datagram(packets, now);
    }

    fn send_datagram(&mut self, packets: Vec<EncapsulatedPacket>, now: Instant) {
        let datagram = Datagram::new(self.send_seq_number, packets);
        self.send_seq_number += 1;

        trace!("sending datagram {} with {} packets to {:?}", datagram.seq_number, datagram.packets.len(), self.peer_addr);

        let mut buf = BytesMut::with_capacity(datagram.total_len());
        datagram.ser(&mut buf);
        self.packet_sink.send_packet(self.peer_addr, &buf);

        let resendable = datagram.packets.into_iter()
            .filter(|p| p.header.message_index().is_some())
            .collect::<Vec<_>>();
        if !resendable.is_empty() {
            self.reliable_cache.insert(datagram.seq_number, ReliableCacheEntry {
                packets: resendable,
                timestamp: now,
            });
        }
    }

    /// Releases the acknowledged datagrams, returning the identifiers of messages that were
    ///  completely acknowledged by this
    pub fn on_ack(&mut self, ack: &AcknowledgePacket) -> Vec<u32> {
        let mut completed = Vec::new();

        for seq_number in &ack.seq_numbers {
            let Some(entry) = self.reliable_cache.remove(seq_number) else { continue };

            for packet in entry.packets {
                let (Some(identifier_ack), Some(message_index)) = (packet.identifier_ack, packet.header.message_index()) else { continue };

                if let Some(outstanding) = self.need_ack.get_mut(&identifier_ack) {
                    outstanding.remove(&message_index);
                    if outstanding.is_empty() {
                        self.need_ack.remove(&identifier_ack);
                        completed.push(identifier_ack);
                    }
                }
            }
        }

        completed
    }

    /// moves the packets of NACKed datagrams to the resend queue
    pub fn on_nack(&mut self, nack: &AcknowledgePacket) {
        for seq_number in &nack.seq_numbers {
            if let Some(entry) = self.reliable_cache.remove(seq_number) {
                trace!("datagram {} to {:?} was NACKed, resending {} packets", seq_number, self.peer_addr, entry.packets.len());
                self.resend_queue.extend(entry.packets);
            }
        }
    }

    pub fn update(&mut self, now: Instant) {
        if !self.resend_queue.is_empty() {
            for _ in 0..self.config.resend_budget_per_tick {
                let Some(packet) = self.resend_queue.pop_front() else { break };
                self.add_to_queue(packet, false, now);
            }

            if self.resend_queue.len() > self.config.window_size.safe_cast() {
                debug!("resend backlog for {:?} exceeds the window size - dropping {} packets", self.peer_addr, self.resend_queue.len());
                self.resend_queue.clear();
            }
        }

        // the cache is ordered by sequence number, and therefore by send time
        while let Some(entry) = self.reliable_cache.first_entry() {
            if now.saturating_duration_since(entry.get().timestamp) <= self.config.resend_timeout {
                break;
            }
            let (seq_number, entry) = entry.remove_entry();
            debug!("datagram {} to {:?} was not acknowledged in time, resending {} packets", seq_number, self.peer_addr, entry.packets.len());
            self.resend_queue.extend(entry.packets);
        }

        self.send_queue(now);
    }

    pub fn needs_update(&self) -> bool {
        !self.send_queue.is_empty() || !self.resend_queue.is_empty() || !self.reliable_cache.is_empty()
    }
}
