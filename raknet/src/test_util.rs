//! Recording implementations of the outbound traits, for tests that look at what was actually
//!  sent rather than setting up expectations up front.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use bytes::Bytes;
use crate::end_point::ServerEvent;
use crate::packet_sink::{PacketSink, SessionListener};
use crate::protocol::connected_messages::ConnectedMessage;
use crate::protocol::datagram::Datagram;
use crate::protocol::frame::ConnectedFrame;
use crate::session::DisconnectReason;

pub fn test_peer_addr() -> SocketAddr {
    SocketAddr::from(([1, 2, 3, 4], 9))
}

#[derive(Default)]
pub struct TrackingPacketSink {
    tracker: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

impl TrackingPacketSink {
    pub fn new() -> Arc<TrackingPacketSink> {
        Arc::new(TrackingPacketSink::default())
    }

    pub fn take_raw(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut *self.tracker.lock().unwrap())
    }

    /// all packets sent so far, decoded as connected frames
    pub fn take_frames(&self) -> Vec<ConnectedFrame> {
        self.take_raw()
            .into_iter()
            .map(|(_, buf)| ConnectedFrame::deser(&mut buf.as_slice()).unwrap())
            .collect()
    }

    pub fn take_datagrams(&self) -> Vec<Datagram> {
        self.take_frames()
            .into_iter()
            .filter_map(|f| match f {
                ConnectedFrame::Datagram(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// the connected messages inside all datagrams sent so far
    pub fn take_connected_messages(&self) -> Vec<ConnectedMessage> {
        self.take_datagrams()
            .into_iter()
            .flat_map(|d| d.packets)
            .map(|p| ConnectedMessage::deser(&mut p.buffer.as_ref(), 20).unwrap())
            .collect()
    }

    pub fn assert_no_remaining_packets(&self) {
        let remaining = self.take_raw();
        assert!(remaining.is_empty(), "unexpected packets: {:?}", remaining);
    }
}

impl PacketSink for TrackingPacketSink {
    fn send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        self.tracker.lock().unwrap()
            .push((to, packet_buf.to_vec()));
    }
}

#[derive(Default)]
pub struct TrackingSessionListener {
    tracker: Mutex<Vec<ServerEvent>>,
}

impl TrackingSessionListener {
    pub fn new() -> Arc<TrackingSessionListener> {
        Arc::new(TrackingSessionListener::default())
    }

    pub fn take_events(&self) -> Vec<ServerEvent> {
        std::mem::take(&mut *self.tracker.lock().unwrap())
    }

    pub fn assert_events(&self, expected: Vec<ServerEvent>) {
        assert_eq!(self.take_events(), expected);
    }
}

impl SessionListener for TrackingSessionListener {
    fn on_session_open(&self, session_id: u64, addr: SocketAddr, client_guid: u64) {
        self.tracker.lock().unwrap()
            .push(ServerEvent::SessionOpened { session_id, addr, client_guid });
    }

    fn on_session_close(&self, session_id: u64, reason: DisconnectReason) {
        self.tracker.lock().unwrap()
            .push(ServerEvent::SessionClosed { session_id, reason });
    }

    fn on_message(&self, session_id: u64, payload: Bytes) {
        self.tracker.lock().unwrap()
            .push(ServerEvent::Message { session_id, payload });
    }

    fn on_packet_ack(&self, session_id: u64, identifier_ack: u32) {
        self.tracker.lock().unwrap()
            .push(ServerEvent::PacketAck { session_id, identifier_ack });
    }

    fn on_ping_measure(&self, session_id: u64, rtt_ms: u64) {
        self.tracker.lock().unwrap()
            .push(ServerEvent::PingMeasured { session_id, rtt_ms });
    }
}
