use std::net::SocketAddr;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::{error, trace};
use crate::session::DisconnectReason;

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing.
///
/// Sending does not block: a packet that can not be handed to the OS right away is dropped, which
///  the reliability layers handle like any other packet loss.
#[cfg_attr(test, automock)]
pub trait PacketSink: Send + Sync + 'static {
    fn send_packet(&self, to: SocketAddr, packet_buf: &[u8]);
}

impl PacketSink for UdpSocket {
    fn send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending packet to {:?}", to);

        if let Err(e) = self.try_send_to(packet_buf, to) {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }
}

/// The observable events of sessions, i.e. everything that a session reports to the application
#[cfg_attr(test, automock)]
pub trait SessionListener: Send + Sync + 'static {
    fn on_session_open(&self, session_id: u64, addr: SocketAddr, client_guid: u64);

    /// called exactly once per opened or connecting session
    fn on_session_close(&self, session_id: u64, reason: DisconnectReason);

    fn on_message(&self, session_id: u64, payload: Bytes);

    /// all parts of a message sent with this `identifier_ack` were acknowledged by the peer
    fn on_packet_ack(&self, session_id: u64, identifier_ack: u32);

    fn on_ping_measure(&self, session_id: u64, rtt_ms: u64);
}
