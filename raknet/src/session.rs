use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use anyhow::bail;
use tracing::{debug, error, info, trace};
use crate::clock::RakNetClock;
use crate::config::{RakNetConfig, MAX_MTU_SIZE};
use crate::packet_sink::{PacketSink, SessionListener};
use crate::protocol::address::UNSPECIFIED_ADDRESS;
use crate::protocol::binary::CodecResult;
use crate::protocol::connected_messages::{ConnectedMessage, ConnectedPing, ConnectedPong, ConnectionRequestAccepted};
use crate::protocol::encapsulated_packet::EncapsulatedPacket;
use crate::protocol::frame::ConnectedFrame;
use crate::protocol::message_identifiers::MessageId;
use crate::protocol::reliability::PacketReliability;
use crate::receive_reliability_layer::ReceiveReliabilityLayer;
use crate::send_reliability_layer::{OutboundMessage, SendReliabilityLayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// the offline handshake is done, the connected handshake is in progress
    Connecting,
    Connected,
    /// a graceful disconnect was requested, pending traffic is flushed before the peer is notified
    Disconnecting,
    Disconnected,
}

/// Why a session was closed. This is reported to the application only, it never goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientDisconnect,
    ServerDisconnect,
    PeerTimeout,
    ClientReconnect,
    ServerShutdown,
}

impl DisconnectReason {
    pub fn description(&self) -> &'static str {
        match self {
            DisconnectReason::ClientDisconnect => "client disconnect",
            DisconnectReason::ServerDisconnect => "server disconnect",
            DisconnectReason::PeerTimeout => "timeout",
            DisconnectReason::ClientReconnect => "new session established on same address and port",
            DisconnectReason::ServerShutdown => "server shutdown",
        }
    }
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Everything a session shares with the other sessions of the same host
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<RakNetConfig>,
    pub clock: RakNetClock,
    /// the port the host is bound to, checked against the port the client claims to connect to
    pub local_port: u16,
    pub packet_sink: Arc<dyn PacketSink>,
    pub listener: Arc<dyn SessionListener>,
}

/// A connection to a single peer, from the end of the offline handshake until it is closed.
///
/// A session is driven from the outside: the host passes every frame received from the peer to
///  [Session::handle_packet] and calls [Session::update] on every tick. A session never times out
///  on its own if it is not ticked.
pub struct Session {
    context: SessionContext,
    session_id: u64,
    peer_addr: SocketAddr,
    client_guid: u64,
    mtu_size: u16,

    state: SessionState,
    /// set when a frame was received since the previous tick
    is_active: bool,
    last_update: Instant,
    last_ping: Option<Instant>,
    last_rtt_ms: Option<u64>,
    disconnect_deadline: Option<Instant>,
    is_disconnect_notified: bool,

    recv_layer: ReceiveReliabilityLayer,
    send_layer: SendReliabilityLayer,
}

impl Session {
    pub fn new(context: SessionContext, session_id: u64, peer_addr: SocketAddr, client_guid: u64, mtu_size: u16, now: Instant) -> anyhow::Result<Session> {
        if mtu_size < context.config.min_mtu_size {
            bail!("MTU size must be at least {}, got {}", context.config.min_mtu_size, mtu_size);
        }
        if mtu_size > MAX_MTU_SIZE {
            bail!("MTU size must be at most {}, got {}", MAX_MTU_SIZE, mtu_size);
        }

        let recv_layer = ReceiveReliabilityLayer::new(context.config.receive_layer_config(), context.packet_sink.clone(), peer_addr);
        let send_layer = SendReliabilityLayer::new(context.config.send_layer_config(mtu_size), context.packet_sink.clone(), peer_addr);

        Ok(Session {
            context,
            session_id,
            peer_addr,
            client_guid,
            mtu_size,
            state: SessionState::Connecting,
            is_active: false,
            last_update: now,
            last_ping: None,
            last_rtt_ms: None,
            disconnect_deadline: None,
            is_disconnect_notified: false,
            recv_layer,
            send_layer,
        })
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn client_guid(&self) -> u64 {
        self.client_guid
    }

    pub fn mtu_size(&self) -> u16 {
        self.mtu_size
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// the round trip time measured by the most recent valid pong
    pub fn last_rtt_ms(&self) -> Option<u64> {
        self.last_rtt_ms
    }

    /// `true` until the application was notified that the session is closing
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connecting | SessionState::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == SessionState::Disconnected
    }

    /// Handles a frame received from the peer. A frame that can not be decoded is dropped as a
    ///  whole, and the error is returned so the host can penalize the sender.
    pub fn handle_packet(&mut self, packet_buf: &[u8], now: Instant) -> CodecResult<()> {
        let frame = ConnectedFrame::deser(&mut &packet_buf[..])?;

        self.is_active = true;
        self.last_update = now;

        match frame {
            ConnectedFrame::Datagram(datagram) => {
                for packet in self.recv_layer.on_datagram(datagram) {
                    self.handle_encapsulated_packet(packet, now);
                }
            }
            ConnectedFrame::Ack(ack) => {
                for identifier_ack in self.send_layer.on_ack(&ack) {
                    self.context.listener.on_packet_ack(self.session_id, identifier_ack);
                }
            }
            ConnectedFrame::Nack(nack) => {
                self.send_layer.on_nack(&nack);
            }
        }
        Ok(())
    }

    fn handle_encapsulated_packet(&mut self, packet: EncapsulatedPacket, now: Instant) {
        let Some(&raw_id) = packet.buffer.first() else { return };

        if MessageId::is_user_packet(raw_id) {
            if self.state == SessionState::Connected {
                self.context.listener.on_message(self.session_id, packet.buffer);
            }
            else {
                trace!("user packet from {:?} in state {:?} - dropping", self.peer_addr, self.state);
            }
            return;
        }

        let message = match ConnectedMessage::deser(&mut packet.buffer.as_ref(), self.context.config.system_address_count) {
            Ok(message) => message,
            Err(e) => {
                debug!("invalid internal packet 0x{:02x} from {:?}: {} - dropping", raw_id, self.peer_addr, e);
                return;
            }
        };
        trace!("received {:?} from {:?}", message.id(), self.peer_addr);

        match (self.state, message) {
            (SessionState::Connecting, ConnectedMessage::ConnectionRequest(request)) => {
                let accepted = ConnectedMessage::ConnectionRequestAccepted(ConnectionRequestAccepted {
                    address: self.peer_addr,
                    system_index: 0,
                    system_addresses: vec![UNSPECIFIED_ADDRESS; self.context.config.system_address_count],
                    send_ping_time: request.send_ping_time,
                    send_pong_time: self.context.clock.millis(now),
                });
                self.queue_connected_message(accepted, PacketReliability::Unreliable, true, now);
            }
            (SessionState::Connecting, ConnectedMessage::NewIncomingConnection(nic)) => {
                if nic.address.port() == self.context.local_port || !self.context.config.port_checking {
                    self.state = SessionState::Connected;
                    info!("session {} with {:?} is connected", self.session_id, self.peer_addr);
                    self.context.listener.on_session_open(self.session_id, self.peer_addr, self.client_guid);
                    self.send_ping(now);
                }
                else {
                    debug!("{:?} connected to port {}, but the server is bound to port {} - ignoring", self.peer_addr, nic.address.port(), self.context.local_port);
                }
            }
            (SessionState::Connecting, other) => {
                debug!("unexpected {:?} from {:?} during the connected handshake - dropping", other.id(), self.peer_addr);
            }
            (_, ConnectedMessage::DisconnectionNotification) => {
                self.handle_remote_disconnect();
            }
            (_, ConnectedMessage::ConnectedPing(ping)) => {
                let pong = ConnectedMessage::ConnectedPong(ConnectedPong {
                    send_ping_time: ping.send_ping_time,
                    send_pong_time: self.context.clock.millis(now),
                });
                self.queue_connected_message(pong, PacketReliability::Unreliable, false, now);
            }
            (_, ConnectedMessage::ConnectedPong(pong)) => {
                self.handle_pong(pong, now);
            }
            (_, other) => {
                debug!("unexpected {:?} from {:?} - dropping", other.id(), self.peer_addr);
            }
        }
    }

    fn handle_pong(&mut self, pong: ConnectedPong, now: Instant) {
        let now_millis = self.context.clock.millis(now);
        if now_millis < pong.send_ping_time {
            debug!("invalid pong from {:?}: ping timestamp is {} ms in the future", self.peer_addr, pong.send_ping_time.abs_diff(now_millis));
            return;
        }

        let rtt_ms = match now_millis.checked_sub(pong.send_ping_time).map(u64::try_from) {
            Some(Ok(rtt_ms)) => rtt_ms,
            _ => {
                debug!("invalid pong from {:?}: ping timestamp {} is out of range", self.peer_addr, pong.send_ping_time);
                return;
            }
        };
        trace!("measured RTT of {} ms for {:?}", rtt_ms, self.peer_addr);
        self.last_rtt_ms = Some(rtt_ms);
        self.context.listener.on_ping_measure(self.session_id, rtt_ms);
    }

    fn handle_remote_disconnect(&mut self) {
        // the peer expects an ACK for its notification, and this session will not be ticked again
        self.recv_layer.update();

        if self.is_connected() {
            info!("session {} with {:?} closed: {}", self.session_id, self.peer_addr, DisconnectReason::ClientDisconnect);
            self.context.listener.on_session_close(self.session_id, DisconnectReason::ClientDisconnect);
        }
        self.state = SessionState::Disconnected;
    }

    fn send_ping(&mut self, now: Instant) {
        let ping = ConnectedMessage::ConnectedPing(ConnectedPing {
            send_ping_time: self.context.clock.millis(now),
        });
        self.queue_connected_message(ping, PacketReliability::Unreliable, true, now);
        self.last_ping = Some(now);
    }

    fn queue_connected_message(&mut self, message: ConnectedMessage, reliability: PacketReliability, immediate: bool, now: Instant) {
        let id = message.id();
        if let Err(e) = self.send_layer.add_encapsulated_to_queue(OutboundMessage::new(reliability, 0, message.to_bytes()), immediate, now) {
            error!("error queueing {:?} for {:?}: {}", id, self.peer_addr, e);
        }
    }

    /// Queues an application message. Messages are accepted until the session is disconnected
    ///  and dropped afterwards.
    pub fn add_encapsulated_to_queue(&mut self, message: OutboundMessage, immediate: bool, now: Instant) -> anyhow::Result<()> {
        if self.state == SessionState::Disconnected {
            debug!("session {} with {:?} is disconnected - dropping outgoing message", self.session_id, self.peer_addr);
            return Ok(());
        }
        self.send_layer.add_encapsulated_to_queue(message, immediate, now)
    }

    /// Starts a graceful disconnect: the application is notified right away, the peer only after
    ///  all pending traffic was flushed.
    pub fn initiate_disconnect(&mut self, reason: DisconnectReason, now: Instant) {
        if !self.is_connected() {
            return;
        }

        debug!("session {} with {:?}: requesting graceful disconnect because '{}'", self.session_id, self.peer_addr, reason);
        self.state = SessionState::Disconnecting;
        self.disconnect_deadline = Some(now + self.context.config.disconnect_timeout);

        info!("session {} with {:?} closed: {}", self.session_id, self.peer_addr, reason);
        self.context.listener.on_session_close(self.session_id, reason);
    }

    /// Closes the session without flushing or notifying the peer
    pub fn forcibly_disconnect(&mut self, reason: DisconnectReason) {
        if self.is_connected() {
            info!("session {} with {:?} closed: {}", self.session_id, self.peer_addr, reason);
            self.context.listener.on_session_close(self.session_id, reason);
        }
        self.state = SessionState::Disconnected;
    }

    pub fn update(&mut self, now: Instant) {
        if self.state == SessionState::Disconnected {
            return;
        }

        if !self.is_active && now.saturating_duration_since(self.last_update) > self.context.config.session_timeout {
            self.forcibly_disconnect(DisconnectReason::PeerTimeout);
            return;
        }

        if self.state == SessionState::Disconnecting {
            if !self.send_layer.needs_update() && !self.recv_layer.needs_update() {
                if self.is_disconnect_notified {
                    debug!("session {} with {:?}: disconnect notification was acknowledged", self.session_id, self.peer_addr);
                    self.state = SessionState::Disconnected;
                    return;
                }

                debug!("session {} with {:?}: all pending traffic flushed, sending disconnect notification", self.session_id, self.peer_addr);
                self.queue_connected_message(ConnectedMessage::DisconnectionNotification, PacketReliability::ReliableOrdered, true, now);
                self.is_disconnect_notified = true;
            }
            else if self.disconnect_deadline.is_some_and(|deadline| now > deadline) {
                debug!("session {} with {:?}: timeout during graceful disconnect", self.session_id, self.peer_addr);
                self.state = SessionState::Disconnected;
                return;
            }
        }

        self.is_active = false;
        self.recv_layer.update();
        self.send_layer.update(now);

        if self.state == SessionState::Connected {
            let ping_is_due = self.last_ping
                .map_or(true, |last_ping| now.saturating_duration_since(last_ping) > self.context.config.ping_interval);
            if ping_is_due {
                self.send_ping(now);
            }
        }
    }
}
