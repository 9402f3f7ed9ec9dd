use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::anyhow;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, span, trace, warn, Level};
use uuid::Uuid;
use crate::clock::RakNetClock;
use crate::config::RakNetConfig;
use crate::packet_sink::{PacketSink, SessionListener};
use crate::protocol::binary::CodecError;
use crate::protocol::frame::ConnectedFrame;
use crate::protocol::offline_messages::{IncompatibleProtocolVersion, OfflineMessage, OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1, OpenConnectionRequest2, UnconnectedPing, UnconnectedPong};
use crate::send_reliability_layer::OutboundMessage;
use crate::session::{DisconnectReason, Session, SessionContext};

/// IP header (20 bytes) plus UDP header (8 bytes): the part of the MTU that is not UDP payload
const IP_AND_UDP_HEADER_LEN: u16 = 28;

const RECEIVE_BUFFER_LEN: usize = 65536;

/// Everything the host reports to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    SessionOpened { session_id: u64, addr: SocketAddr, client_guid: u64 },
    SessionClosed { session_id: u64, reason: DisconnectReason },
    Message { session_id: u64, payload: Bytes },
    PacketAck { session_id: u64, identifier_ack: u32 },
    PingMeasured { session_id: u64, rtt_ms: u64 },
}

impl SessionListener for mpsc::UnboundedSender<ServerEvent> {
    fn on_session_open(&self, session_id: u64, addr: SocketAddr, client_guid: u64) {
        self.emit(ServerEvent::SessionOpened { session_id, addr, client_guid });
    }

    fn on_session_close(&self, session_id: u64, reason: DisconnectReason) {
        self.emit(ServerEvent::SessionClosed { session_id, reason });
    }

    fn on_message(&self, session_id: u64, payload: Bytes) {
        self.emit(ServerEvent::Message { session_id, payload });
    }

    fn on_packet_ack(&self, session_id: u64, identifier_ack: u32) {
        self.emit(ServerEvent::PacketAck { session_id, identifier_ack });
    }

    fn on_ping_measure(&self, session_id: u64, rtt_ms: u64) {
        self.emit(ServerEvent::PingMeasured { session_id, rtt_ms });
    }
}

trait EmitEvent {
    fn emit(&self, event: ServerEvent);
}

impl EmitEvent for mpsc::UnboundedSender<ServerEvent> {
    fn emit(&self, event: ServerEvent) {
        if self.send(event).is_err() {
            trace!("event receiver was dropped - discarding event");
        }
    }
}

#[derive(Debug)]
pub enum EndPointCommand {
    Send { session_id: u64, message: OutboundMessage, immediate: bool },
    CloseSession { session_id: u64 },
    BlockAddress { ip: IpAddr, duration: Duration },
    UnblockAddress { ip: IpAddr },
    SetServerName(String),
}

/// The application's way of talking to a running [EndPoint]. The end point shuts down when the
///  last handle is dropped.
#[derive(Clone)]
pub struct EndPointHandle {
    commands: mpsc::UnboundedSender<EndPointCommand>,
}

impl EndPointHandle {
    fn send_command(&self, command: EndPointCommand) -> anyhow::Result<()> {
        self.commands.send(command)
            .map_err(|_| anyhow!("end point is shut down"))
    }

    pub fn send(&self, session_id: u64, message: OutboundMessage, immediate: bool) -> anyhow::Result<()> {
        self.send_command(EndPointCommand::Send { session_id, message, immediate })
    }

    /// closes a session gracefully, flushing pending traffic before the peer is notified
    pub fn close_session(&self, session_id: u64) -> anyhow::Result<()> {
        self.send_command(EndPointCommand::CloseSession { session_id })
    }

    pub fn block_address(&self, ip: IpAddr, duration: Duration) -> anyhow::Result<()> {
        self.send_command(EndPointCommand::BlockAddress { ip, duration })
    }

    pub fn unblock_address(&self, ip: IpAddr) -> anyhow::Result<()> {
        self.send_command(EndPointCommand::UnblockAddress { ip })
    }

    pub fn set_server_name(&self, server_name: String) -> anyhow::Result<()> {
        self.send_command(EndPointCommand::SetServerName(server_name))
    }
}

/// EndPoint is the server side host of RakNet sessions: it owns the UDP socket, answers the
///  offline handshake, dispatches incoming frames to their sessions and ticks them.
///
/// All sessions are confined to the task that runs [EndPoint::run], so there is no locking
///  anywhere below this level.
pub struct EndPoint {
    config: Arc<RakNetConfig>,
    socket: Arc<UdpSocket>,
    context: SessionContext,
    server_name: String,
    commands: mpsc::UnboundedReceiver<EndPointCommand>,

    sessions: FxHashMap<SocketAddr, Session>,
    session_addrs: FxHashMap<u64, SocketAddr>,
    next_session_id: u64,

    packets_per_tick: FxHashMap<IpAddr, u32>,
    blocked: FxHashMap<IpAddr, Instant>,
    is_shutting_down: bool,
}

impl EndPoint {
    pub async fn bind(config: RakNetConfig) -> anyhow::Result<(EndPoint, EndPointHandle, mpsc::UnboundedReceiver<ServerEvent>)> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        let local_addr = socket.local_addr()?;
        info!("bound RakNet socket to {:?}", local_addr);

        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        let config = Arc::new(config);
        let context = SessionContext {
            config: config.clone(),
            clock: RakNetClock::new(Instant::now()),
            local_port: local_addr.port(),
            packet_sink: socket.clone(),
            listener: Arc::new(event_sender),
        };

        let end_point = EndPoint {
            server_name: config.server_name.clone(),
            config,
            socket,
            context,
            commands: command_receiver,
            sessions: FxHashMap::default(),
            session_addrs: FxHashMap::default(),
            next_session_id: 0,
            packets_per_tick: FxHashMap::default(),
            blocked: FxHashMap::default(),
            is_shutting_down: false,
        };
        Ok((end_point, EndPointHandle { commands: command_sender }, event_receiver))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(mut self) {
        info!("starting RakNet end point");

        let mut buf = vec![0u8; RECEIVE_BUFFER_LEN];
        let mut ticks = interval(self.config.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((num_read, from)) => self.on_packet(&buf[..num_read], from, Instant::now()),
                        Err(e) => error!("socket error: {}", e),
                    }
                }
                _ = ticks.tick() => {
                    self.on_tick(Instant::now());
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.on_command(command, Instant::now()),
                        None => break,
                    }
                }
            }
        }

        self.shutdown(&mut buf, &mut ticks).await;
    }

    async fn shutdown(&mut self, buf: &mut [u8], ticks: &mut Interval) {
        info!("all handles were dropped - shutting down, closing {} sessions", self.sessions.len());
        self.is_shutting_down = true;

        let now = Instant::now();
        for session in self.sessions.values_mut() {
            session.initiate_disconnect(DisconnectReason::ServerShutdown, now);
        }

        while !self.sessions.is_empty() {
            select! {
                received = self.socket.recv_from(buf) => {
                    match received {
                        Ok((num_read, from)) => self.on_packet(&buf[..num_read], from, Instant::now()),
                        Err(e) => error!("socket error: {}", e),
                    }
                }
                _ = ticks.tick() => {
                    self.on_tick(Instant::now());
                }
            }
        }
        info!("shut down");
    }

    fn on_packet(&mut self, packet_buf: &[u8], from: SocketAddr, now: Instant) {
        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "packet_received", ?correlation_id);
        let _entered = span.enter();

        trace!("received packet from {:?}: {:?}", from, packet_buf);

        let ip = from.ip();
        if let Some(&until) = self.blocked.get(&ip) {
            if now < until {
                trace!("{} is blocked - dropping", ip);
                return;
            }
            self.blocked.remove(&ip);
        }

        let num_packets = self.packets_per_tick.entry(ip).or_insert(0);
        *num_packets += 1;
        if *num_packets > self.config.packet_limit_per_tick {
            warn!("{} exceeded the packet limit of {} per tick", ip, self.config.packet_limit_per_tick);
            self.block_address(ip, self.config.block_duration, now);
            return;
        }

        if packet_buf.is_empty() {
            return;
        }

        if let Some(session) = self.sessions.get_mut(&from) {
            if ConnectedFrame::is_connected_frame(packet_buf) {
                if let Err(e) = session.handle_packet(packet_buf, now) {
                    debug!("malformed frame from {:?}: {}", from, e);
                    self.block_address(ip, self.config.malformed_block_duration, now);
                }
                return;
            }
        }

        if self.is_shutting_down {
            trace!("shutting down - ignoring offline packet from {:?}", from);
            return;
        }

        match OfflineMessage::deser(&mut &packet_buf[..]) {
            Ok(message) => self.on_offline_message(message, from, now),
            Err(CodecError::UnknownMessageId(id)) => {
                debug!("unhandled packet 0x{:02x} from {:?} - dropping", id, from);
            }
            Err(e) => {
                debug!("malformed offline packet from {:?}: {}", from, e);
                self.block_address(ip, self.config.malformed_block_duration, now);
            }
        }
    }

    fn on_offline_message(&mut self, message: OfflineMessage, from: SocketAddr, now: Instant) {
        trace!("received {:?} from {:?}", message.id(), from);

        match message {
            OfflineMessage::UnconnectedPing(ping) => self.on_unconnected_ping(ping, from),
            OfflineMessage::OpenConnectionRequest1(request) => self.on_open_connection_request_1(request, from),
            OfflineMessage::OpenConnectionRequest2(request) => self.on_open_connection_request_2(request, from, now),
            other => {
                debug!("unexpected offline message {:?} from {:?} - dropping", other.id(), from);
            }
        }
    }

    fn on_unconnected_ping(&self, ping: UnconnectedPing, from: SocketAddr) {
        self.send_offline_message(from, OfflineMessage::UnconnectedPong(UnconnectedPong {
            send_ping_time: ping.send_ping_time,
            server_guid: self.config.server_guid,
            server_name: self.server_name.clone(),
        }));
    }

    fn on_open_connection_request_1(&self, request: OpenConnectionRequest1, from: SocketAddr) {
        if !self.config.protocol_versions.contains(&request.protocol) {
            debug!("{:?} requested unsupported protocol version {}", from, request.protocol);
            self.send_offline_message(from, OfflineMessage::IncompatibleProtocolVersion(IncompatibleProtocolVersion {
                protocol_version: self.config.protocol_versions.first().copied().unwrap_or_default(),
                server_guid: self.config.server_guid,
            }));
            return;
        }

        let mtu_size = request.mtu_size
            .saturating_add(IP_AND_UDP_HEADER_LEN)
            .min(self.config.max_mtu_size);
        self.send_offline_message(from, OfflineMessage::OpenConnectionReply1(OpenConnectionReply1 {
            server_guid: self.config.server_guid,
            server_security: false,
            mtu_size,
        }));
    }

    fn on_open_connection_request_2(&mut self, request: OpenConnectionRequest2, from: SocketAddr, now: Instant) {
        if self.config.port_checking && request.server_address.port() != self.context.local_port {
            debug!("not creating session for {:?} due to mismatched port: expected {}, got {}", from, self.context.local_port, request.server_address.port());
            return;
        }
        if request.mtu_size < self.config.min_mtu_size {
            debug!("not creating session for {:?} due to bad MTU size {}", from, request.mtu_size);
            return;
        }

        let mtu_size = request.mtu_size.min(self.config.max_mtu_size);

        if let Some(mut existing) = self.sessions.remove(&from) {
            existing.forcibly_disconnect(DisconnectReason::ClientReconnect);
            self.session_addrs.remove(&existing.session_id());
        }

        let session_id = self.next_session_id;
        let session = match Session::new(self.context.clone(), session_id, from, request.client_guid, mtu_size, now) {
            Ok(session) => session,
            Err(e) => {
                error!("error creating session for {:?}: {}", from, e);
                return;
            }
        };
        self.next_session_id += 1;

        self.send_offline_message(from, OfflineMessage::OpenConnectionReply2(OpenConnectionReply2 {
            server_guid: self.config.server_guid,
            client_address: from,
            mtu_size,
            server_security: false,
        }));

        debug!("created session {} for {:?} with MTU size {}", session_id, from, mtu_size);
        self.sessions.insert(from, session);
        self.session_addrs.insert(session_id, from);
    }

    fn send_offline_message(&self, to: SocketAddr, message: OfflineMessage) {
        trace!("sending {:?} to {:?}", message.id(), to);
        self.context.packet_sink.send_packet(to, &message.to_bytes());
    }

    fn on_tick(&mut self, now: Instant) {
        for session in self.sessions.values_mut() {
            session.update(now);
        }

        let session_addrs = &mut self.session_addrs;
        self.sessions.retain(|addr, session| {
            if session.is_disconnected() {
                debug!("removing session {} for {:?}", session.session_id(), addr);
                session_addrs.remove(&session.session_id());
                false
            }
            else {
                true
            }
        });

        self.packets_per_tick.clear();
        self.blocked.retain(|ip, until| {
            if *until <= now {
                debug!("unblocking {}", ip);
                false
            }
            else {
                true
            }
        });
    }

    fn on_command(&mut self, command: EndPointCommand, now: Instant) {
        match command {
            EndPointCommand::Send { session_id, message, immediate } => {
                let Some(session) = self.session_mut(session_id) else {
                    debug!("sending to unknown session {} - dropping message", session_id);
                    return;
                };
                if let Err(e) = session.add_encapsulated_to_queue(message, immediate, now) {
                    warn!("error sending message to session {}: {}", session_id, e);
                }
            }
            EndPointCommand::CloseSession { session_id } => {
                if let Some(session) = self.session_mut(session_id) {
                    session.initiate_disconnect(DisconnectReason::ServerDisconnect, now);
                }
            }
            EndPointCommand::BlockAddress { ip, duration } => {
                self.block_address(ip, duration, now);
            }
            EndPointCommand::UnblockAddress { ip } => {
                if self.blocked.remove(&ip).is_some() {
                    debug!("unblocking {}", ip);
                }
            }
            EndPointCommand::SetServerName(server_name) => {
                debug!("changing server name to {:?}", server_name);
                self.server_name = server_name;
            }
        }
    }

    fn session_mut(&mut self, session_id: u64) -> Option<&mut Session> {
        let addr = self.session_addrs.get(&session_id)?;
        self.sessions.get_mut(addr)
    }

    /// An existing block is extended but never shortened
    fn block_address(&mut self, ip: IpAddr, duration: Duration, now: Instant) {
        let until = now + duration;
        let blocked_until = self.blocked.entry(ip).or_insert(until);
        if *blocked_until < until {
            *blocked_until = until;
        }
        warn!("blocking {} for {:?}", ip, duration);
    }
}
