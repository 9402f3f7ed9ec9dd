use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;

/// The smallest MTU any RakNet implementation is required to support
pub const PROTOCOL_MIN_MTU_SIZE: u16 = 400;

/// The largest MTU for which a split chunk's length in bits still fits the encapsulated packet's
///  16 bit length field
pub const MAX_MTU_SIZE: u16 = u16::MAX / 8 + SendLayerConfig::SPLIT_OVERHEAD as u16;

/// The order channels per session, numbered `0..MAX_ORDER_CHANNELS`
pub const MAX_ORDER_CHANNELS: usize = 32;

pub struct RakNetConfig {
    pub bind_addr: SocketAddr,

    /// This is the server's identity in offline replies. Clients use it to recognize a server
    ///  across address changes, so it should be stable for the lifetime of a process.
    pub server_guid: u64,

    /// The payload of unconnected pongs, i.e. the advertisement string shown in server lists.
    ///  For Minecraft Bedrock this is the `MCPE;...` MOTD string.
    pub server_name: String,

    /// RakNet protocol versions accepted in OPEN_CONNECTION_REQUEST_1
    pub protocol_versions: Vec<u8>,

    /// Sessions are only established with an MTU in this range. The MTU includes IP and UDP headers,
    ///  and the reliability layers derive the maximum datagram payload from it.
    pub min_mtu_size: u16,
    pub max_mtu_size: u16,

    /// If true, a client must address the server by the port it is actually bound to, both in
    ///  OPEN_CONNECTION_REQUEST_2 and NEW_INCOMING_CONNECTION
    pub port_checking: bool,

    /// The number of 'internal' addresses in CONNECTION_REQUEST_ACCEPTED and NEW_INCOMING_CONNECTION.
    ///  This is 10 in original RakNet and 20 in Minecraft Bedrock.
    pub system_address_count: usize,

    /// This is the width of the receive windows for datagram sequence numbers and reliable message
    ///  indices, and the limit for the resend backlog.
    pub window_size: u32,
    pub max_split_part_count: u32,
    pub max_concurrent_splits: usize,

    /// the maximum number of datagrams resent per send layer tick
    pub resend_budget_per_tick: usize,
    pub resend_timeout: Duration,

    pub session_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub ping_interval: Duration,
    pub tick_interval: Duration,

    /// An address sending more packets than this within a tick is blocked for [RakNetConfig::block_duration]
    pub packet_limit_per_tick: u32,
    pub block_duration: Duration,
    /// block duration for addresses sending malformed packets
    pub malformed_block_duration: Duration,
}

impl Default for RakNetConfig {
    fn default() -> Self {
        RakNetConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 19132)),
            server_guid: rand::random(),
            server_name: String::new(),
            protocol_versions: vec![11],
            min_mtu_size: PROTOCOL_MIN_MTU_SIZE,
            max_mtu_size: 1492,
            port_checking: true,
            system_address_count: 20,
            window_size: 2048,
            max_split_part_count: 128,
            max_concurrent_splits: 4,
            resend_budget_per_tick: 16,
            resend_timeout: Duration::from_secs(8),
            session_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(5),
            tick_interval: Duration::from_millis(10),
            packet_limit_per_tick: 200,
            block_duration: Duration::from_secs(300),
            malformed_block_duration: Duration::from_secs(5),
        }
    }
}

impl RakNetConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_mtu_size < PROTOCOL_MIN_MTU_SIZE {
            bail!("minimum MTU size must be at least {}, was {}", PROTOCOL_MIN_MTU_SIZE, self.min_mtu_size);
        }
        if self.max_mtu_size > MAX_MTU_SIZE {
            bail!("maximum MTU size must be at most {}, was {}", MAX_MTU_SIZE, self.max_mtu_size);
        }
        if self.max_mtu_size < self.min_mtu_size {
            bail!("maximum MTU size {} is smaller than minimum MTU size {}", self.max_mtu_size, self.min_mtu_size);
        }
        if self.protocol_versions.is_empty() {
            bail!("at least one protocol version must be supported");
        }
        if self.window_size == 0 {
            bail!("window size must not be 0");
        }
        if self.max_split_part_count == 0 || self.max_concurrent_splits == 0 {
            bail!("split packet limits must not be 0");
        }
        if self.resend_budget_per_tick == 0 {
            bail!("resend budget must not be 0");
        }
        if self.tick_interval.is_zero() {
            bail!("tick interval must not be 0");
        }

        Ok(())
    }

    pub fn receive_layer_config(&self) -> ReceiveLayerConfig {
        ReceiveLayerConfig {
            window_size: self.window_size,
            max_split_part_count: self.max_split_part_count,
            max_concurrent_splits: self.max_concurrent_splits,
        }
    }

    pub fn send_layer_config(&self, mtu_size: u16) -> SendLayerConfig {
        SendLayerConfig {
            mtu_size,
            window_size: self.window_size,
            resend_budget_per_tick: self.resend_budget_per_tick,
            resend_timeout: self.resend_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceiveLayerConfig {
    pub window_size: u32,
    pub max_split_part_count: u32,
    pub max_concurrent_splits: usize,
}

#[derive(Debug, Clone)]
pub struct SendLayerConfig {
    pub mtu_size: u16,
    pub window_size: u32,
    pub resend_budget_per_tick: usize,
    pub resend_timeout: Duration,
}

impl SendLayerConfig {
    /// IP header, UDP header and datagram header
    const DATAGRAM_OVERHEAD: usize = 36;
    /// [SendLayerConfig::DATAGRAM_OVERHEAD] plus the worst case encapsulated packet header
    const SPLIT_OVERHEAD: usize = 60;

    /// the maximum encoded length of a datagram's encapsulated packets before it is sent
    pub fn max_datagram_payload_len(&self) -> usize {
        usize::from(self.mtu_size) - Self::DATAGRAM_OVERHEAD
    }

    /// payloads longer than this are split
    pub fn max_split_chunk_len(&self) -> usize {
        usize::from(self.mtu_size) - Self::SPLIT_OVERHEAD
    }
}
