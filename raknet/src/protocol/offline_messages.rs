use std::net::SocketAddr;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::protocol::address::{deser_address, ser_address};
use crate::protocol::binary::{CodecError, CodecResult, RakBuf, RakBufMut, MAGIC};
use crate::protocol::message_identifiers::MessageId;
use crate::safe_converter::{PrecheckedCast, SafeCast};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnconnectedPing {
    pub send_ping_time: i64,
    pub client_guid: u64,
    /// sent as UNCONNECTED_PING_OPEN_CONNECTIONS: the client only wants a reply if there are free slots
    pub open_connections_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedPong {
    pub send_ping_time: i64,
    pub server_guid: u64,
    pub server_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionRequest1 {
    pub protocol: u8,
    /// The MTU probed by the client - this is the length of the whole UDP payload, which is padded
    ///  with zeroes to reach it
    pub mtu_size: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionReply1 {
    pub server_guid: u64,
    pub server_security: bool,
    pub mtu_size: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionRequest2 {
    pub server_address: SocketAddr,
    pub mtu_size: u16,
    pub client_guid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionReply2 {
    pub server_guid: u64,
    pub client_address: SocketAddr,
    pub mtu_size: u16,
    pub server_security: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncompatibleProtocolVersion {
    pub protocol_version: u8,
    pub server_guid: u64,
}

/// Messages exchanged before a session exists, sent as raw UDP payloads. All of them contain
///  [MAGIC] which is validated on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineMessage {
    UnconnectedPing(UnconnectedPing),
    UnconnectedPong(UnconnectedPong),
    OpenConnectionRequest1(OpenConnectionRequest1),
    OpenConnectionReply1(OpenConnectionReply1),
    OpenConnectionRequest2(OpenConnectionRequest2),
    OpenConnectionReply2(OpenConnectionReply2),
    IncompatibleProtocolVersion(IncompatibleProtocolVersion),
}

impl OfflineMessage {
    pub fn id(&self) -> MessageId {
        match self {
            OfflineMessage::UnconnectedPing(msg) if msg.open_connections_only => MessageId::UnconnectedPingOpenConnections,
            OfflineMessage::UnconnectedPing(_) => MessageId::UnconnectedPing,
            OfflineMessage::UnconnectedPong(_) => MessageId::UnconnectedPong,
            OfflineMessage::OpenConnectionRequest1(_) => MessageId::OpenConnectionRequest1,
            OfflineMessage::OpenConnectionReply1(_) => MessageId::OpenConnectionReply1,
            OfflineMessage::OpenConnectionRequest2(_) => MessageId::OpenConnectionRequest2,
            OfflineMessage::OpenConnectionReply2(_) => MessageId::OpenConnectionReply2,
            OfflineMessage::IncompatibleProtocolVersion(_) => MessageId::IncompatibleProtocolVersion,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let start_len = buf.len();
        buf.put_u8(self.id().into());

        match self {
            OfflineMessage::UnconnectedPing(msg) => {
                buf.put_i64(msg.send_ping_time);
                buf.put_magic();
                buf.put_u64(msg.client_guid);
            }
            OfflineMessage::UnconnectedPong(msg) => {
                buf.put_i64(msg.send_ping_time);
                buf.put_u64(msg.server_guid);
                buf.put_magic();
                buf.put_string(&msg.server_name);
            }
            OfflineMessage::OpenConnectionRequest1(msg) => {
                buf.put_magic();
                buf.put_u8(msg.protocol);
                let padded_len = start_len + msg.mtu_size.safe_cast();
                if buf.len() < padded_len {
                    buf.put_bytes(0, padded_len - buf.len());
                }
            }
            OfflineMessage::OpenConnectionReply1(msg) => {
                buf.put_magic();
                buf.put_u64(msg.server_guid);
                buf.put_bool(msg.server_security);
                buf.put_u16(msg.mtu_size);
            }
            OfflineMessage::OpenConnectionRequest2(msg) => {
                buf.put_magic();
                ser_address(&msg.server_address, buf);
                buf.put_u16(msg.mtu_size);
                buf.put_u64(msg.client_guid);
            }
            OfflineMessage::OpenConnectionReply2(msg) => {
                buf.put_magic();
                buf.put_u64(msg.server_guid);
                ser_address(&msg.client_address, buf);
                buf.put_u16(msg.mtu_size);
                buf.put_bool(msg.server_security);
            }
            OfflineMessage::IncompatibleProtocolVersion(msg) => {
                buf.put_u8(msg.protocol_version);
                buf.put_magic();
                buf.put_u64(msg.server_guid);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn deser(buf: &mut impl Buf) -> CodecResult<OfflineMessage> {
        let packet_len = buf.remaining();

        let raw_id = buf.read_u8()?;
        let result = match MessageId::from_raw(raw_id)? {
            id @ (MessageId::UnconnectedPing | MessageId::UnconnectedPingOpenConnections) => {
                let send_ping_time = buf.read_i64()?;
                buf.read_magic()?;
                OfflineMessage::UnconnectedPing(UnconnectedPing {
                    send_ping_time,
                    client_guid: buf.read_u64()?,
                    open_connections_only: id == MessageId::UnconnectedPingOpenConnections,
                })
            }
            MessageId::UnconnectedPong => {
                let send_ping_time = buf.read_i64()?;
                let server_guid = buf.read_u64()?;
                buf.read_magic()?;
                OfflineMessage::UnconnectedPong(UnconnectedPong {
                    send_ping_time,
                    server_guid,
                    server_name: buf.read_string()?,
                })
            }
            MessageId::OpenConnectionRequest1 => {
                buf.read_magic()?;
                let protocol = buf.read_u8()?;
                buf.advance(buf.remaining());
                OfflineMessage::OpenConnectionRequest1(OpenConnectionRequest1 {
                    protocol,
                    mtu_size: packet_len.min(u16::MAX.into()).prechecked_cast(),
                })
            }
            MessageId::OpenConnectionReply1 => {
                buf.read_magic()?;
                OfflineMessage::OpenConnectionReply1(OpenConnectionReply1 {
                    server_guid: buf.read_u64()?,
                    server_security: buf.read_bool()?,
                    mtu_size: buf.read_u16()?,
                })
            }
            MessageId::OpenConnectionRequest2 => {
                buf.read_magic()?;
                OfflineMessage::OpenConnectionRequest2(OpenConnectionRequest2 {
                    server_address: deser_address(buf)?,
                    mtu_size: buf.read_u16()?,
                    client_guid: buf.read_u64()?,
                })
            }
            MessageId::OpenConnectionReply2 => {
                buf.read_magic()?;
                OfflineMessage::OpenConnectionReply2(OpenConnectionReply2 {
                    server_guid: buf.read_u64()?,
                    client_address: deser_address(buf)?,
                    mtu_size: buf.read_u16()?,
                    server_security: buf.read_bool()?,
                })
            }
            MessageId::IncompatibleProtocolVersion => {
                let protocol_version = buf.read_u8()?;
                buf.read_magic()?;
                OfflineMessage::IncompatibleProtocolVersion(IncompatibleProtocolVersion {
                    protocol_version,
                    server_guid: buf.read_u64()?,
                })
            }
            MessageId::ConnectedPing
            | MessageId::ConnectedPong
            | MessageId::ConnectionRequest
            | MessageId::ConnectionRequestAccepted
            | MessageId::NewIncomingConnection
            | MessageId::DisconnectionNotification => return Err(CodecError::UnknownMessageId(raw_id)),
        };
        Ok(result)
    }
}

/// the length of OPEN_CONNECTION_REQUEST_1 without padding
pub const OPEN_CONNECTION_REQUEST_1_MIN_LEN: usize = 1 + MAGIC.len() + 1;
