use std::net::SocketAddr;
use bytes::{Buf, BufMut, BytesMut};
use crate::protocol::address::{deser_address, ser_address, UNSPECIFIED_ADDRESS};
use crate::protocol::binary::{CodecError, CodecResult, RakBuf, RakBufMut};
use crate::protocol::message_identifiers::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedPing {
    pub send_ping_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedPong {
    pub send_ping_time: i64,
    pub send_pong_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub client_guid: u64,
    pub send_ping_time: i64,
    pub use_security: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequestAccepted {
    pub address: SocketAddr,
    pub system_index: u16,
    pub system_addresses: Vec<SocketAddr>,
    pub send_ping_time: i64,
    pub send_pong_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIncomingConnection {
    pub address: SocketAddr,
    pub system_addresses: Vec<SocketAddr>,
    pub send_ping_time: i64,
    pub send_pong_time: i64,
}

/// The internal messages exchanged inside encapsulated packets of an established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectedMessage {
    ConnectedPing(ConnectedPing),
    ConnectedPong(ConnectedPong),
    ConnectionRequest(ConnectionRequest),
    ConnectionRequestAccepted(ConnectionRequestAccepted),
    NewIncomingConnection(NewIncomingConnection),
    DisconnectionNotification,
}

/// System address lists are followed by two i64 timestamps. Implementations differ in the number
///  of addresses they send, so addresses are read only while there is more than the timestamps left.
const TRAILING_TIMESTAMPS_LEN: usize = 16;

fn deser_system_addresses(buf: &mut impl Buf, system_address_count: usize) -> CodecResult<Vec<SocketAddr>> {
    let mut result = Vec::with_capacity(system_address_count);
    for _ in 0..system_address_count {
        if buf.remaining() > TRAILING_TIMESTAMPS_LEN {
            result.push(deser_address(buf)?);
        }
        else {
            result.push(UNSPECIFIED_ADDRESS);
        }
    }
    Ok(result)
}

impl ConnectedMessage {
    pub fn id(&self) -> MessageId {
        match self {
            ConnectedMessage::ConnectedPing(_) => MessageId::ConnectedPing,
            ConnectedMessage::ConnectedPong(_) => MessageId::ConnectedPong,
            ConnectedMessage::ConnectionRequest(_) => MessageId::ConnectionRequest,
            ConnectedMessage::ConnectionRequestAccepted(_) => MessageId::ConnectionRequestAccepted,
            ConnectedMessage::NewIncomingConnection(_) => MessageId::NewIncomingConnection,
            ConnectedMessage::DisconnectionNotification => MessageId::DisconnectionNotification,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.id().into());

        match self {
            ConnectedMessage::ConnectedPing(msg) => {
                buf.put_i64(msg.send_ping_time);
            }
            ConnectedMessage::ConnectedPong(msg) => {
                buf.put_i64(msg.send_ping_time);
                buf.put_i64(msg.send_pong_time);
            }
            ConnectedMessage::ConnectionRequest(msg) => {
                buf.put_u64(msg.client_guid);
                buf.put_i64(msg.send_ping_time);
                buf.put_bool(msg.use_security);
            }
            ConnectedMessage::ConnectionRequestAccepted(msg) => {
                ser_address(&msg.address, buf);
                buf.put_u16(msg.system_index);
                for addr in &msg.system_addresses {
                    ser_address(addr, buf);
                }
                buf.put_i64(msg.send_ping_time);
                buf.put_i64(msg.send_pong_time);
            }
            ConnectedMessage::NewIncomingConnection(msg) => {
                ser_address(&msg.address, buf);
                for addr in &msg.system_addresses {
                    ser_address(addr, buf);
                }
                buf.put_i64(msg.send_ping_time);
                buf.put_i64(msg.send_pong_time);
            }
            ConnectedMessage::DisconnectionNotification => {}
        }
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn deser(buf: &mut impl Buf, system_address_count: usize) -> CodecResult<ConnectedMessage> {
        let raw_id = buf.read_u8()?;
        let result = match MessageId::from_raw(raw_id)? {
            MessageId::ConnectedPing => ConnectedMessage::ConnectedPing(ConnectedPing {
                send_ping_time: buf.read_i64()?,
            }),
            MessageId::ConnectedPong => ConnectedMessage::ConnectedPong(ConnectedPong {
                send_ping_time: buf.read_i64()?,
                send_pong_time: buf.read_i64()?,
            }),
            MessageId::ConnectionRequest => ConnectedMessage::ConnectionRequest(ConnectionRequest {
                client_guid: buf.read_u64()?,
                send_ping_time: buf.read_i64()?,
                use_security: buf.read_bool()?,
            }),
            MessageId::ConnectionRequestAccepted => ConnectedMessage::ConnectionRequestAccepted(ConnectionRequestAccepted {
                address: deser_address(buf)?,
                system_index: buf.read_u16()?,
                system_addresses: deser_system_addresses(buf, system_address_count)?,
                send_ping_time: buf.read_i64()?,
                send_pong_time: buf.read_i64()?,
            }),
            MessageId::NewIncomingConnection => ConnectedMessage::NewIncomingConnection(NewIncomingConnection {
                address: deser_address(buf)?,
                system_addresses: deser_system_addresses(buf, system_address_count)?,
                send_ping_time: buf.read_i64()?,
                send_pong_time: buf.read_i64()?,
            }),
            MessageId::DisconnectionNotification => ConnectedMessage::DisconnectionNotification,
            MessageId::UnconnectedPing
            | MessageId::UnconnectedPingOpenConnections
            | MessageId::OpenConnectionRequest1
            | MessageId::OpenConnectionReply1
            | MessageId::OpenConnectionRequest2
            | MessageId::OpenConnectionReply2
            | MessageId::IncompatibleProtocolVersion
            | MessageId::UnconnectedPong => return Err(CodecError::UnknownMessageId(raw_id)),
        };
        Ok(result)
    }
}
