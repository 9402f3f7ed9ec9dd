use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::protocol::binary::CodecError;

/// The leading byte of every message, both offline and inside encapsulated packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageId {
    ConnectedPing = 0x00,
    UnconnectedPing = 0x01,
    UnconnectedPingOpenConnections = 0x02,
    ConnectedPong = 0x03,
    OpenConnectionRequest1 = 0x05,
    OpenConnectionReply1 = 0x06,
    OpenConnectionRequest2 = 0x07,
    OpenConnectionReply2 = 0x08,
    ConnectionRequest = 0x09,
    ConnectionRequestAccepted = 0x10,
    NewIncomingConnection = 0x13,
    DisconnectionNotification = 0x15,
    IncompatibleProtocolVersion = 0x19,
    UnconnectedPong = 0x1c,
}

impl MessageId {
    /// Messages with this id or higher belong to the application and are passed through opaquely
    pub const USER_PACKET_ENUM: u8 = 0x86;

    pub fn is_user_packet(raw: u8) -> bool {
        raw >= Self::USER_PACKET_ENUM
    }

    pub fn from_raw(raw: u8) -> Result<MessageId, CodecError> {
        MessageId::try_from(raw)
            .map_err(|_| CodecError::UnknownMessageId(raw))
    }
}
