//! This is a server side implementation of RakNet, the reliable-UDP protocol used by (among
//!  others) Minecraft Bedrock Edition. It provides message oriented transport with per-message
//!  reliability classes on top of a single UDP socket.
//!
//! ## Overview
//!
//! * A peer connects via an *offline* handshake of unconnected packets (MTU discovery, server
//!    GUID exchange), after which a *session* exists for the peer's address
//! * Inside a session, the peer finishes the *connected* handshake with internal messages
//!    that are transported like application messages
//! * Every message is sent with one of the following reliability classes:
//!   * unreliable: fire and forget
//!   * unreliable sequenced: messages may be lost, but a message older than the newest message
//!      that was delivered is dropped rather than delivered late
//!   * reliable: resent until acknowledged, delivered once, in no particular order
//!   * reliable ordered: reliable, and delivered in the order they were sent on their *order
//!      channel* (there are 32 independent order channels)
//!   * reliable sequenced: reliable, dropping messages older than the newest delivered one
//!   * each reliable class has an "ack receipt" variant, for which the application is notified
//!      once the peer acknowledged every part of the message
//! * Messages are packed into *datagrams*. Datagrams are numbered, and the receiver sends ACKs
//!    for received datagrams and NACKs for gaps in the sequence numbers. The sender keeps reliable
//!    messages until the datagram containing them was acknowledged, resending them in new
//!    datagrams on NACK or timeout.
//! * Messages that do not fit into a single datagram are split, and re-assembled by the receiver
//! * Sessions are closed gracefully (flushing pending traffic and notifying the peer), or
//!    forcibly after a timeout without traffic from the peer
//!
//! The reliability layers and the session are synchronous and do no I/O of their own: they get
//!  the current time passed in and emit packets through a [packet_sink::PacketSink]. The
//!  tokio based [end_point::EndPoint] owns the socket and drives all sessions from a single task.
//!
//! ## Wire format
//!
//! Numbers are big endian unless noted otherwise. A 'triad' is a 24 bit unsigned little endian
//!  number.
//!
//! A connected frame is a datagram, an ACK or a NACK, distinguished by the flags in the first
//!  byte. The VALID flag (0x80) is set for all of them; unconnected packets never have it set.
//!
//! Datagram:
//! ```ascii
//! 0: flags (u8): 0x80 | vestigial flags
//! 1: sequence number (triad)
//! 4: encapsulated packets until the end of the UDP payload
//! ```
//!
//! Encapsulated packet:
//! ```ascii
//! 0: reliability << 5 | 0x10 if split (u8)
//! 1: payload length in *bits* (u16)
//! 3: message index (triad)                           - reliable classes only
//!    sequence index (triad)                          - sequenced classes only
//!    order index (triad), order channel (u8)         - sequenced and ordered classes only
//!    part count (u32), split id (u16), part index (u32) - split packets only
//!    payload
//! ```
//!
//! ACK / NACK:
//! ```ascii
//! 0: 0xc0 for ACK, 0xa0 for NACK
//! 1: number of records (u16)
//! 3: records, each either
//!      0x01, sequence number (triad)              - a single sequence number
//!      0x00, first (triad), last (triad)          - an inclusive range
//! ```
//!
//! The first byte of every (unconnected or encapsulated) message is its id. Ids from 0x86
//!  upwards are application messages and passed through opaquely.
//!
//! ## Connection lifecycle
//!
//! ```ascii
//! client                                      server
//!   | -- OPEN_CONNECTION_REQUEST_1 (padded) -->  |   MTU probe: reply MTU = packet length + 28
//!   | <-- OPEN_CONNECTION_REPLY_1 -------------  |
//!   | -- OPEN_CONNECTION_REQUEST_2 ----------->  |
//!   | <-- OPEN_CONNECTION_REPLY_2 -------------  |   session created: CONNECTING
//!   | == CONNECTION_REQUEST ==================>  |
//!   | <= CONNECTION_REQUEST_ACCEPTED ==========  |
//!   | == NEW_INCOMING_CONNECTION =============>  |   CONNECTED
//!   | <= CONNECTED_PING / CONNECTED_PONG =====>  |   every 5 seconds
//!   | <= DISCONNECTION_NOTIFICATION ==========>  |   DISCONNECTED
//! ```
//! (`--` unconnected packets, `==` encapsulated in datagrams)

pub mod clock;
pub mod config;
pub mod end_point;
pub mod packet_sink;
pub mod protocol;
pub mod receive_reliability_layer;
pub mod reliable_window;
pub mod safe_converter;
pub mod send_reliability_layer;
pub mod session;
pub mod split_assembler;

#[cfg(test)]
pub mod test_util;
