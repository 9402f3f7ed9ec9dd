pub mod acknowledge_packet;
pub mod address;
pub mod binary;
pub mod connected_messages;
pub mod datagram;
pub mod encapsulated_packet;
pub mod frame;
pub mod message_identifiers;
pub mod offline_messages;
pub mod reliability;
