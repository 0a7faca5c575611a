//! Protocol module - engine.io/socket.io text packets.
//!
//! This module implements the wire codec used by the channel loops:
//! - Packet type detection and event body parsing
//! - Sentinel frames for close/ping/pong
//! - The handshake header carried by the Open packet

mod header;
mod message;

pub use header::Header;
pub use message::{
    decode, encode, Message, MessageType, CLOSE_MESSAGE, EMPTY_MESSAGE, PING_MESSAGE,
    PONG_MESSAGE,
};
