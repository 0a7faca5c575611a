//! engine.io / socket.io text packet encoding and decoding.
//!
//! Packet layout (engine.io v3 carrying socket.io v2):
//! ```text
//! 0{json}                open, handshake header
//! 1                      close
//! 2                      ping
//! 3                      pong
//! 40                     socket.io connect (empty message)
//! 41                     socket.io disconnect, treated as close
//! 42["event",args]       event
//! 42<id>["event",args]   event expecting an acknowledgment
//! 43<id>[args]           acknowledgment
//! ```
//!
//! # Example
//!
//! ```
//! use socketio_channel::protocol::{decode, encode, Message, MessageType};
//!
//! let msg = decode(r#"42["chat",{"text":"hi"}]"#).unwrap();
//! assert_eq!(msg.kind, MessageType::Emit);
//! assert_eq!(msg.event, "chat");
//! assert_eq!(msg.args, r#"{"text":"hi"}"#);
//!
//! let frame = encode(&Message::ack_response(7, "\"ok\""));
//! assert_eq!(frame, r#"437["ok"]"#);
//! ```

use serde_json::Value;

use crate::error::{ChannelError, Result};

/// Pre-encoded close frame. Also used as the outbound loop's stop sentinel.
pub const CLOSE_MESSAGE: &str = "1";

/// Pre-encoded ping frame.
pub const PING_MESSAGE: &str = "2";

/// Pre-encoded pong frame.
pub const PONG_MESSAGE: &str = "3";

/// Pre-encoded socket.io connect frame.
pub const EMPTY_MESSAGE: &str = "40";

const OPEN: &str = "0";
const DISCONNECT: &str = "41";
const EVENT: &str = "42";
const ACK: &str = "43";

/// Decoded packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Handshake from the server, carries the header JSON in `args`.
    Open,
    /// Peer closes the engine.io session.
    Close,
    /// Keepalive probe.
    Ping,
    /// Keepalive answer.
    Pong,
    /// socket.io connect packet without payload.
    Empty,
    /// Fire-and-forget event.
    Emit,
    /// Event that expects an acknowledgment with `ack_id`.
    AckRequest,
    /// Acknowledgment for an earlier `AckRequest`.
    AckResponse,
}

impl MessageType {
    /// Control frames are handled by the inbound loop itself.
    #[inline]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Open | Self::Ping | Self::Pong)
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Packet type.
    pub kind: MessageType,
    /// Correlation id (ack request/response only, 0 otherwise).
    pub ack_id: u64,
    /// Event name (emit/ack request only).
    pub event: String,
    /// Raw JSON text of the argument, empty when there is none.
    pub args: String,
    /// The frame this message was decoded from.
    pub source: String,
}

impl Message {
    fn new(kind: MessageType) -> Self {
        Self {
            kind,
            ack_id: 0,
            event: String::new(),
            args: String::new(),
            source: String::new(),
        }
    }

    /// Open packet carrying an encoded handshake header.
    pub fn open(header_json: impl Into<String>) -> Self {
        Self {
            args: header_json.into(),
            ..Self::new(MessageType::Open)
        }
    }

    /// Fire-and-forget event.
    pub fn emit(event: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            args: args.into(),
            ..Self::new(MessageType::Emit)
        }
    }

    /// Event expecting an acknowledgment.
    pub fn ack_request(ack_id: u64, event: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            ack_id,
            event: event.into(),
            args: args.into(),
            ..Self::new(MessageType::AckRequest)
        }
    }

    /// Acknowledgment reply.
    pub fn ack_response(ack_id: u64, args: impl Into<String>) -> Self {
        Self {
            ack_id,
            args: args.into(),
            ..Self::new(MessageType::AckResponse)
        }
    }
}

/// Encode a message into a text frame.
pub fn encode(msg: &Message) -> String {
    match msg.kind {
        MessageType::Open => format!("{}{}", OPEN, msg.args),
        MessageType::Close => CLOSE_MESSAGE.to_string(),
        MessageType::Ping => PING_MESSAGE.to_string(),
        MessageType::Pong => PONG_MESSAGE.to_string(),
        MessageType::Empty => EMPTY_MESSAGE.to_string(),
        MessageType::Emit => format!("{}{}", EVENT, event_body(&msg.event, &msg.args)),
        MessageType::AckRequest => format!(
            "{}{}{}",
            EVENT,
            msg.ack_id,
            event_body(&msg.event, &msg.args)
        ),
        MessageType::AckResponse => format!("{}{}[{}]", ACK, msg.ack_id, msg.args),
    }
}

fn event_body(event: &str, args: &str) -> String {
    // serde_json quoting of a &str cannot fail
    let name = Value::String(event.to_string()).to_string();
    if args.is_empty() {
        format!("[{}]", name)
    } else {
        format!("[{},{}]", name, args)
    }
}

/// Decode a text frame.
///
/// # Errors
///
/// Returns [`ChannelError::WrongPacket`] for unknown packet types and
/// malformed event bodies.
pub fn decode(data: &str) -> Result<Message> {
    let kind = message_type(data)?;

    let mut msg = match kind {
        MessageType::Open => Message::open(&data[OPEN.len()..]),
        MessageType::Close | MessageType::Ping | MessageType::Pong | MessageType::Empty => {
            Message::new(kind)
        }
        MessageType::AckResponse => {
            let (ack_id, body) = split_ack_id(&data[ACK.len()..])?;
            let ack_id = ack_id.ok_or(ChannelError::WrongPacket)?;
            let args = parse_array(body)?
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(",");
            Message::ack_response(ack_id, args)
        }
        MessageType::Emit | MessageType::AckRequest => {
            let (ack_id, body) = split_ack_id(&data[EVENT.len()..])?;
            let mut items = parse_array(body)?.into_iter();
            let event = match items.next() {
                Some(Value::String(event)) => event,
                _ => return Err(ChannelError::WrongPacket),
            };
            let args = items.next().map(|v| v.to_string()).unwrap_or_default();
            match ack_id {
                Some(id) => Message::ack_request(id, event, args),
                None => Message::emit(event, args),
            }
        }
    };

    msg.source = data.to_string();
    Ok(msg)
}

fn message_type(data: &str) -> Result<MessageType> {
    if data.starts_with(OPEN) {
        return Ok(MessageType::Open);
    }
    if data.starts_with(EMPTY_MESSAGE) {
        return Ok(MessageType::Empty);
    }
    if data.starts_with(DISCONNECT) {
        return Ok(MessageType::Close);
    }
    if data.starts_with(EVENT) {
        // refined to AckRequest once the id is parsed
        return Ok(MessageType::Emit);
    }
    if data.starts_with(ACK) {
        return Ok(MessageType::AckResponse);
    }
    match data {
        CLOSE_MESSAGE => Ok(MessageType::Close),
        PING_MESSAGE => Ok(MessageType::Ping),
        PONG_MESSAGE => Ok(MessageType::Pong),
        _ => Err(ChannelError::WrongPacket),
    }
}

fn split_ack_id(text: &str) -> Result<(Option<u64>, &str)> {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Ok((None, text));
    }
    let id = text[..digits]
        .parse()
        .map_err(|_| ChannelError::WrongPacket)?;
    Ok((Some(id), &text[digits..]))
}

fn parse_array(body: &str) -> Result<Vec<Value>> {
    match serde_json::from_str(body) {
        Ok(Value::Array(items)) => Ok(items),
        _ => Err(ChannelError::WrongPacket),
    }
}
