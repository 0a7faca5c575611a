//! engine.io handshake header carried by the Open packet.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

/// Handshake header, as sent by the server in `0{...}`.
///
/// Missing fields decode to their zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Header {
    /// Session id.
    pub sid: String,
    /// Transports the server offers to upgrade to.
    pub upgrades: Vec<String>,
    /// Keepalive interval in milliseconds.
    pub ping_interval: u64,
    /// Keepalive timeout in milliseconds.
    pub ping_timeout: u64,
}

impl Header {
    /// Parse the JSON payload of an Open packet.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::WrongHeader`] if the payload is not a header object.
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| {
            tracing::debug!("Handshake payload rejected: {}", e);
            ChannelError::WrongHeader
        })
    }

    /// Encode as the JSON payload of an Open packet.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Keepalive interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    /// Keepalive timeout.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_header() {
        let header = Header::parse(
            r#"{"sid":"abc","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":5000}"#,
        )
        .unwrap();

        assert_eq!(header.sid, "abc");
        assert_eq!(header.upgrades, vec!["websocket".to_string()]);
        assert_eq!(header.ping_interval(), Duration::from_millis(25000));
        assert_eq!(header.ping_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_parse_missing_fields() {
        let header = Header::parse(r#"{"sid":"abc","pingInterval":25000,"pingTimeout":5000}"#)
            .unwrap();
        assert_eq!(header.sid, "abc");
        assert!(header.upgrades.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(Header::parse("nope"), Err(ChannelError::WrongHeader)));
        assert!(matches!(Header::parse("[1,2]"), Err(ChannelError::WrongHeader)));
        assert!(matches!(Header::parse(""), Err(ChannelError::WrongHeader)));
    }

    #[test]
    fn test_to_json_uses_wire_names() {
        let header = Header {
            sid: "s1".to_string(),
            upgrades: Vec::new(),
            ping_interval: 25000,
            ping_timeout: 60000,
        };
        let json: serde_json::Value = serde_json::from_str(&header.to_json().unwrap()).unwrap();
        assert_eq!(json["sid"], "s1");
        assert_eq!(json["pingInterval"], 25000);
        assert_eq!(json["pingTimeout"], 60000);
        assert!(json["upgrades"].as_array().unwrap().is_empty());
    }
}
