//! Control-channel message envelope
//!
//! # Message Flow
//!
//! 1. Agent opens the WebSocket and sends `remoteExitNode/register`
//! 2. Control plane pushes peer, mapping and reload commands at any time
//! 3. Agent sends `remoteExitNode/ping` every minute while connected
//!
//! Transport-level liveness (WebSocket ping/pong) is separate from the
//! application-level `remoteExitNode/ping` message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Known message type strings
pub mod message_types {
    /// Add a WireGuard peer on the exit node (inbound)
    pub const PEERS_ADD: &str = "remoteExitNode/peers/add";
    /// Remove a WireGuard peer from the exit node (inbound)
    pub const PEERS_REMOVE: &str = "remoteExitNode/peers/remove";
    /// Replace the exit node's proxy mapping (inbound)
    pub const UPDATE_PROXY_MAPPING: &str = "remoteExitNode/update-proxy-mapping";
    /// Replace the exit node's destinations (inbound)
    pub const UPDATE_DESTINATIONS: &str = "remoteExitNode/update-destinations";
    /// Regenerate the local reverse-proxy configuration (inbound)
    pub const TRAEFIK_RELOAD: &str = "remoteExitNode/traefik/reload";
    /// Agent registration, sent on every connect (outbound)
    pub const REGISTER: &str = "remoteExitNode/register";
    /// Application-level heartbeat (outbound)
    pub const PING: &str = "remoteExitNode/ping";

    /// All inbound command types the agent registers handlers for
    pub const INBOUND: [&str; 5] = [
        PEERS_ADD,
        PEERS_REMOVE,
        UPDATE_PROXY_MAPPING,
        UPDATE_DESTINATIONS,
        TRAEFIK_RELOAD,
    ];
}

/// Envelope for every frame on the control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Namespaced message type, e.g. `remoteExitNode/peers/add`
    #[serde(rename = "type")]
    pub message_type: String,
    /// Message-specific payload
    #[serde(default)]
    pub data: Value,
}

impl ControlMessage {
    /// Create a new message
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
        }
    }

    /// Create a message from any serializable payload
    pub fn with_payload<T: Serialize>(
        message_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(message_type, serde_json::to_value(payload)?))
    }

    /// Decode a text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::MalformedEnvelope)
    }

    /// Encode as a text frame
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of `remoteExitNode/register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    /// Version of this agent
    pub remote_exit_node_version: String,
}

/// Payload of `remoteExitNode/ping`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    /// Unix timestamp in seconds
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_field_names() {
        let message = ControlMessage::new(message_types::PING, json!({ "timestamp": 12 }));
        let text = message.encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "remoteExitNode/ping");
        assert_eq!(value["data"]["timestamp"], 12);
    }

    #[test]
    fn test_decode_without_data() {
        let message = ControlMessage::decode(r#"{"type":"remoteExitNode/traefik/reload"}"#).unwrap();
        assert_eq!(message.message_type, message_types::TRAEFIK_RELOAD);
        assert!(message.data.is_null());
    }

    #[test]
    fn test_decode_rejects_missing_type() {
        let err = ControlMessage::decode(r#"{"data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_register_payload_is_camel_case() {
        let payload = RegisterPayload {
            remote_exit_node_version: "1.2.3".to_string(),
        };
        let message = ControlMessage::with_payload(message_types::REGISTER, &payload).unwrap();
        assert_eq!(message.data, json!({ "remoteExitNodeVersion": "1.2.3" }));
    }
}
