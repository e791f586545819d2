//! Exit-node commands decoded from inbound control messages

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::message::{message_types, ControlMessage};

/// Payload of `remoteExitNode/peers/add`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAdd {
    /// WireGuard public key of the peer
    pub public_key: String,
    /// Allowed IPs; absent or null means none
    #[serde(default, deserialize_with = "null_as_empty")]
    pub allowed_ips: Vec<String>,
}

/// Payload of `remoteExitNode/peers/remove`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRemove {
    /// WireGuard public key of the peer
    pub public_key: String,
}

/// A decoded instruction for the local exit node or reverse proxy
#[derive(Debug, Clone, PartialEq)]
pub enum ExitNodeCommand {
    /// Add (or re-add) a peer
    PeerAdd(PeerAdd),
    /// Remove a peer
    PeerRemove(PeerRemove),
    /// Replace the proxy mapping; payload is passed through untouched
    UpdateProxyMapping(Value),
    /// Replace the destinations; payload is passed through untouched
    UpdateDestinations(Value),
    /// Regenerate the reverse-proxy configuration
    ProxyReload,
}

impl ExitNodeCommand {
    /// Decode a command from an inbound control message
    pub fn from_message(message: &ControlMessage) -> Result<Self, ProtocolError> {
        let invalid = |source| ProtocolError::InvalidPayload {
            message_type: message.message_type.clone(),
            source,
        };

        match message.message_type.as_str() {
            message_types::PEERS_ADD => serde_json::from_value(message.data.clone())
                .map(Self::PeerAdd)
                .map_err(invalid),
            message_types::PEERS_REMOVE => serde_json::from_value(message.data.clone())
                .map(Self::PeerRemove)
                .map_err(invalid),
            message_types::UPDATE_PROXY_MAPPING => {
                Ok(Self::UpdateProxyMapping(message.data.clone()))
            }
            message_types::UPDATE_DESTINATIONS => {
                Ok(Self::UpdateDestinations(message.data.clone()))
            }
            message_types::TRAEFIK_RELOAD => Ok(Self::ProxyReload),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }

    /// The message type this command was decoded from
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::PeerAdd(_) => message_types::PEERS_ADD,
            Self::PeerRemove(_) => message_types::PEERS_REMOVE,
            Self::UpdateProxyMapping(_) => message_types::UPDATE_PROXY_MAPPING,
            Self::UpdateDestinations(_) => message_types::UPDATE_DESTINATIONS,
            Self::ProxyReload => message_types::TRAEFIK_RELOAD,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_peer_add_defaults_allowed_ips() {
        let message = ControlMessage::new(message_types::PEERS_ADD, json!({ "publicKey": "abc" }));
        let command = ExitNodeCommand::from_message(&message).unwrap();
        assert_eq!(
            command,
            ExitNodeCommand::PeerAdd(PeerAdd {
                public_key: "abc".to_string(),
                allowed_ips: vec![],
            })
        );
    }

    #[test]
    fn test_peer_add_null_allowed_ips() {
        let message = ControlMessage::new(
            message_types::PEERS_ADD,
            json!({ "publicKey": "abc", "allowedIps": null }),
        );
        match ExitNodeCommand::from_message(&message).unwrap() {
            ExitNodeCommand::PeerAdd(add) => assert!(add.allowed_ips.is_empty()),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_peer_remove_requires_key() {
        let message = ControlMessage::new(message_types::PEERS_REMOVE, json!({}));
        let err = ExitNodeCommand::from_message(&message).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn test_mapping_payload_passes_through() {
        let payload = json!({ "mappings": [{ "destinationIp": "10.0.0.2" }] });
        let message = ControlMessage::new(message_types::UPDATE_PROXY_MAPPING, payload.clone());
        assert_eq!(
            ExitNodeCommand::from_message(&message).unwrap(),
            ExitNodeCommand::UpdateProxyMapping(payload)
        );
    }

    #[test]
    fn test_unknown_type() {
        let message = ControlMessage::new("remoteExitNode/unknown", Value::Null);
        assert!(matches!(
            ExitNodeCommand::from_message(&message),
            Err(ProtocolError::UnknownMessageType(_))
        ));
    }

    #[test]
    fn test_message_type_matches_inbound_set() {
        for message_type in message_types::INBOUND {
            let data = json!({ "publicKey": "k" });
            let command =
                ExitNodeCommand::from_message(&ControlMessage::new(message_type, data)).unwrap();
            assert_eq!(command.message_type(), message_type);
        }
    }
}
