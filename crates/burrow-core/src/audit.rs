//! Audit record model
//!
//! Every access decision the agent makes becomes an [`AuditEvent`]. Events
//! are shipped to the control plane in batches as `{"logs": [...]}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a request was allowed (1xx) or denied (2xx)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum AuditReason {
    AllowedByRule,
    AllowedNoAuth,
    ValidAccessToken,
    ValidHeaderAuth,
    ValidPincode,
    ValidPassword,
    ValidEmail,
    ValidSso,
    ResourceNotFound,
    ResourceBlocked,
    DroppedByRule,
    NoSessions,
    TemporaryRequestToken,
    NoMoreAuthMethods,
}

impl AuditReason {
    /// Numeric code on the wire
    pub fn code(self) -> u16 {
        match self {
            Self::AllowedByRule => 100,
            Self::AllowedNoAuth => 101,
            Self::ValidAccessToken => 102,
            Self::ValidHeaderAuth => 103,
            Self::ValidPincode => 104,
            Self::ValidPassword => 105,
            Self::ValidEmail => 106,
            Self::ValidSso => 107,
            Self::ResourceNotFound => 201,
            Self::ResourceBlocked => 202,
            Self::DroppedByRule => 203,
            Self::NoSessions => 204,
            Self::TemporaryRequestToken => 205,
            Self::NoMoreAuthMethods => 299,
        }
    }

    /// Whether this reason describes an allowed request
    pub fn is_allow(self) -> bool {
        self.code() < 200
    }
}

impl From<AuditReason> for u16 {
    fn from(reason: AuditReason) -> Self {
        reason.code()
    }
}

impl TryFrom<u16> for AuditReason {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            100 => Self::AllowedByRule,
            101 => Self::AllowedNoAuth,
            102 => Self::ValidAccessToken,
            103 => Self::ValidHeaderAuth,
            104 => Self::ValidPincode,
            105 => Self::ValidPassword,
            106 => Self::ValidEmail,
            107 => Self::ValidSso,
            201 => Self::ResourceNotFound,
            202 => Self::ResourceBlocked,
            203 => Self::DroppedByRule,
            204 => Self::NoSessions,
            205 => Self::TemporaryRequestToken,
            299 => Self::NoMoreAuthMethods,
            other => return Err(format!("unknown audit reason {}", other)),
        })
    }
}

/// Platform user behind a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActor {
    pub username: String,
    pub user_id: String,
}

/// API key behind a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyActor {
    pub name: Option<String>,
    pub api_key_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActorType {
    User,
    ApiKey,
}

/// The access decision being recorded
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecision {
    /// `true` = allowed
    pub action: bool,
    pub reason: AuditReason,
    pub resource_id: Option<i64>,
    pub org_id: Option<String>,
    pub location: Option<String>,
    pub user: Option<UserActor>,
    pub api_key: Option<ApiKeyActor>,
    pub metadata: Option<Value>,
}

impl AccessDecision {
    /// A decision with only the outcome filled in
    pub fn new(reason: AuditReason) -> Self {
        Self {
            action: reason.is_allow(),
            reason,
            resource_id: None,
            org_id: None,
            location: None,
            user: None,
            api_key: None,
            metadata: None,
        }
    }
}

/// The request the decision was made for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub path: String,
    pub original_request_url: String,
    pub scheme: String,
    pub host: String,
    pub method: String,
    pub tls: bool,
    /// Raw client address as seen by the reverse proxy, often `ip:port`
    pub request_ip: Option<String>,
}

/// One audit record as shipped to the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Unix seconds
    pub timestamp: u64,
    pub org_id: Option<String>,
    pub actor_type: Option<ActorType>,
    pub actor: Option<String>,
    pub actor_id: Option<String>,
    /// JSON-encoded metadata
    pub metadata: Option<String>,
    pub action: bool,
    pub resource_id: Option<i64>,
    pub reason: AuditReason,
    pub location: Option<String>,
    #[serde(rename = "originalRequestURL")]
    pub original_request_url: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub method: String,
    pub ip: Option<String>,
    pub tls: bool,
}

impl AuditEvent {
    /// Build the record for a decision.
    ///
    /// An API key actor wins over a user actor when both are present.
    pub fn from_decision(decision: &AccessDecision, request: &RequestContext, timestamp: u64) -> Self {
        let (actor_type, actor, actor_id) = match (&decision.api_key, &decision.user) {
            (Some(key), _) => (
                Some(ActorType::ApiKey),
                Some(key.name.clone().unwrap_or_else(|| key.api_key_id.clone())),
                Some(key.api_key_id.clone()),
            ),
            (None, Some(user)) => (
                Some(ActorType::User),
                Some(user.username.clone()),
                Some(user.user_id.clone()),
            ),
            (None, None) => (None, None, None),
        };

        Self {
            timestamp,
            org_id: decision.org_id.clone(),
            actor_type,
            actor,
            actor_id,
            metadata: decision.metadata.as_ref().map(Value::to_string),
            action: decision.action,
            resource_id: decision.resource_id,
            reason: decision.reason,
            location: decision.location.clone(),
            original_request_url: request.original_request_url.clone(),
            scheme: request.scheme.clone(),
            host: request.host.clone(),
            path: request.path.clone(),
            method: request.method.clone(),
            ip: request.request_ip.as_deref().map(normalize_client_ip),
            tls: request.tls,
        }
    }
}

/// Batch body posted to the control plane
#[derive(Debug, Serialize)]
pub struct AuditBatch<'a> {
    pub logs: &'a [AuditEvent],
}

/// Strip the port from a client address.
///
/// `[addr]:port` yields `addr`; otherwise everything after the last colon
/// is dropped; an address without a colon is returned unchanged.
pub fn normalize_client_ip(raw: &str) -> String {
    if raw.starts_with('[') {
        if let Some(end) = raw.find(']') {
            return raw[1..end].to_string();
        }
    }

    match raw.rfind(':') {
        Some(idx) => raw[..idx].to_string(),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> RequestContext {
        RequestContext {
            path: "/admin".to_string(),
            original_request_url: "https://app.example.com/admin".to_string(),
            scheme: "https".to_string(),
            host: "app.example.com".to_string(),
            method: "GET".to_string(),
            tls: true,
            request_ip: Some("203.0.113.5:9000".to_string()),
        }
    }

    #[test]
    fn test_normalize_client_ip() {
        assert_eq!(normalize_client_ip("[::1]:54321"), "::1");
        assert_eq!(normalize_client_ip("203.0.113.5:9000"), "203.0.113.5");
        assert_eq!(normalize_client_ip("203.0.113.5"), "203.0.113.5");
        assert_eq!(normalize_client_ip("[2001:db8::1]"), "2001:db8::1");
    }

    #[test]
    fn test_api_key_actor_wins() {
        let mut decision = AccessDecision::new(AuditReason::ValidAccessToken);
        decision.user = Some(UserActor {
            username: "alice".to_string(),
            user_id: "u1".to_string(),
        });
        decision.api_key = Some(ApiKeyActor {
            name: None,
            api_key_id: "key-7".to_string(),
        });

        let event = AuditEvent::from_decision(&decision, &request(), 10);
        assert_eq!(event.actor_type, Some(ActorType::ApiKey));
        assert_eq!(event.actor.as_deref(), Some("key-7"));
        assert_eq!(event.actor_id.as_deref(), Some("key-7"));
    }

    #[test]
    fn test_no_actor() {
        let event = AuditEvent::from_decision(&AccessDecision::new(AuditReason::NoSessions), &request(), 10);
        assert_eq!(event.actor_type, None);
        assert_eq!(event.actor, None);
        assert!(!event.action);
        assert_eq!(event.ip.as_deref(), Some("203.0.113.5"));
    }

    #[test]
    fn test_wire_shape() {
        let mut decision = AccessDecision::new(AuditReason::ValidSso);
        decision.org_id = Some("org-1".to_string());
        decision.user = Some(UserActor {
            username: "alice".to_string(),
            user_id: "u1".to_string(),
        });
        decision.metadata = Some(json!({ "asn": 64500 }));
        let event = AuditEvent::from_decision(&decision, &request(), 1_700_000_000);

        let value = serde_json::to_value(AuditBatch { logs: &[event] }).unwrap();
        let log = &value["logs"][0];
        assert_eq!(log["reason"], 107);
        assert_eq!(log["actorType"], "user");
        assert_eq!(log["originalRequestURL"], "https://app.example.com/admin");
        assert_eq!(log["metadata"], "{\"asn\":64500}");
        assert_eq!(log["action"], true);
    }

    #[test]
    fn test_reason_codes() {
        assert!(AuditReason::AllowedByRule.is_allow());
        assert!(!AuditReason::NoMoreAuthMethods.is_allow());
        assert_eq!(AuditReason::try_from(203).unwrap(), AuditReason::DroppedByRule);
        assert!(AuditReason::try_from(42).is_err());
    }
}
