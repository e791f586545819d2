//! Domain types returned by the control plane
//!
//! Field names follow the control plane's camelCase JSON. Every struct
//! tolerates missing fields so that additive changes on the remote side do
//! not turn into decode failures (and therefore denials) here.

use serde::{Deserialize, Serialize};

/// A proxied resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resource {
    pub resource_id: i64,
    pub resource_guid: String,
    pub org_id: String,
    pub nice_id: String,
    pub name: String,
    pub subdomain: Option<String>,
    pub full_domain: Option<String>,
    pub domain_id: Option<String>,
    pub ssl: bool,
    /// Deny every request regardless of credentials
    pub block_access: bool,
    /// Platform (SSO) authentication enabled
    pub sso: bool,
    pub http: bool,
    pub protocol: String,
    pub proxy_port: Option<u16>,
    /// One-time email code authentication enabled
    pub email_whitelist_enabled: bool,
    /// Evaluate resource rules before authentication
    pub apply_rules: bool,
    pub enabled: bool,
    pub sticky_session: bool,
    pub tls_server_name: Option<String>,
    pub set_host_header: Option<String>,
    pub enable_proxy: Option<bool>,
    pub skip_to_idp_id: Option<i64>,
    pub headers: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourcePincode {
    pub pincode_id: i64,
    pub resource_id: i64,
    pub pincode_hash: String,
    pub digit_length: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourcePassword {
    pub password_id: i64,
    pub resource_id: i64,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceHeaderAuth {
    pub header_auth_id: i64,
    pub resource_id: i64,
    pub header_auth_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceHeaderAuthExtendedCompatibility {
    pub resource_id: i64,
    pub header_auth_extended_compatibility_id: i64,
    pub extended_compatibility_is_activated: bool,
}

/// An organization and its policy settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Org {
    pub name: String,
    pub org_id: String,
    pub subnet: Option<String>,
    pub utility_subnet: Option<String>,
    pub created_at: Option<String>,
    pub require_two_factor: Option<bool>,
    /// Maximum age of a resource session; `None` disables the check
    pub max_session_length_hours: Option<u32>,
    pub password_expiry_days: Option<u32>,
    pub settings_log_retention_days_request: u32,
    pub settings_log_retention_days_access: u32,
    pub settings_log_retention_days_action: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginPage {
    pub login_page_id: i64,
    pub subdomain: Option<String>,
    pub full_domain: Option<String>,
    pub exit_node_id: Option<i64>,
    pub domain_id: Option<String>,
}

/// What a matching rule does with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleAction {
    /// Allow without authentication
    Accept,
    /// Deny
    Drop,
    /// Skip to authentication
    Pass,
}

/// What a rule's value is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleMatch {
    /// Client IP inside a network
    Cidr,
    /// Request path matches a pattern
    Path,
    /// Client IP equals an address
    Ip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    #[serde(default)]
    pub rule_id: i64,
    #[serde(default)]
    pub resource_id: i64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Lower values are evaluated first
    pub priority: i32,
    pub action: RuleAction,
    #[serde(rename = "match")]
    pub match_type: RuleMatch,
    pub value: String,
}

fn enabled_by_default() -> bool {
    true
}

/// A resource together with its configured auth methods and owning org
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceWithAuth {
    pub resource: Option<Resource>,
    pub pincode: Option<ResourcePincode>,
    pub password: Option<ResourcePassword>,
    pub header_auth: Option<ResourceHeaderAuth>,
    pub header_auth_extended_compatibility: Option<ResourceHeaderAuthExtendedCompatibility>,
    pub org: Org,
}

impl ResourceWithAuth {
    /// Whether any authentication method protects the resource
    pub fn requires_auth(&self) -> bool {
        let sso = self.resource.as_ref().map(|r| r.sso).unwrap_or(false);
        let whitelist = self
            .resource
            .as_ref()
            .map(|r| r.email_whitelist_enabled)
            .unwrap_or(false);
        sso || whitelist || self.pincode.is_some() || self.password.is_some() || self.header_auth.is_some()
    }
}

/// A session on a single resource, created by the control plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceSession {
    pub session_id: String,
    pub resource_id: i64,
    /// Epoch milliseconds
    pub expires_at: i64,
    pub session_length: i64,
    /// Epoch milliseconds; `None` means the identity time is unknown
    pub issued_at: Option<i64>,
    pub do_not_extend: bool,
    pub is_request_token: bool,
    pub password_id: Option<i64>,
    pub pincode_id: Option<i64>,
    pub whitelist_id: Option<i64>,
    pub access_token_id: Option<String>,
    pub user_session_id: Option<String>,
}

impl ResourceSession {
    /// Whether the session is past its own expiry
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expires_at <= now_millis
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceAccessToken {
    pub access_token_id: String,
    pub org_id: String,
    /// Absent when the token is valid for every resource of the org
    pub resource_id: Option<i64>,
    pub token_hash: String,
    pub session_length: i64,
    /// Epoch milliseconds; `None` never expires
    pub expires_at: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: i64,
}

/// Settings the control plane shares with every node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub session_cookie_name: String,
    pub resource_access_token_param: String,
    pub resource_access_token_headers: AccessTokenHeaders,
    pub resource_session_request_param: String,
    pub require_email_verification: bool,
    pub resource_session_length_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessTokenHeaders {
    pub id: String,
    pub token: String,
}

impl Default for AccessTokenHeaders {
    fn default() -> Self {
        Self {
            id: "P-Access-Token-Id".to_string(),
            token: "P-Access-Token".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            session_cookie_name: "p_session_token".to_string(),
            resource_access_token_param: "p_token".to_string(),
            resource_access_token_headers: AccessTokenHeaders::default(),
            resource_session_request_param: "resource_session_request_param".to_string(),
            require_email_verification: false,
            resource_session_length_hours: 24,
        }
    }
}
