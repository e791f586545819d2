//! Remote verification trait
//!
//! Every decision the agent cannot make locally is delegated to the control
//! plane through [`RemoteVerificationGateway`]. Operations never return an
//! error: a failed call yields `None`, an empty value or an invalid result,
//! and the implementation logs the failure. Security checks treat those
//! sentinels as deny; enrichment lookups treat them as unknown.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{LoginPage, Resource, ResourceAccessToken, ResourceRule, ResourceSession, ResourceWithAuth};

/// Platform login session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSession {
    #[serde(alias = "id")]
    pub session_id: String,
    pub user_id: String,
    /// Unix milliseconds
    pub expires_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSessionWithUser {
    pub session: UserSession,
    pub user: User,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserOrgRole {
    pub user_id: String,
    pub org_id: String,
    pub role_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgAccessPolicyQuery {
    pub org_id: String,
    pub user_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrgAccessPolicyResult {
    pub allowed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleResourceAccess {
    pub role_id: i64,
    pub resource_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserResourceAccess {
    pub user_id: String,
    pub resource_id: i64,
}

/// Outcome of validating a resource session token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceSessionValidation {
    /// `None` when the token is unknown, expired or could not be checked
    pub resource_session: Option<ResourceSession>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenRequest {
    pub access_token: String,
    pub access_token_id: Option<String>,
    /// Unset means the token is not bound to a resource
    pub resource_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessTokenVerification {
    pub valid: bool,
    pub error: Option<String>,
    pub token_item: Option<ResourceAccessToken>,
    pub resource: Option<Resource>,
}

impl AccessTokenVerification {
    /// Result used when verification could not be performed
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// Capability interface over the control plane's verification API
#[async_trait]
pub trait RemoteVerificationGateway: Send + Sync {
    /// Resource serving `domain`, with its auth methods and org
    async fn get_resource_by_domain(&self, domain: &str) -> Option<ResourceWithAuth>;

    /// Platform session and its user
    async fn get_user_session_with_user(&self, user_session_id: &str) -> Option<UserSessionWithUser>;

    /// The user's role inside an org
    async fn get_user_org_role(&self, user_id: &str, org_id: &str) -> Option<UserOrgRole>;

    /// Whether the session satisfies the org's access policy
    async fn check_org_access_policy(&self, query: &OrgAccessPolicyQuery) -> Option<OrgAccessPolicyResult>;

    /// Role-level grant on a resource
    async fn get_role_resource_access(&self, resource_id: i64, role_id: i64) -> Option<RoleResourceAccess>;

    /// User-level grant on a resource
    async fn get_user_resource_access(&self, user_id: &str, resource_id: i64) -> Option<UserResourceAccess>;

    /// Rules of a resource; `None` means the list could not be fetched
    async fn get_resource_rules(&self, resource_id: i64) -> Option<Vec<ResourceRule>>;

    /// Custom login page of an org, if any
    async fn get_org_login_page(&self, org_id: Option<&str>) -> Option<LoginPage>;

    async fn validate_resource_session_token(&self, token: &str, resource_id: i64) -> ResourceSessionValidation;

    async fn verify_resource_access_token(&self, request: &AccessTokenRequest) -> AccessTokenVerification;

    /// Autonomous system number for an address
    async fn get_asn_for_ip(&self, ip: &str) -> Option<u32>;

    /// Access log retention for an org. 0 disables logging and is also
    /// returned when the lookup fails.
    async fn get_retention_days(&self, org_id: &str) -> u32;
}
