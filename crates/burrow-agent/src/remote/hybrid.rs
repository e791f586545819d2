//! HTTP implementation of the remote verification gateway

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use burrow_core::audit::{AuditBatch, AuditEvent};
use burrow_core::traits::{
    AccessTokenRequest, AccessTokenVerification, AuditSink, CredentialProvider,
    OrgAccessPolicyQuery, OrgAccessPolicyResult, RemoteVerificationGateway,
    ResourceSessionValidation, RoleResourceAccess, UserOrgRole, UserResourceAccess,
    UserSessionWithUser,
};
use burrow_core::types::{LoginPage, RemoteConfig, ResourceRule, ResourceWithAuth};
use burrow_core::GatewayError;

use super::http;

const HYBRID_PREFIX: &[&str] = &["api", "v1", "hybrid"];

#[derive(Deserialize)]
struct AsnResponse {
    asn: Option<u32>,
}

#[derive(Deserialize)]
struct RetentionResponse {
    days: u32,
}

#[derive(Serialize)]
struct ValidateSessionRequest<'a> {
    token: &'a str,
}

/// Response relayed verbatim by the forwarding endpoints
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Client for the control plane's `/api/v1/hybrid` API
pub struct HybridClient {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HybridClient {
    pub fn new(http: Client, base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// `<base>/api/v1/hybrid/<segments...>`, each segment percent-encoded
    pub fn hybrid_url(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| GatewayError::Transport {
            method: "-".to_string(),
            url: self.base_url.clone(),
            message: e.to_string(),
            code: Some("ERR_INVALID_URL".to_string()),
        })?;

        url.path_segments_mut()
            .map_err(|_| GatewayError::Transport {
                method: "-".to_string(),
                url: self.base_url.clone(),
                message: "endpoint cannot be a base URL".to_string(),
                code: Some("ERR_INVALID_URL".to_string()),
            })?
            .pop_if_empty()
            .extend(HYBRID_PREFIX)
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: Method, url: &Url, body: Option<&Value>) -> Result<reqwest::Response, GatewayError> {
        let token = self.credentials.token().await?;
        let headers = http::auth_headers(&token)?;

        let mut request = self.http.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| http::transport_error(&method, url.as_str(), &e))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<T, GatewayError> {
        let url = self.hybrid_url(segments)?;
        let response = self.send(method.clone(), &url, body).await?;
        let response = http::check_status(&method, url.as_str(), response)?;
        http::decode_envelope(&method, url.as_str(), response).await
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, GatewayError> {
        self.call(Method::GET, segments, None).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, segments: &[&str], body: &B) -> Result<T, GatewayError> {
        let body = serde_json::to_value(body).map_err(|e| GatewayError::Decode {
            method: Method::POST.to_string(),
            url: segments.join("/"),
            message: e.to_string(),
        })?;
        self.call(Method::POST, segments, Some(&body)).await
    }

    /// Log and swallow a failure
    fn soft<T>(context: &str, result: Result<T, GatewayError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                http::log_remote_failure(context, &e);
                None
            }
        }
    }

    /// Remote settings that shape cookie and token names
    pub async fn fetch_remote_config(&self) -> Result<RemoteConfig, GatewayError> {
        self.get(&["general-config"]).await
    }

    /// Current dynamic router configuration for the reverse proxy
    pub async fn fetch_proxy_config(&self) -> Result<String, GatewayError> {
        let data: Value = self.get(&["traefik-config"]).await?;
        Ok(match data {
            Value::String(text) => text,
            other => serde_json::to_string_pretty(&other).map_err(|e| GatewayError::Decode {
                method: Method::GET.to_string(),
                url: "traefik-config".to_string(),
                message: e.to_string(),
            })?,
        })
    }

    /// POST `body` to `<base>/api/v1/hybrid/<path>` and return whatever the control
    /// plane answered, error statuses included
    pub async fn forward(&self, path: &str, body: &Value) -> Result<ForwardedResponse, GatewayError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let url = self.hybrid_url(&segments)?;
        let response = self.send(Method::POST, &url, Some(body)).await?;
        let status = response.status();

        let text = response
            .text()
            .await
            .map_err(|e| http::transport_error(&Method::POST, url.as_str(), &e))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ForwardedResponse { status, body })
    }
}

#[async_trait]
impl RemoteVerificationGateway for HybridClient {
    async fn get_resource_by_domain(&self, domain: &str) -> Option<ResourceWithAuth> {
        let result = self.get::<Option<ResourceWithAuth>>(&["resource", "domain", domain]).await;
        Self::soft("Error fetching resource by domain", result).flatten()
    }

    async fn get_user_session_with_user(&self, user_session_id: &str) -> Option<UserSessionWithUser> {
        let result = self.get::<Option<UserSessionWithUser>>(&["session", user_session_id]).await;
        Self::soft("Error fetching user session", result).flatten()
    }

    async fn get_user_org_role(&self, user_id: &str, org_id: &str) -> Option<UserOrgRole> {
        let result = self
            .get::<Option<UserOrgRole>>(&["user", user_id, "org", org_id, "role"])
            .await;
        Self::soft("Error fetching user org role", result).flatten()
    }

    async fn check_org_access_policy(&self, query: &OrgAccessPolicyQuery) -> Option<OrgAccessPolicyResult> {
        let result = self
            .get::<Option<OrgAccessPolicyResult>>(&[
                "user",
                &query.user_id,
                "org",
                &query.org_id,
                "session",
                &query.session_id,
                "verify",
            ])
            .await;
        Self::soft("Error checking org access policy", result).flatten()
    }

    async fn get_role_resource_access(&self, resource_id: i64, role_id: i64) -> Option<RoleResourceAccess> {
        let role_id = role_id.to_string();
        let resource_id = resource_id.to_string();
        let result = self
            .get::<Option<RoleResourceAccess>>(&["role", &role_id, "resource", &resource_id, "access"])
            .await;
        Self::soft("Error fetching role resource access", result).flatten()
    }

    async fn get_user_resource_access(&self, user_id: &str, resource_id: i64) -> Option<UserResourceAccess> {
        let resource_id = resource_id.to_string();
        let result = self
            .get::<Option<UserResourceAccess>>(&["user", user_id, "resource", &resource_id, "access"])
            .await;
        Self::soft("Error fetching user resource access", result).flatten()
    }

    async fn get_resource_rules(&self, resource_id: i64) -> Option<Vec<ResourceRule>> {
        let resource_id = resource_id.to_string();
        let result = self
            .get::<Option<Vec<ResourceRule>>>(&["resource", &resource_id, "rules"])
            .await
            .map(Option::unwrap_or_default);
        Self::soft("Error fetching resource rules", result)
    }

    async fn get_org_login_page(&self, org_id: Option<&str>) -> Option<LoginPage> {
        let org_id = org_id?;
        let result = self.get::<Option<LoginPage>>(&["org", org_id, "login-page"]).await;
        Self::soft("Error fetching org login page", result).flatten()
    }

    async fn validate_resource_session_token(&self, token: &str, resource_id: i64) -> ResourceSessionValidation {
        let resource_id = resource_id.to_string();
        let result = self
            .post::<ResourceSessionValidation, _>(
                &["resource", &resource_id, "session", "validate"],
                &ValidateSessionRequest { token },
            )
            .await;
        Self::soft("Error validating resource session token", result).unwrap_or_default()
    }

    async fn verify_resource_access_token(&self, request: &AccessTokenRequest) -> AccessTokenVerification {
        let result = self
            .post::<AccessTokenVerification, _>(&["resource", "access-token", "verify"], request)
            .await;
        Self::soft("Error verifying resource access token", result).unwrap_or_else(AccessTokenVerification::invalid)
    }

    async fn get_asn_for_ip(&self, ip: &str) -> Option<u32> {
        let result = self.get::<AsnResponse>(&["asnip", ip]).await;
        Self::soft("Error fetching ASN for ip", result).and_then(|r| r.asn)
    }

    async fn get_retention_days(&self, org_id: &str) -> u32 {
        let result = self.get::<RetentionResponse>(&["org", org_id, "get-retention-days"]).await;
        Self::soft("Error fetching retention days", result).map_or(0, |r| r.days)
    }
}

#[async_trait]
impl AuditSink for HybridClient {
    async fn send_batch(&self, events: &[AuditEvent]) -> Result<(), GatewayError> {
        let url = self.hybrid_url(&["logs", "batch"])?;
        let body = serde_json::to_value(AuditBatch { logs: events }).map_err(|e| GatewayError::Decode {
            method: Method::POST.to_string(),
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let response = self.send(Method::POST, &url, Some(&body)).await?;
        http::check_status(&Method::POST, url.as_str(), response)?;
        Ok(())
    }
}
