//! Session verification for the reverse-proxy plugin
//!
//! The plugin asks, for every proxied request, whether it may pass. The
//! answer comes from the resource's rules, its auth methods and the session
//! cookies the browser sent. Every lookup goes through the remote gateway;
//! a failed lookup on a security check counts as a denial.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;

use burrow_core::audit::{AccessDecision, AuditReason, RequestContext, UserActor};
use burrow_core::audit::normalize_client_ip;
use burrow_core::cookie::{clear_session_cookie, parse_session_cookie_name};
use burrow_core::policy::enforce_resource_session_length_at;
use burrow_core::rules::{evaluate_rules, RuleOutcome};
use burrow_core::time::current_time_millis;
use burrow_core::traits::{AccessTokenRequest, OrgAccessPolicyQuery, RemoteVerificationGateway};
use burrow_core::types::{RemoteConfig, Resource, ResourceSession, ResourceWithAuth};

use crate::audit::AuditBatcher;

/// Request body sent by the reverse-proxy plugin
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifyRequest {
    pub sessions: HashMap<String, String>,
    #[serde(rename = "originalRequestURL")]
    pub original_request_url: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub method: String,
    pub tls: bool,
    pub request_ip: Option<String>,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

impl VerifyRequest {
    fn context(&self) -> RequestContext {
        RequestContext {
            path: self.path.clone(),
            original_request_url: self.original_request_url.clone(),
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            method: self.method.clone(),
            tls: self.tls,
            request_ip: self.request_ip.clone(),
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// `data` part of the verification response
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyData {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub response_headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyResponse {
    pub data: VerifyData,
    pub success: bool,
    pub error: bool,
    pub message: String,
    pub status: u16,
}

impl From<VerifyData> for VerifyResponse {
    fn from(data: VerifyData) -> Self {
        let message = if data.valid { "Access allowed" } else { "Access denied" };
        Self {
            data,
            success: true,
            error: false,
            message: message.to_string(),
            status: 200,
        }
    }
}

/// A verification outcome together with the record to audit
#[derive(Debug, Clone)]
pub struct Verdict {
    pub data: VerifyData,
    pub decision: AccessDecision,
}

impl Verdict {
    fn new(reason: AuditReason, resource: Option<&ResourceWithAuth>) -> Self {
        let mut decision = AccessDecision::new(reason);
        if let Some(found) = resource {
            decision.resource_id = found.resource.as_ref().map(|r| r.resource_id);
            decision.org_id = Some(found.org.org_id.clone()).filter(|id| !id.is_empty());
        }

        Self {
            data: VerifyData {
                valid: reason.is_allow(),
                ..Default::default()
            },
            decision,
        }
    }
}

/// Settings the verifier needs besides the gateway
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub remote: RemoteConfig,
    /// Base URL of the login UI
    pub redirect_endpoint: String,
    pub log_failed_attempts: bool,
}

pub struct SessionVerifier {
    gateway: Arc<dyn RemoteVerificationGateway>,
    audit: AuditBatcher,
    settings: VerifierSettings,
}

impl SessionVerifier {
    pub fn new(gateway: Arc<dyn RemoteVerificationGateway>, audit: AuditBatcher, settings: VerifierSettings) -> Self {
        Self {
            gateway,
            audit,
            settings,
        }
    }

    /// Decide and record the decision in the background
    pub async fn verify(&self, request: VerifyRequest) -> VerifyResponse {
        let verdict = self.decide(&request).await;

        if !verdict.data.valid && self.settings.log_failed_attempts {
            tracing::info!(
                "Denied {} {}{} from {} ({})",
                request.method,
                request.host,
                request.path,
                request.request_ip.as_deref().unwrap_or("-"),
                verdict.decision.reason.code()
            );
        }

        let gateway = Arc::clone(&self.gateway);
        let audit = self.audit.clone();
        let context = request.context();
        let mut decision = verdict.decision.clone();
        tokio::spawn(async move {
            if let Some(ip) = context.request_ip.as_deref().map(normalize_client_ip) {
                if let Some(asn) = gateway.get_asn_for_ip(&ip).await {
                    decision.metadata = Some(json!({ "asn": asn }));
                }
            }
            audit.record(&decision, &context).await;
        });

        verdict.data.into()
    }

    /// Run the decision path without recording anything
    pub async fn decide(&self, request: &VerifyRequest) -> Verdict {
        let host = strip_port(&request.host);

        let found = match self.gateway.get_resource_by_domain(host).await {
            Some(found) if found.resource.is_some() => found,
            _ => {
                tracing::debug!("No resource for host {}", host);
                return Verdict::new(AuditReason::ResourceNotFound, None);
            }
        };
        let Some(resource) = found.resource.as_ref() else {
            return Verdict::new(AuditReason::ResourceNotFound, None);
        };

        if resource.block_access {
            return Verdict::new(AuditReason::ResourceBlocked, Some(&found));
        }

        let client_ip = request.request_ip.as_deref().map(normalize_client_ip);

        if resource.apply_rules {
            let Some(rules) = self.gateway.get_resource_rules(resource.resource_id).await else {
                tracing::warn!("Could not load rules for resource {}, denying", resource.resource_id);
                return Verdict::new(AuditReason::DroppedByRule, Some(&found));
            };

            match evaluate_rules(&rules, client_ip.as_deref(), &request.path) {
                RuleOutcome::Accept => return Verdict::new(AuditReason::AllowedByRule, Some(&found)),
                RuleOutcome::Drop => return Verdict::new(AuditReason::DroppedByRule, Some(&found)),
                RuleOutcome::NoMatch => {}
            }
        }

        if !found.requires_auth() {
            return Verdict::new(AuditReason::AllowedNoAuth, Some(&found));
        }

        if let Some(verdict) = self.check_access_token(request, &found, resource).await {
            return verdict;
        }

        let mut clear_cookie = None;
        let mut saw_session = false;
        let now = current_time_millis();

        // Newest cookie first; unstamped names last, then by name
        let mut candidates: Vec<(Option<i64>, &String, &String)> = request
            .sessions
            .iter()
            .filter_map(|(name, token)| {
                parse_session_cookie_name(name, &self.settings.remote.session_cookie_name)
                    .map(|parsed| (parsed.created_at, name, token))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

        for (_, name, token) in candidates {
            saw_session = true;

            let validation = self
                .gateway
                .validate_resource_session_token(token, resource.resource_id)
                .await;
            let Some(session) = validation.resource_session else {
                continue;
            };
            if session.is_expired_at(now) {
                continue;
            }

            let verdict = enforce_resource_session_length_at(&session, &found.org, now);
            if !verdict.is_valid() {
                tracing::debug!(
                    "Session {} rejected: {}",
                    session.session_id,
                    verdict.reason().unwrap_or_default()
                );
                if clear_cookie.is_none() {
                    clear_cookie = Some(clear_session_cookie(name, cookie_domain(resource, host), !request.tls));
                }
                continue;
            }

            if let Some(verdict) = self.check_session(&session, &found, resource).await {
                return verdict;
            }
        }

        let reason = if saw_session {
            AuditReason::NoMoreAuthMethods
        } else {
            AuditReason::NoSessions
        };
        let mut verdict = Verdict::new(reason, Some(&found));
        verdict.data.redirect_url = self.redirect_url(&found, resource, request).await;
        if let Some(cookie) = clear_cookie {
            verdict.data.response_headers.insert("Set-Cookie".to_string(), cookie);
        }
        verdict
    }

    async fn check_access_token(
        &self,
        request: &VerifyRequest,
        found: &ResourceWithAuth,
        resource: &Resource,
    ) -> Option<Verdict> {
        let remote = &self.settings.remote;

        let (access_token_id, access_token) = match request.query.get(&remote.resource_access_token_param) {
            // query form is `<tokenId>.<token>`
            Some(value) => match value.split_once('.') {
                Some((id, token)) => (Some(id.to_string()), token.to_string()),
                None => (None, value.clone()),
            },
            None => {
                let token = request.header(&remote.resource_access_token_headers.token)?;
                let id = request.header(&remote.resource_access_token_headers.id);
                (id.map(str::to_string), token.to_string())
            }
        };

        let verification = self
            .gateway
            .verify_resource_access_token(&AccessTokenRequest {
                access_token,
                access_token_id,
                resource_id: Some(resource.resource_id),
            })
            .await;

        if !verification.valid {
            tracing::debug!(
                "Access token rejected: {}",
                verification.error.as_deref().unwrap_or("invalid")
            );
            return None;
        }

        Some(Verdict::new(AuditReason::ValidAccessToken, Some(found)))
    }

    async fn check_session(
        &self,
        session: &ResourceSession,
        found: &ResourceWithAuth,
        resource: &Resource,
    ) -> Option<Verdict> {
        if session.is_request_token {
            return Some(Verdict::new(AuditReason::TemporaryRequestToken, Some(found)));
        }

        if found.pincode.is_some() && session.pincode_id.is_some() {
            return Some(Verdict::new(AuditReason::ValidPincode, Some(found)));
        }
        if found.password.is_some() && session.password_id.is_some() {
            return Some(Verdict::new(AuditReason::ValidPassword, Some(found)));
        }
        if resource.email_whitelist_enabled && session.whitelist_id.is_some() {
            return Some(Verdict::new(AuditReason::ValidEmail, Some(found)));
        }
        if session.access_token_id.is_some() {
            return Some(Verdict::new(AuditReason::ValidAccessToken, Some(found)));
        }

        let user_session_id = session.user_session_id.as_deref()?;
        if !resource.sso {
            return None;
        }
        self.check_sso(user_session_id, found, resource).await
    }

    async fn check_sso(&self, user_session_id: &str, found: &ResourceWithAuth, resource: &Resource) -> Option<Verdict> {
        let user_session = self.gateway.get_user_session_with_user(user_session_id).await?;
        let user = &user_session.user;
        let org_id = found.org.org_id.as_str();

        let policy = self
            .gateway
            .check_org_access_policy(&OrgAccessPolicyQuery {
                org_id: org_id.to_string(),
                user_id: user.user_id.clone(),
                session_id: user_session.session.session_id.clone(),
            })
            .await?;
        if !policy.allowed {
            tracing::debug!(
                "Org access policy denied user {}: {}",
                user.user_id,
                policy.error.as_deref().unwrap_or("not allowed")
            );
            return None;
        }

        let mut has_access = false;
        if let Some(role) = self.gateway.get_user_org_role(&user.user_id, org_id).await {
            has_access = self
                .gateway
                .get_role_resource_access(resource.resource_id, role.role_id)
                .await
                .is_some();
        }
        if !has_access {
            has_access = self
                .gateway
                .get_user_resource_access(&user.user_id, resource.resource_id)
                .await
                .is_some();
        }
        if !has_access {
            return None;
        }

        let mut verdict = Verdict::new(AuditReason::ValidSso, Some(found));
        verdict.decision.user = Some(UserActor {
            username: user.username.clone(),
            user_id: user.user_id.clone(),
        });
        verdict.data.username = Some(user.username.clone());
        verdict.data.email = user.email.clone();
        Some(verdict)
    }

    /// Login URL for the resource, via the org's own login page when it has one
    async fn redirect_url(&self, found: &ResourceWithAuth, resource: &Resource, request: &VerifyRequest) -> Option<String> {
        let org_id = Some(found.org.org_id.as_str()).filter(|id| !id.is_empty());
        let base = match self.gateway.get_org_login_page(org_id).await {
            Some(page) => match page.full_domain {
                Some(domain) => format!("https://{}", domain),
                None => self.settings.redirect_endpoint.clone(),
            },
            None => self.settings.redirect_endpoint.clone(),
        };

        let mut url = Url::parse(base.trim_end_matches('/')).ok()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["auth", "resource", resource.resource_guid.as_str()]);
        url.query_pairs_mut()
            .append_pair("redirect", &request.original_request_url);
        Some(url.to_string())
    }
}

/// Host without its port; bracketed IPv6 literals keep their brackets
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.split_once(':') {
        Some((name, _)) => name,
        None => host,
    }
}

fn cookie_domain<'a>(resource: &'a Resource, host: &'a str) -> &'a str {
    resource.full_domain.as_deref().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("app.example.com:443"), "app.example.com");
        assert_eq!(strip_port("app.example.com"), "app.example.com");
        assert_eq!(strip_port("[::1]:8443"), "[::1]");
    }

    #[test]
    fn test_response_envelope() {
        let response: VerifyResponse = VerifyData {
            valid: false,
            redirect_url: Some("https://login.example.com/auth/resource/g".to_string()),
            ..Default::default()
        }
        .into();
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["data"]["valid"], false);
        assert_eq!(value["data"]["redirectUrl"], "https://login.example.com/auth/resource/g");
        assert!(value["data"].get("responseHeaders").is_none());
        assert_eq!(value["message"], "Access denied");
        assert_eq!(value["status"], 200);
    }

    #[test]
    fn test_request_field_names() {
        let request: VerifyRequest = serde_json::from_value(json!({
            "sessions": { "p_session_token_s.1": "abc" },
            "originalRequestURL": "https://app.example.com/x",
            "scheme": "https",
            "host": "app.example.com",
            "path": "/x",
            "method": "GET",
            "tls": true,
            "requestIp": "203.0.113.5:9000",
            "headers": { "p-access-token": "t" }
        }))
        .unwrap();
        assert_eq!(request.original_request_url, "https://app.example.com/x");
        assert_eq!(request.header("P-Access-Token"), Some("t"));
        assert!(request.query.is_empty());
    }
}
