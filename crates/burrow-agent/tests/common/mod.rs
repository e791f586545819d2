//! In-memory fakes shared by the integration suites

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use burrow_core::audit::AuditEvent;
use burrow_core::traits::{
    AccessTokenRequest, AccessTokenVerification, AuditSink, OrgAccessPolicyQuery,
    OrgAccessPolicyResult, RemoteVerificationGateway, ResourceSessionValidation, RoleResourceAccess,
    UserOrgRole, UserResourceAccess, UserSessionWithUser,
};
use burrow_core::types::{LoginPage, ResourceRule, ResourceWithAuth};
use burrow_core::GatewayError;

/// Gateway answering from scripted tables. Anything not scripted behaves
/// like a soft failure.
#[derive(Default)]
pub struct FakeGateway {
    pub resources: Mutex<HashMap<String, ResourceWithAuth>>,
    /// `None` simulates a failed rule listing
    pub rules: Mutex<Option<Vec<ResourceRule>>>,
    pub sessions: Mutex<HashMap<String, ResourceSessionValidation>>,
    pub access_tokens: Mutex<HashMap<String, AccessTokenVerification>>,
    pub user_sessions: Mutex<HashMap<String, UserSessionWithUser>>,
    pub org_policy: Mutex<Option<OrgAccessPolicyResult>>,
    pub org_roles: Mutex<HashMap<String, UserOrgRole>>,
    pub role_access: Mutex<Option<RoleResourceAccess>>,
    pub user_access: Mutex<Option<UserResourceAccess>>,
    pub login_page: Mutex<Option<LoginPage>>,
    pub asn: Mutex<Option<u32>>,
    pub retention_days: Mutex<u32>,
    pub retention_lookups: AtomicUsize,
}

impl FakeGateway {
    pub fn with_retention(days: u32) -> Self {
        let gateway = Self::default();
        *gateway.retention_days.lock().unwrap() = days;
        gateway
    }

    pub fn add_resource(&self, domain: &str, resource: ResourceWithAuth) {
        self.resources.lock().unwrap().insert(domain.to_string(), resource);
    }
}

#[async_trait]
impl RemoteVerificationGateway for FakeGateway {
    async fn get_resource_by_domain(&self, domain: &str) -> Option<ResourceWithAuth> {
        self.resources.lock().unwrap().get(domain).cloned()
    }

    async fn get_user_session_with_user(&self, user_session_id: &str) -> Option<UserSessionWithUser> {
        self.user_sessions.lock().unwrap().get(user_session_id).cloned()
    }

    async fn get_user_org_role(&self, user_id: &str, _org_id: &str) -> Option<UserOrgRole> {
        self.org_roles.lock().unwrap().get(user_id).cloned()
    }

    async fn check_org_access_policy(&self, _query: &OrgAccessPolicyQuery) -> Option<OrgAccessPolicyResult> {
        self.org_policy.lock().unwrap().clone()
    }

    async fn get_role_resource_access(&self, _resource_id: i64, _role_id: i64) -> Option<RoleResourceAccess> {
        self.role_access.lock().unwrap().clone()
    }

    async fn get_user_resource_access(&self, _user_id: &str, _resource_id: i64) -> Option<UserResourceAccess> {
        self.user_access.lock().unwrap().clone()
    }

    async fn get_resource_rules(&self, _resource_id: i64) -> Option<Vec<ResourceRule>> {
        self.rules.lock().unwrap().clone()
    }

    async fn get_org_login_page(&self, _org_id: Option<&str>) -> Option<LoginPage> {
        self.login_page.lock().unwrap().clone()
    }

    async fn validate_resource_session_token(&self, token: &str, _resource_id: i64) -> ResourceSessionValidation {
        self.sessions.lock().unwrap().get(token).cloned().unwrap_or_default()
    }

    async fn verify_resource_access_token(&self, request: &AccessTokenRequest) -> AccessTokenVerification {
        self.access_tokens
            .lock()
            .unwrap()
            .get(&request.access_token)
            .cloned()
            .unwrap_or_else(AccessTokenVerification::invalid)
    }

    async fn get_asn_for_ip(&self, _ip: &str) -> Option<u32> {
        *self.asn.lock().unwrap()
    }

    async fn get_retention_days(&self, _org_id: &str) -> u32 {
        self.retention_lookups.fetch_add(1, Ordering::SeqCst);
        *self.retention_days.lock().unwrap()
    }
}

/// Audit sink remembering every batch it was handed
#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<Vec<AuditEvent>>>,
    pub fail: AtomicBool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn send_batch(&self, events: &[AuditEvent]) -> Result<(), GatewayError> {
        self.batches.lock().unwrap().push(events.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                method: "POST".to_string(),
                url: "http://control-plane/api/v1/hybrid/logs/batch".to_string(),
                status: 503,
                status_text: Some("Service Unavailable".to_string()),
            });
        }
        Ok(())
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
