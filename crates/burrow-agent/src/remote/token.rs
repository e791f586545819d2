//! Bearer token cache for control plane calls

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use burrow_core::config::ManagedSection;
use burrow_core::traits::CredentialProvider;
use burrow_core::GatewayError;

use super::http::{self, CSRF_HEADER, CSRF_VALUE};

const TOKEN_PATH: &str = "/api/v1/auth/remoteExitNode/get-token";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    remote_exit_node_id: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// Exchanges the node id and secret for a bearer token and keeps it fresh.
///
/// Reads go through an `RwLock`, so any number of requests can pick up the
/// current token while a refresh is pending.
pub struct TokenManager {
    http: Client,
    url: String,
    id: String,
    secret: String,
    refresh_interval: Duration,
    token: RwLock<Option<String>>,
}

impl TokenManager {
    pub fn new(http: Client, managed: &ManagedSection) -> Result<Self, GatewayError> {
        let id = managed
            .id
            .clone()
            .ok_or_else(|| GatewayError::Credentials("managed.id is not configured".to_string()))?;
        let secret = managed
            .secret
            .clone()
            .ok_or_else(|| GatewayError::Credentials("managed.secret is not configured".to_string()))?;

        Ok(Self {
            http,
            url: format!("{}{}", managed.base_url(), TOKEN_PATH),
            id,
            secret,
            refresh_interval: managed.token_refresh_interval,
            token: RwLock::new(None),
        })
    }

    /// Fetch the first token and keep refreshing it until `cancel` fires.
    ///
    /// A failed first fetch is logged and left to the next
    /// [`CredentialProvider::token`] call, which fetches on demand while the
    /// cache is empty.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        match self.refresh().await {
            Ok(_) => tracing::info!("Obtained control plane token"),
            Err(e) => http::log_remote_failure("Failed to obtain control plane token, retrying on demand", &e),
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(manager.refresh_interval) => {}
                }

                match manager.refresh().await {
                    Ok(_) => tracing::debug!("Refreshed control plane token"),
                    Err(e) => http::log_remote_failure("Failed to refresh control plane token", &e),
                }
            }
        })
    }

    /// Request a new token and cache it
    pub async fn refresh(&self) -> Result<String, GatewayError> {
        let method = Method::POST;
        let response = self
            .http
            .post(&self.url)
            .header(CSRF_HEADER, CSRF_VALUE)
            .json(&TokenRequest {
                remote_exit_node_id: &self.id,
                secret: &self.secret,
            })
            .send()
            .await
            .map_err(|e| http::transport_error(&method, &self.url, &e))?;

        let response = http::check_status(&method, &self.url, response)?;
        let body: TokenResponse = http::decode_envelope(&method, &self.url, response).await?;

        *self.token.write().await = Some(body.token.clone());
        Ok(body.token)
    }
}

#[async_trait]
impl CredentialProvider for TokenManager {
    async fn token(&self) -> Result<String, GatewayError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }
        self.refresh().await
    }
}

/// Fixed token, for nodes provisioned out of band and for tests
pub struct StaticCredentials(pub String);

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn token(&self) -> Result<String, GatewayError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_id_and_secret() {
        let managed = ManagedSection::default();
        let result = TokenManager::new(Client::new(), &managed);
        assert!(matches!(result, Err(GatewayError::Credentials(_))));
    }

    #[test]
    fn test_token_url() {
        let managed = ManagedSection {
            id: Some("node".to_string()),
            secret: Some("s3cret".to_string()),
            endpoint: "https://cp.example.com/".to_string(),
            ..Default::default()
        };
        let manager = TokenManager::new(Client::new(), &managed).unwrap();
        assert_eq!(manager.url, "https://cp.example.com/api/v1/auth/remoteExitNode/get-token");
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let credentials = StaticCredentials("abc".to_string());
        assert_eq!(credentials.token().await.unwrap(), "abc");
    }
}
