//! HTTP client for the local exit node API

use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use burrow_protocol::{PeerAdd, PeerRemove};

#[derive(Debug, Error)]
pub enum ExitNodeError {
    #[error("{method} {url} failed: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} returned {status}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
    },
}

impl ExitNodeError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status(),
        }
    }
}

/// Talks to the exit node's management API (`gerbil.reachable_at`)
#[derive(Clone)]
pub struct ExitNodeClient {
    http: Client,
    base_url: String,
}

impl ExitNodeClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Add a peer. A peer that already exists counts as added.
    pub async fn add_peer(&self, peer: &PeerAdd) -> Result<(), ExitNodeError> {
        let body = json!({
            "publicKey": peer.public_key,
            "allowedIps": peer.allowed_ips,
        });

        match self.send(Method::POST, "/peer", &[], &body).await {
            Err(e) if e.status() == Some(StatusCode::CONFLICT) => {
                tracing::debug!("Peer {} already present", peer.public_key);
                Ok(())
            }
            other => other,
        }
    }

    /// Remove a peer. A peer that is already gone counts as removed.
    pub async fn remove_peer(&self, peer: &PeerRemove) -> Result<(), ExitNodeError> {
        let body = json!({ "publicKey": peer.public_key });

        match self
            .send(Method::DELETE, "/peer", &[("public_key", &peer.public_key)], &body)
            .await
        {
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {
                tracing::debug!("Peer {} already absent", peer.public_key);
                Ok(())
            }
            other => other,
        }
    }

    pub async fn update_proxy_mapping(&self, payload: &Value) -> Result<(), ExitNodeError> {
        self.send(Method::POST, "/update-proxy-mapping", &[], payload).await
    }

    pub async fn update_destinations(&self, payload: &Value) -> Result<(), ExitNodeError> {
        self.send(Method::POST, "/update-destinations", &[], payload).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: &Value,
    ) -> Result<(), ExitNodeError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.request(method.clone(), &url).json(body);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await.map_err(|source| ExitNodeError::Transport {
            method: method.clone(),
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExitNodeError::Status { method, url, status });
        }

        tracing::debug!("Exit node request successful: {} {} ({})", method, url, status);
        Ok(())
    }
}
