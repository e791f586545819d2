//! Shared state for the local HTTP API

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use burrow_core::GatewayError;

use crate::remote::{ForwardedResponse, HybridClient};
use crate::server::SessionVerifier;

/// Relays a request body to the control plane's hybrid API
#[async_trait]
pub trait RemoteForwarder: Send + Sync {
    async fn forward(&self, path: &str, body: &Value) -> Result<ForwardedResponse, GatewayError>;
}

#[async_trait]
impl RemoteForwarder for HybridClient {
    async fn forward(&self, path: &str, body: &Value) -> Result<ForwardedResponse, GatewayError> {
        HybridClient::forward(self, path, body).await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<SessionVerifier>,
    pub forwarder: Arc<dyn RemoteForwarder>,
}

impl AppState {
    pub fn new(verifier: Arc<SessionVerifier>, forwarder: Arc<dyn RemoteForwarder>) -> Self {
        Self { verifier, forwarder }
    }
}
