//! Credential trait

use async_trait::async_trait;

use crate::error::GatewayError;

/// Source of the bearer token used for control plane calls.
///
/// Implementations must allow many concurrent readers.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token
    async fn token(&self) -> Result<String, GatewayError>;
}
