//! Audit delivery trait

use async_trait::async_trait;

use crate::audit::AuditEvent;
use crate::error::GatewayError;

/// Destination for batches of audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Deliver one batch. The caller drops the batch whatever the outcome.
    async fn send_batch(&self, events: &[AuditEvent]) -> Result<(), GatewayError>;
}
