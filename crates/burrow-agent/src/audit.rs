//! Audit batching
//!
//! Request handlers call [`AuditBatcher::record`] from many tasks at once.
//! The queue itself is owned by a single actor task, so appending and
//! flushing can never interleave: once the queue reaches the batch size the
//! actor ships it and clears it before looking at the next command. A failed
//! delivery clears the queue as well; those events are lost.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use burrow_core::audit::{AccessDecision, AuditEvent, RequestContext};
use burrow_core::config::AuditSection;
use burrow_core::time::current_time_secs;
use burrow_core::traits::{AuditSink, RemoteVerificationGateway};

use crate::remote::log_remote_failure;

enum AuditCommand {
    Append(AuditEvent),
    Len(oneshot::Sender<usize>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit queue. Cheap to clone.
#[derive(Clone)]
pub struct AuditBatcher {
    tx: mpsc::Sender<AuditCommand>,
    gateway: Arc<dyn RemoteVerificationGateway>,
}

impl AuditBatcher {
    /// Start the queue actor
    pub fn spawn(
        sink: Arc<dyn AuditSink>,
        gateway: Arc<dyn RemoteVerificationGateway>,
        config: &AuditSection,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let batch_size = config.batch_size.max(1);
        let task = tokio::spawn(run_queue(rx, sink, batch_size));
        (Self { tx, gateway }, task)
    }

    /// Record one access decision.
    ///
    /// Organizations with a retention of zero days (or whose retention
    /// cannot be looked up) are not logged at all.
    pub async fn record(&self, decision: &AccessDecision, request: &RequestContext) {
        if let Some(org_id) = decision.org_id.as_deref() {
            if self.gateway.get_retention_days(org_id).await == 0 {
                tracing::trace!("Audit logging disabled for org {}", org_id);
                return;
            }
        }

        let event = AuditEvent::from_decision(decision, request, current_time_secs());
        match self.tx.try_send(AuditCommand::Append(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Audit queue is full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Audit queue is closed, dropping event");
            }
        }
    }

    /// Number of queued events, after every command sent before this call
    pub async fn len(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(AuditCommand::Len(reply)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ship whatever is queued now
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(AuditCommand::Flush(reply)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_queue(mut rx: mpsc::Receiver<AuditCommand>, sink: Arc<dyn AuditSink>, batch_size: usize) {
    let mut queue: Vec<AuditEvent> = Vec::with_capacity(batch_size);

    while let Some(command) = rx.recv().await {
        match command {
            AuditCommand::Append(event) => {
                queue.push(event);
                if queue.len() >= batch_size {
                    flush(sink.as_ref(), &mut queue).await;
                }
            }
            AuditCommand::Len(reply) => {
                let _ = reply.send(queue.len());
            }
            AuditCommand::Flush(reply) => {
                if !queue.is_empty() {
                    flush(sink.as_ref(), &mut queue).await;
                }
                let _ = reply.send(());
            }
        }
    }

    if !queue.is_empty() {
        flush(sink.as_ref(), &mut queue).await;
    }
    tracing::debug!("Audit queue stopped");
}

/// Send the queue as one batch and clear it whatever the outcome
async fn flush(sink: &dyn AuditSink, queue: &mut Vec<AuditEvent>) {
    let batch = std::mem::take(queue);
    match sink.send_batch(&batch).await {
        Ok(()) => tracing::debug!("Sent {} audit logs", batch.len()),
        Err(e) => log_remote_failure("Error sending audit logs, dropping batch", &e),
    }
}
