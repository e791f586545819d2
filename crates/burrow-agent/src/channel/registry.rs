//! Message handler registry

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;

use burrow_protocol::ControlMessage;

/// Handles one inbound message type
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: ControlMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(ControlMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: ControlMessage) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// What happened to a dispatched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// No handler registered for the type
    Unhandled,
    /// The handler returned an error
    Failed,
    /// The handler panicked
    Panicked,
}

/// One handler per message type; registering a type again replaces the
/// previous handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `message_type`, returning the handler it replaced
    pub fn register(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        let message_type = message_type.into();
        let previous = self.handlers.insert(message_type.clone(), handler);
        if previous.is_some() {
            tracing::debug!("Replaced handler for {}", message_type);
        }
        previous
    }

    /// Run the handler for `message`.
    ///
    /// Errors and panics are logged and reported in the outcome; they never
    /// propagate to the caller.
    pub async fn dispatch(&self, message: ControlMessage) -> DispatchOutcome {
        // Clone out of the map so no shard lock is held across the await
        let handler = match self.handlers.get(&message.message_type) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                tracing::warn!("No handler registered for message type {}", message.message_type);
                return DispatchOutcome::Unhandled;
            }
        };

        let message_type = message.message_type.clone();
        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(e)) => {
                tracing::error!("Handler for {} failed: {:#}", message_type, e);
                DispatchOutcome::Failed
            }
            Err(_) => {
                tracing::error!("Handler for {} panicked", message_type);
                DispatchOutcome::Panicked
            }
        }
    }
}
