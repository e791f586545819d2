//! Turns control plane commands into calls on the local exit node
//!
//! | command                  | local call                                  |
//! |--------------------------|---------------------------------------------|
//! | `peers/add`              | `POST /peer`                                |
//! | `peers/remove`           | `DELETE /peer?public_key=..`                |
//! | `update-proxy-mapping`   | `POST /update-proxy-mapping`                |
//! | `update-destinations`    | `POST /update-destinations`                 |
//! | `traefik/reload`         | regenerate the reverse-proxy configuration  |
//!
//! Failed calls are logged and dropped. The control plane redelivers when
//! it needs to, so nothing is retried here.

mod exit_node;
mod proxy_config;

pub use exit_node::{ExitNodeClient, ExitNodeError};
pub use proxy_config::{ProxyConfigManager, ProxyConfigReloader, ProxyConfigSource};

use std::sync::Arc;

use async_trait::async_trait;

use burrow_protocol::{message_types, ControlMessage, ExitNodeCommand};

use crate::channel::{ControlChannelClient, MessageHandler};

pub struct CommandTranslator {
    exit_node: ExitNodeClient,
    reloader: Arc<dyn ProxyConfigReloader>,
}

impl CommandTranslator {
    pub fn new(exit_node: ExitNodeClient, reloader: Arc<dyn ProxyConfigReloader>) -> Self {
        Self { exit_node, reloader }
    }

    /// Register this translator for every inbound command type
    pub fn register(self: &Arc<Self>, client: &ControlChannelClient) {
        for message_type in message_types::INBOUND {
            client.register_handler(message_type, Arc::clone(self) as Arc<dyn MessageHandler>);
        }
    }

    /// Run one command
    pub async fn execute(&self, command: ExitNodeCommand) {
        let result = match &command {
            ExitNodeCommand::PeerAdd(peer) => self.exit_node.add_peer(peer).await,
            ExitNodeCommand::PeerRemove(peer) => self.exit_node.remove_peer(peer).await,
            ExitNodeCommand::UpdateProxyMapping(payload) => self.exit_node.update_proxy_mapping(payload).await,
            ExitNodeCommand::UpdateDestinations(payload) => self.exit_node.update_destinations(payload).await,
            ExitNodeCommand::ProxyReload => {
                if let Err(e) = self.reloader.reload().await {
                    tracing::error!("Failed to reload reverse proxy configuration: {:#}", e);
                }
                return;
            }
        };

        if let Err(e) = result {
            tracing::error!(
                "Error handling {} (can the agent reach the exit node HTTP API?) for exit node at {}: {}",
                command.message_type(),
                self.exit_node.base_url(),
                e
            );
        }
    }
}

#[async_trait]
impl MessageHandler for CommandTranslator {
    async fn handle(&self, message: ControlMessage) -> anyhow::Result<()> {
        let command = ExitNodeCommand::from_message(&message)?;
        self.execute(command).await;
        Ok(())
    }
}
