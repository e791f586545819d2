//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Default managed control-plane endpoint
pub const DEFAULT_MANAGED_ENDPOINT: &str = "https://pangolin.fossorial.io";

/// Configuration for the exit-node agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Logging and audit behaviour
    pub app: AppSection,
    /// Local HTTP server
    pub server: ServerSection,
    /// Remote control plane identity and endpoint
    pub managed: ManagedSection,
    /// Local WireGuard exit node
    pub gerbil: GerbilSection,
    /// Local reverse proxy
    pub traefik: TraefikSection,
    /// Control-channel timers
    pub control_channel: ControlChannelSection,
    /// Audit batching
    pub audit: AuditSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Log denied requests at info level
    pub log_failed_attempts: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_failed_attempts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address the local router binds to
    pub bind_address: String,
    /// Port of the local router
    pub internal_port: u16,
    /// Hostname other containers reach this agent at
    pub internal_hostname: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            internal_port: 3001,
            internal_hostname: "pangolin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedSection {
    /// Display name of this node
    pub name: Option<String>,
    /// Node identifier issued by the control plane
    pub id: Option<String>,
    /// Node secret issued by the control plane
    pub secret: Option<String>,
    /// Base URL of the control plane
    pub endpoint: String,
    /// Where unauthenticated users are sent to log in
    pub redirect_endpoint: Option<String>,
    /// Timeout for each control-plane request
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// How often the bearer token is refreshed
    #[serde(with = "duration_secs")]
    pub token_refresh_interval: Duration,
}

impl Default for ManagedSection {
    fn default() -> Self {
        Self {
            name: None,
            id: None,
            secret: None,
            endpoint: DEFAULT_MANAGED_ENDPOINT.to_string(),
            redirect_endpoint: None,
            request_timeout: Duration::from_secs(10),
            token_refresh_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl ManagedSection {
    /// Endpoint without a trailing slash
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GerbilSection {
    /// Public endpoint clients use for the exit node
    pub base_endpoint: Option<String>,
    /// Where this agent reaches the exit node's HTTP API
    pub reachable_at: String,
    /// First WireGuard port
    pub start_port: u16,
    /// Timeout for each exit-node call
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for GerbilSection {
    fn default() -> Self {
        Self {
            base_endpoint: None,
            reachable_at: "http://gerbil:3003".to_string(),
            start_port: 51820,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraefikSection {
    pub certificates_path: PathBuf,
    /// Interval of the periodic configuration refresh
    #[serde(with = "duration_millis")]
    pub monitor_interval: Duration,
    pub dynamic_cert_config_path: PathBuf,
    /// File the router configuration is written to
    pub dynamic_router_config_path: PathBuf,
}

impl Default for TraefikSection {
    fn default() -> Self {
        Self {
            certificates_path: PathBuf::from("/var/certificates"),
            monitor_interval: Duration::from_millis(5000),
            dynamic_cert_config_path: PathBuf::from("/var/dynamic/cert_config.yml"),
            dynamic_router_config_path: PathBuf::from("/var/dynamic/router_config.yml"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlChannelSection {
    /// Fixed delay between reconnect attempts
    #[serde(with = "duration_millis")]
    pub reconnect_interval: Duration,
    /// Transport ping period
    #[serde(with = "duration_millis")]
    pub ping_interval: Duration,
    /// How long to wait for a pong before dropping the connection
    #[serde(with = "duration_millis")]
    pub ping_timeout: Duration,
    /// Period of the application-level `remoteExitNode/ping`
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    /// Handshake timeout
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
}

impl Default for ControlChannelSection {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(5000),
            ping_interval: Duration::from_millis(30000),
            ping_timeout: Duration::from_millis(10000),
            heartbeat_interval: Duration::from_millis(60000),
            connect_timeout: Duration::from_millis(30000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// Queue length that triggers a flush
    pub batch_size: usize,
    /// Records waiting for the batcher beyond this are dropped
    pub queue_capacity: usize,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            batch_size: 25,
            queue_capacity: 1024,
        }
    }
}

impl AgentConfig {
    /// Check values the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.managed.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("managed.endpoint is empty".to_string()));
        }
        if self.server.internal_port == 0 {
            return Err(ConfigError::Invalid("server.internal_port must be > 0".to_string()));
        }
        if self.gerbil.reachable_at.trim().is_empty() {
            return Err(ConfigError::Invalid("gerbil.reachable_at is empty".to_string()));
        }
        if self.audit.batch_size == 0 {
            return Err(ConfigError::Invalid("audit.batch_size must be > 0".to_string()));
        }
        let channel = &self.control_channel;
        if channel.ping_timeout >= channel.ping_interval {
            return Err(ConfigError::Invalid(format!(
                "control_channel.ping_timeout ({:?}) must be shorter than ping_interval ({:?})",
                channel.ping_timeout, channel.ping_interval
            )));
        }
        Ok(())
    }

    /// Address the local router binds to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.internal_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        AgentConfig::default().validate().unwrap();
    }

    #[test]
    fn test_ping_timeout_must_be_shorter() {
        let mut config = AgentConfig::default();
        config.control_channel.ping_timeout = config.control_channel.ping_interval;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = AgentConfig::default();
        config.audit.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_url_trims_slash() {
        let mut config = AgentConfig::default();
        config.managed.endpoint = "https://cp.example/".to_string();
        assert_eq!(config.managed.base_url(), "https://cp.example");
    }

    #[test]
    fn test_listen_address() {
        let config = AgentConfig::default();
        assert_eq!(config.listen_address(), "0.0.0.0:3001");
    }
}
