//! Core error types for burrow

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by calls to the remote control plane.
///
/// Gateway operations never surface these to callers; they are logged and
/// turned into sentinels. Only the audit sink and the forwarding endpoints
/// see them directly.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Request never produced a response (DNS, connect, timeout, TLS)
    #[error("{method} {url} failed: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
        /// Short machine-readable cause (e.g. `ETIMEDOUT`, `ECONNREFUSED`)
        code: Option<String>,
    },

    /// Remote answered with a non-success status
    #[error("{method} {url} returned {status}")]
    Status {
        method: String,
        url: String,
        status: u16,
        status_text: Option<String>,
    },

    /// Response body did not match the expected shape
    #[error("{method} {url} returned a malformed body: {message}")]
    Decode {
        method: String,
        url: String,
        message: String,
    },

    /// No token could be obtained for the request
    #[error("No credentials available: {0}")]
    Credentials(String),
}

impl GatewayError {
    /// HTTP status, when the remote answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short cause code, when known
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Transport { code, .. } => code.as_deref(),
            Self::Status { .. } => Some("ERR_BAD_RESPONSE"),
            Self::Decode { .. } => Some("ERR_BAD_BODY"),
            Self::Credentials(_) => Some("ERR_NO_CREDENTIALS"),
        }
    }

    /// Target URL of the failed request
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Transport { url, .. } | Self::Status { url, .. } | Self::Decode { url, .. } => {
                Some(url)
            }
            Self::Credentials(_) => None,
        }
    }

    /// HTTP method of the failed request
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Transport { method, .. }
            | Self::Status { method, .. }
            | Self::Decode { method, .. } => Some(method),
            Self::Credentials(_) => None,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
