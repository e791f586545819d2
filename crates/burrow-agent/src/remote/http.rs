//! Shared plumbing for control plane HTTP calls

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use burrow_core::GatewayError;

/// Header the control plane requires on every state-changing call
pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const CSRF_VALUE: &str = "x-csrf-protection";

/// Every control plane response wraps its payload in `data`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Build the shared HTTP client
pub fn build_client(request_timeout: Duration) -> Result<Client, GatewayError> {
    Client::builder()
        .connect_timeout(request_timeout)
        .timeout(request_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent(concat!("burrow-agent/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| GatewayError::Transport {
            method: "INIT".to_string(),
            url: String::new(),
            message: e.to_string(),
            code: None,
        })
}

/// `Authorization: Bearer <token>` plus the CSRF header
pub fn auth_headers(token: &str) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| GatewayError::Credentials("token is not a valid header value".to_string()))?;
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CSRF_HEADER, HeaderValue::from_static(CSRF_VALUE));
    Ok(headers)
}

/// Map a failed send to a transport error with a short cause code
pub fn transport_error(method: &Method, url: &str, err: &reqwest::Error) -> GatewayError {
    let code = if err.is_timeout() {
        Some("ETIMEDOUT")
    } else if err.is_connect() {
        Some("ECONNREFUSED")
    } else if err.is_request() {
        Some("ERR_REQUEST")
    } else {
        None
    };

    GatewayError::Transport {
        method: method.to_string(),
        url: url.to_string(),
        message: err.to_string(),
        code: code.map(str::to_string),
    }
}

/// Reject non-2xx responses
pub fn check_status(method: &Method, url: &str, response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(GatewayError::Status {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
        status_text: status.canonical_reason().map(str::to_string),
    })
}

/// Decode a `{data: ...}` body
pub async fn decode_envelope<T: DeserializeOwned>(
    method: &Method,
    url: &str,
    response: Response,
) -> Result<T, GatewayError> {
    response
        .json::<Envelope<T>>()
        .await
        .map(|envelope| envelope.data)
        .map_err(|e| GatewayError::Decode {
            method: method.to_string(),
            url: url.to_string(),
            message: e.to_string(),
        })
}

/// Log a control plane failure with its structured context
pub fn log_remote_failure(context: &str, err: &GatewayError) {
    tracing::error!(
        context,
        message = %err,
        code = err.code().unwrap_or("-"),
        status = err.status().unwrap_or(0),
        url = err.url().unwrap_or("-"),
        method = err.method().unwrap_or("-")
    );
}
