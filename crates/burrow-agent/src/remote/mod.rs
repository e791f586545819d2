//! Calls to the remote control plane

mod http;
mod hybrid;
mod token;

pub use http::{auth_headers, build_client, log_remote_failure, CSRF_HEADER, CSRF_VALUE};
pub use hybrid::{ForwardedResponse, HybridClient};
pub use token::{StaticCredentials, TokenManager};
