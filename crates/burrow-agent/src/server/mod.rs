//! Local HTTP API used by the exit node and the reverse-proxy plugin

mod routes;
mod verify;

pub use routes::{router, serve};
pub use verify::{
    strip_port, SessionVerifier, Verdict, VerifierSettings, VerifyData, VerifyRequest, VerifyResponse,
};
