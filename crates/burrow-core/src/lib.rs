//! burrow-core: Core abstractions and configuration for burrow
//!
//! This crate holds everything the agent needs that does not touch a socket:
//! configuration, the domain types returned by the control plane, the
//! organization session policy, the session cookie format, the audit record
//! model and the capability traits behind which remote calls live.

pub mod audit;
pub mod config;
pub mod cookie;
pub mod error;
pub mod policy;
pub mod rules;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, GatewayError};
pub use policy::SessionLengthVerdict;
