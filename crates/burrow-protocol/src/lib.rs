//! burrow-protocol: Control-channel wire protocol for burrow
//!
//! Every frame exchanged with the remote control plane, in both directions,
//! is a JSON envelope `{"type": ..., "data": ...}`. This crate defines the
//! envelope, the known message types, the outbound payloads and the decoded
//! exit-node commands produced from inbound frames.

pub mod command;
pub mod error;
pub mod message;

pub use command::{ExitNodeCommand, PeerAdd, PeerRemove};
pub use error::ProtocolError;
pub use message::{message_types, ControlMessage, PingPayload, RegisterPayload};
