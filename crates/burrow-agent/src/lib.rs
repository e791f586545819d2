//! burrow-agent: exit-node agent for a remotely managed control plane
//!
//! The agent keeps a control channel open to the control plane and turns
//! the commands it receives into calls on the local exit node. It also
//! answers session verification requests from the reverse-proxy plugin,
//! delegating every policy lookup to the control plane, and ships an audit
//! record of each decision back in batches.

pub mod audit;
pub mod channel;
pub mod remote;
pub mod server;
pub mod state;
pub mod translator;

pub use audit::AuditBatcher;
pub use channel::{ChannelEvent, ConnectionState, ControlChannelClient};
pub use state::AppState;
pub use translator::CommandTranslator;
