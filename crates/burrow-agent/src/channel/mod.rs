//! Control channel to the remote control plane

mod client;
mod interval;
mod registry;

pub use client::{
    control_channel_url, ChannelError, ChannelEvent, ChannelOptions, ConnectionState,
    ControlChannelClient,
};
pub use interval::IntervalHandle;
pub use registry::{DispatchOutcome, HandlerRegistry, MessageHandler};
