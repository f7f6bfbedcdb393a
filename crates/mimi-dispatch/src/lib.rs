//! Outbound dispatcher: pops responses from the bus and routes them to
//! per-channel egress sinks with bounded retry.

pub mod dispatcher;
pub mod error;
pub mod sink;

pub use dispatcher::{Dispatcher, SendFailureHook};
pub use error::SendError;
pub use sink::ChannelSink;
