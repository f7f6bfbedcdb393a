//! The two-queue message bus between ingress channels, the turn
//! orchestrator, and the outbound dispatcher.

pub mod bus;
pub mod error;
pub mod types;

pub use bus::MessageBus;
pub use error::BusError;
pub use types::{BusMessage, Channel, MediaType};
