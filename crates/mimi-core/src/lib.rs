//! Shared foundation for the Mimi runtime: configuration, the top-level
//! error type, device-facing collaborator traits, and the small persistent
//! key/value store used by services that must survive a restart.

pub mod config;
pub mod device;
pub mod error;
pub mod kv;

pub use config::MimiConfig;
pub use error::{MimiError, Result};
