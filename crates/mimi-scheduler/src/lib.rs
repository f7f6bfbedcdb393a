//! Time-driven producers of `system`-channel inbound messages: the cron
//! single-job compatibility service and the heartbeat service.

pub mod cron;
pub mod error;
pub mod heartbeat;

pub use cron::{CronService, CronStats};
pub use error::SchedulerError;
pub use heartbeat::{HeartbeatService, HeartbeatStats};
