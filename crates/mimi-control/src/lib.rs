//! Deterministic control plane.
//!
//! Voice-transcribed commands with high certainty (volume, reboot, alarms,
//! temperature rules, music) are recognized and executed here, before any
//! LLM call, so local control stays authoritative, fast, and idempotent.

pub mod capability;
pub mod error;
pub mod numbers;
pub mod parser;
pub mod plane;
pub mod types;

pub use error::ControlError;
pub use plane::ControlPlane;
pub use types::{
    AlarmInfo, AuditEntry, CommandKind, Comparator, ControlCommand, ControlResult, TempAction,
    TempRuleInfo,
};
