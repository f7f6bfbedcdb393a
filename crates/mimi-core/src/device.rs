//! Collaborator traits for the device-facing subsystems that sit outside
//! the turn pipeline: speaker volume, the speech channel, and host power
//! control. The runtime only ever talks to these through trait objects so
//! tests (and headless deployments) can substitute their own.

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

use crate::error::Result;

/// Speaker volume, expressed as a 0..=100 percentage.
pub trait VolumeSink: Send + Sync {
    /// Set the volume. Values above 100 are clamped by implementations.
    fn set(&self, level: u8);

    /// Read back the current volume.
    fn get(&self) -> u8;
}

/// Software volume level for deployments without a hardware mixer.
///
/// Also the read-back source for the set-then-verify contract of the
/// `set_volume` capability.
pub struct SoftVolume {
    level: AtomicU8,
}

impl SoftVolume {
    pub fn new(initial: u8) -> Self {
        Self {
            level: AtomicU8::new(initial.min(100)),
        }
    }
}

impl Default for SoftVolume {
    fn default() -> Self {
        Self::new(50)
    }
}

impl VolumeSink for SoftVolume {
    fn set(&self, level: u8) {
        self.level.store(level.min(100), Ordering::Relaxed);
    }

    fn get(&self) -> u8 {
        self.level.load(Ordering::Relaxed)
    }
}

/// The voice pipeline: text-to-speech playback plus music control.
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    /// Speak the given text on the local speaker.
    async fn speak(&self, text: &str) -> Result<()>;

    /// Start music playback for a free-form query.
    async fn play_music(&self, query: &str) -> Result<()>;

    /// Stop music playback. Not an error when nothing is playing.
    async fn stop_music(&self) -> Result<()>;
}

/// Host power control, used by the delayed-reboot capability.
pub trait HostControl: Send + Sync {
    fn restart(&self);
}
