//! Audio playback port.
//!
//! Actual audio output lives in a separate subsystem; the device only
//! drives it through this trait and observes its MMC status codes. The
//! null port tracks state transitions without producing sound, which is
//! all the command engine needs.

use opticd_common::scsi::audio_status;

use crate::image::Disc;

/// Interface the command engine uses to drive audio playback
pub trait AudioPort: Send {
    /// Current MMC audio status code
    fn status(&self) -> u8;

    /// Begin playback of `[start, end)`
    fn start(&mut self, disc: &Disc, start: i32, end: i32) -> bool;

    /// Pause a running playback
    fn pause(&mut self);

    /// Resume a paused playback
    fn resume(&mut self);

    /// Stop playback entirely
    fn stop(&mut self);
}

/// State-only audio port used when no audio driver is configured
pub struct NullAudio {
    status: u8,
}

impl NullAudio {
    pub fn new() -> Self {
        Self { status: audio_status::NOSTATUS }
    }
}

impl Default for NullAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPort for NullAudio {
    fn status(&self) -> u8 {
        self.status
    }

    fn start(&mut self, _disc: &Disc, start: i32, end: i32) -> bool {
        tracing::debug!(target: "opticd::audioplay", start, end, "null audio start");
        self.status = audio_status::PLAYING;
        true
    }

    fn pause(&mut self) {
        self.status = audio_status::PAUSED;
    }

    fn resume(&mut self) {
        self.status = audio_status::PLAYING;
    }

    fn stop(&mut self) {
        self.status = audio_status::NOSTATUS;
    }
}

/// Create the audio port named by the configuration
pub fn create_audio_port(driver: &str) -> Box<dyn AudioPort> {
    match driver {
        "null" | "" => Box::new(NullAudio::new()),
        other => {
            tracing::warn!(
                target: "opticd::audioplay",
                driver = other,
                "unknown audio driver, falling back to null"
            );
            Box::new(NullAudio::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MediumType;

    #[test]
    fn test_null_audio_transitions() {
        let disc = Disc::new(MediumType::Cd);
        let mut audio = NullAudio::new();
        assert_eq!(audio.status(), audio_status::NOSTATUS);

        assert!(audio.start(&disc, 0, 100));
        assert_eq!(audio.status(), audio_status::PLAYING);

        audio.pause();
        assert_eq!(audio.status(), audio_status::PAUSED);
        audio.resume();
        assert_eq!(audio.status(), audio_status::PLAYING);
        audio.stop();
        assert_eq!(audio.status(), audio_status::NOSTATUS);
    }
}
