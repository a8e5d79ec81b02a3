//! Pixel sources for the video recorder.

use std::time::Duration;

use crate::utils::errors::{EngineError, Result};

/// EBML header magic that opens every WebM container.
pub const WEBM_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// A capturable screen stream.
///
/// `acquire` models asking the platform for a display stream and can
/// fail the way a denied permission prompt does. `finalize` hands back
/// the full encoded container for everything captured since acquire.
pub trait ScreenSource: Send {
    fn acquire(&mut self) -> Result<()>;

    fn finalize(&mut self) -> Result<Vec<u8>>;

    /// Time the source needs before `acquire` can answer. The recorder
    /// waits this long first; the default is none.
    fn startup_delay(&self) -> Option<Duration> {
        None
    }
}

/// Deterministic in-memory source for tests and demos.
pub struct SyntheticScreen {
    frames: usize,
    frame_bytes: usize,
    fail_acquire: bool,
    startup_delay: Option<Duration>,
    acquired: bool,
}

impl SyntheticScreen {
    pub fn new() -> Self {
        Self {
            frames: 24,
            frame_bytes: 512,
            fail_acquire: false,
            startup_delay: None,
            acquired: false,
        }
    }

    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    /// Makes `acquire` fail, as a denied capture prompt would.
    pub fn denied(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = Some(delay);
        self
    }
}

impl Default for SyntheticScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenSource for SyntheticScreen {
    fn acquire(&mut self) -> Result<()> {
        if self.fail_acquire {
            return Err(EngineError::VideoFailed(
                "display capture denied".to_string(),
            ));
        }
        self.acquired = true;
        Ok(())
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        if !self.acquired {
            return Err(EngineError::VideoFailed(
                "finalize without an acquired stream".to_string(),
            ));
        }
        self.acquired = false;
        let mut out = Vec::with_capacity(8 + self.frames * self.frame_bytes);
        out.extend_from_slice(&WEBM_MAGIC);
        out.extend_from_slice(b"webm");
        for frame in 0..self.frames {
            out.extend(std::iter::repeat(frame as u8).take(self.frame_bytes));
        }
        Ok(out)
    }

    fn startup_delay(&self) -> Option<Duration> {
        self.startup_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_blob_is_webm_shaped() {
        let mut source = SyntheticScreen::new().with_frames(3);
        source.acquire().unwrap();
        let blob = source.finalize().unwrap();
        assert!(blob.starts_with(&WEBM_MAGIC));
        assert_eq!(blob.len(), 8 + 3 * 512);
    }

    #[test]
    fn test_finalize_requires_acquire() {
        let mut source = SyntheticScreen::new();
        assert!(source.finalize().is_err());
    }
}
