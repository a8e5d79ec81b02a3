//! Screen video capture.
//!
//! The recorder runs as its own task and is driven purely by messages,
//! mirroring how the rest of the engine talks to it. The actual pixel
//! source sits behind [`ScreenSource`] so tests record deterministic
//! synthetic footage.

pub mod recorder;
pub mod source;

pub use recorder::{VideoCommand, VideoEvent, VideoHandle, VideoRecorder, VideoState};
pub use source::{ScreenSource, SyntheticScreen, WEBM_MAGIC};
