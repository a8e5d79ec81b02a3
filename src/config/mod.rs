//! Configuration: engine settings and the capture rule set.

pub mod capture;
pub mod engine;

pub use capture::{CaptureConfig, DomEventRule, HandlerKind, NavigationRule};
pub use engine::{ArchiveSettings, EngineConfig, IngestSettings, StorageSettings, VideoSettings};
