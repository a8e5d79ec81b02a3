//! Browser session capture engine.
//!
//! Records user interactions on an instrumented page as an ordered
//! stream of finalized event records, each tied to a stable element
//! identifier, with per-navigation HTML snapshots and an optional
//! synchronized screen recording. Sessions persist locally and upload
//! to an ingest service as one payload per task.
//!
//! # Architecture
//!
//! - **host**: in-process page model (DOM arena, dispatch, frames)
//! - **capture**: listener tiers, identity resolution, the event queue,
//!   snapshot scheduling, and the per-page session recorder
//! - **marker**: bridge to the external element-marking collaborator
//! - **video**: screen recorder lifecycle over a `ScreenSource`
//! - **storage**: task history, keyed snapshot blobs, session archives
//! - **ingest**: upload client for the remote ingest service
//! - **trace**: export documents, verification, action distillation
//! - **coordinator**: background state machine and message router
//! - **config**: engine settings and capture rules
//! - **observability**: tracing setup
//! - **utils**: errors, clocks

pub mod capture;
pub mod config;
pub mod coordinator;
pub mod host;
pub mod ingest;
pub mod marker;
pub mod observability;
pub mod storage;
pub mod trace;
pub mod utils;
pub mod video;

// Re-export commonly used types
pub use capture::{EventRecord, SessionRecorder, SessionStats};
pub use config::engine::EngineConfig;
pub use coordinator::{Coordinator, CoordinatorHandle, StopOutcome};
pub use ingest::IngestClient;
pub use storage::StorageGateway;
pub use utils::errors::{EngineError, Result};
pub use video::{VideoHandle, VideoRecorder};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
