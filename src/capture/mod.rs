//! Capture pipeline: listeners, queueing, enrichment, HTML snapshots.
//!
//! Raw DOM events flow from listeners (always-on critical tier plus
//! config-driven tier) into a single-writer ordered queue, are enriched
//! asynchronously with stable identifiers, and leave as finalized
//! records toward the coordinator. Page HTML is captured per event,
//! gated by readiness, a cooldown, and a re-entry lock.

pub mod frames;
pub mod html;
pub mod identity;
pub mod listeners;
pub mod prebuffer;
pub mod queue;
pub mod records;
pub mod selectors;
pub mod session;
pub mod snapshot;

pub use records::{
    A11yInfo, BoundingBox, ClickPayload, EventPayload, EventRecord, HtmlCapturePayload,
    IframeInfo, InputPayload, KeyboardPayload, NavigationPayload, ScrollPayload, SelectionPayload,
    TargetInfo,
};
pub use session::{SessionRecorder, SessionStats};
