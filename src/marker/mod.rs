//! Element-marking collaborator.
//!
//! Identifier attributes are stamped by a page-context marker that is
//! not part of the engine. The engine injects its script element once
//! per document and from then on talks to it exclusively over the
//! per-document custom-event bus. The bridge half lives here; a
//! scripted implementation stands in for the real marker in tests.

pub mod bridge;
pub mod scripted;

pub use bridge::{MarkSummary, MarkerBridge, INJECTION_TIMEOUT_MS, REMARK_WAIT_MS};
pub use scripted::{ScriptedMarker, ScriptedMarkerHandle};

use crate::host::dom::DocId;
use crate::host::page::Page;

/// Marker announces a document is fully marked.
pub const INJECTION_COMPLETE: &str = "browsergym-injection-complete";
/// Engine asks for newly added elements to be marked.
pub const REMARK_REQUEST: &str = "browsergym-remark-request";
/// Marker finished a re-mark pass.
pub const REMARK_COMPLETE: &str = "browsergym-remark-complete";
/// Engine asks a frame marker for its document HTML.
pub const FRAME_OBSERVATION_REQUEST: &str = "iframe-observation-request";
/// Frame marker reply type carried in its posted message.
pub const FRAME_OBSERVATION_COMPLETE: &str = "observation-request-complete";

/// Element id of the injected script, stripped from page captures.
pub const MARKER_SCRIPT_ID: &str = "browsergym-marker-script";

/// A page-context marker implementation.
///
/// `install` stands in for script execution: the bridge appends the
/// script element and calls it once per document. Everything after
/// that happens over the custom-event bus.
pub trait Marker: Send {
    fn install(&mut self, page: &mut Page, doc: DocId, prefix: Option<&str>);
}
