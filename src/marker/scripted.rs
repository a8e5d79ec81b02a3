//! Scripted marker for tests and demos.
//!
//! Behaves like the real page-context marker: stamps `data-bid` on
//! interactive elements, answers re-mark requests, and serializes its
//! own document for frame observation. Each answer channel can be
//! muted through the handle to drive the timeout paths, and a muted
//! injection can be completed later by hand to exercise readiness
//! gating.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::capture::identity::MARKER_ATTR;
use crate::host::dom::{is_interactive_tag, DocId};
use crate::host::event::ListenerTier;
use crate::host::page::Page;
use crate::host::serialize::{self, SerializeOptions};
use crate::marker::{
    Marker, FRAME_OBSERVATION_COMPLETE, FRAME_OBSERVATION_REQUEST, INJECTION_COMPLETE,
    MARKER_SCRIPT_ID, REMARK_COMPLETE, REMARK_REQUEST,
};

struct ScriptedState {
    answer_injection: AtomicBool,
    answer_remark: AtomicBool,
    answer_observation: AtomicBool,
    next_mark: AtomicU64,
    remark_count: AtomicU64,
    marks_made: AtomicU64,
}

pub struct ScriptedMarker {
    state: Arc<ScriptedState>,
}

/// Test-side control over a marker that has been handed to the bridge.
#[derive(Clone)]
pub struct ScriptedMarkerHandle {
    state: Arc<ScriptedState>,
}

impl ScriptedMarker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ScriptedState {
                answer_injection: AtomicBool::new(true),
                answer_remark: AtomicBool::new(true),
                answer_observation: AtomicBool::new(true),
                next_mark: AtomicU64::new(0),
                remark_count: AtomicU64::new(0),
                marks_made: AtomicU64::new(0),
            }),
        }
    }

    pub fn handle(&self) -> ScriptedMarkerHandle {
        ScriptedMarkerHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for ScriptedMarker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedMarkerHandle {
    pub fn mute_injection(&self) {
        self.state.answer_injection.store(false, Ordering::Relaxed);
    }

    pub fn mute_remark(&self) {
        self.state.answer_remark.store(false, Ordering::Relaxed);
    }

    pub fn mute_observation(&self) {
        self.state.answer_observation.store(false, Ordering::Relaxed);
    }

    pub fn remark_count(&self) -> u64 {
        self.state.remark_count.load(Ordering::Relaxed)
    }

    pub fn marks_made(&self) -> u64 {
        self.state.marks_made.load(Ordering::Relaxed)
    }

    /// Finishes a muted injection by hand: marks the document and
    /// emits the completion event, as a slow marker eventually would.
    pub fn complete_injection(&self, page: &mut Page, doc: DocId) {
        announce_marked(&self.state, page, doc);
    }
}

impl Marker for ScriptedMarker {
    fn install(&mut self, page: &mut Page, doc: DocId, prefix: Option<&str>) {
        if let Some(p) = prefix {
            page.doc_mut(doc).marker_prefix = Some(p.to_string());
        }

        let state = Arc::clone(&self.state);
        page.add_custom_listener(
            doc,
            REMARK_REQUEST,
            ListenerTier::Page,
            Box::new(move |page, event| {
                if !state.answer_remark.load(Ordering::Relaxed) {
                    return;
                }
                let marked = mark_new_elements(&state, page, event.doc);
                state.remark_count.fetch_add(1, Ordering::Relaxed);
                let timestamp = event.detail.get("timestamp").cloned().unwrap_or(Value::Null);
                page.dispatch_custom(
                    event.doc,
                    REMARK_COMPLETE,
                    json!({ "timestamp": timestamp, "elementsMarked": marked }),
                );
            }),
        );

        let state = Arc::clone(&self.state);
        page.add_custom_listener(
            doc,
            FRAME_OBSERVATION_REQUEST,
            ListenerTier::Page,
            Box::new(move |page, event| {
                if !state.answer_observation.load(Ordering::Relaxed) {
                    return;
                }
                let html = serialize::document_html(
                    page,
                    event.doc,
                    &SerializeOptions::page_capture(MARKER_SCRIPT_ID),
                );
                let iframe_id = event.detail.get("iframeId").cloned().unwrap_or(Value::Null);
                page.post_message(
                    event.doc,
                    json!({
                        "type": FRAME_OBSERVATION_COMPLETE,
                        "iframeId": iframe_id,
                        "html": html,
                    }),
                );
            }),
        );

        if self.state.answer_injection.load(Ordering::Relaxed) {
            announce_marked(&self.state, page, doc);
        }
    }
}

/// Stamps identifiers on unmarked interactive elements. Returns how
/// many were stamped.
fn mark_new_elements(state: &ScriptedState, page: &mut Page, doc: DocId) -> u64 {
    let prefix = page.doc(doc).marker_prefix.clone().unwrap_or_default();
    let root = page.dom(doc).root();
    let nodes = page.dom(doc).descendants(root, true);
    let mut marked = 0;
    for node in nodes {
        let keep = {
            let Some(el) = page.dom(doc).element(node) else {
                continue;
            };
            is_interactive_tag(&el.tag) && el.attr(MARKER_ATTR).is_none()
        };
        if !keep {
            continue;
        }
        let n = state.next_mark.fetch_add(1, Ordering::Relaxed);
        page.set_attribute(doc, node, MARKER_ATTR, &format!("{prefix}m{n}"));
        marked += 1;
    }
    state.marks_made.fetch_add(marked, Ordering::Relaxed);
    marked
}

fn announce_marked(state: &Arc<ScriptedState>, page: &mut Page, doc: DocId) {
    let marked = mark_new_elements(state, page, doc);
    let prefix = page.doc(doc).marker_prefix.clone();
    page.dispatch_custom(
        doc,
        INJECTION_COMPLETE,
        json!({ "success": true, "elementsMarked": marked, "prefix": prefix }),
    );
}
