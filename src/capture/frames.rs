//! Frame discovery and instrumentation.
//!
//! Same-origin frames are full capture surfaces: each gets a stable
//! index in discovery order, an identifier prefix `iframe<N>_`, and the
//! same listener tiers as the top document. Cross-origin frames cannot
//! be reached and are counted, not touched. Frames still loading are
//! deferred behind a readiness listener and picked up when complete.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::host::dom::{DocId, NodeId};
use crate::host::event::{ListenerId, ListenerTier, Phase};
use crate::host::page::{Page, ReadyState};

/// Called under the page lock when a deferred frame finishes loading.
pub type FrameReadyHook = Arc<dyn Fn(&mut Page, DocId) + Send + Sync>;

/// One discovered frame, instrumented or skipped.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub doc: DocId,
    pub host_doc: DocId,
    pub element: NodeId,
    /// Index among instrumented frames; unset for cross-origin skips.
    pub index: Option<usize>,
    pub prefix: Option<String>,
    pub url: String,
    pub same_origin: bool,
}

#[derive(Default)]
pub struct FrameManager {
    frames: HashMap<DocId, FrameRecord>,
    pending: HashMap<DocId, ListenerId>,
    next_index: usize,
}

impl FrameManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans every frame document and instruments the new same-origin
    /// ones. Returns records for frames instrumented by this call, in
    /// index order; the caller attaches listeners and injects markers.
    pub fn discover(&mut self, page: &mut Page, on_ready: &FrameReadyHook) -> Vec<FrameRecord> {
        let mut fresh = Vec::new();
        for doc in page.doc_ids() {
            if doc.is_main() || self.frames.contains_key(&doc) {
                continue;
            }
            let Some((host_doc, element)) = page.doc(doc).frame_host else {
                continue;
            };
            let url = page.doc(doc).url.clone();

            if !page.same_origin(host_doc, doc) {
                info!(?doc, %url, "skipping cross-origin frame");
                self.frames.insert(
                    doc,
                    FrameRecord {
                        doc,
                        host_doc,
                        element,
                        index: None,
                        prefix: None,
                        url,
                        same_origin: false,
                    },
                );
                continue;
            }

            if page.doc(doc).ready == ReadyState::Loading {
                self.defer_until_ready(page, doc, on_ready);
                continue;
            }

            let index = self.next_index;
            self.next_index += 1;
            let prefix = format!("iframe{index}_");
            page.doc_mut(doc).marker_prefix = Some(prefix.clone());
            let record = FrameRecord {
                doc,
                host_doc,
                element,
                index: Some(index),
                prefix: Some(prefix),
                url,
                same_origin: true,
            };
            debug!(?doc, index, "frame instrumented");
            self.frames.insert(doc, record.clone());
            fresh.push(record);
        }
        fresh
    }

    /// Readiness listener for a frame still loading. The listener stays
    /// until [`resolve_pending`](Self::resolve_pending) removes it.
    fn defer_until_ready(&mut self, page: &mut Page, doc: DocId, on_ready: &FrameReadyHook) {
        if self.pending.contains_key(&doc) {
            return;
        }
        let root = page.dom(doc).root();
        let hook = Arc::clone(on_ready);
        let id = page.add_listener(
            doc,
            root,
            "readystatechange",
            Phase::Capture,
            ListenerTier::Bridge,
            Box::new(move |page, flow| {
                if page.doc(flow.event.doc).ready == ReadyState::Complete {
                    let done = flow.event.doc;
                    hook(page, done);
                }
            }),
        );
        self.pending.insert(doc, id);
        debug!(?doc, "frame still loading, instrumentation deferred");
    }

    /// Drops the readiness listener once a deferred frame came back.
    pub fn resolve_pending(&mut self, page: &mut Page, doc: DocId) {
        if let Some(id) = self.pending.remove(&doc) {
            page.remove_listener(id);
        }
    }

    pub fn is_instrumented(&self, doc: DocId) -> bool {
        self.frames
            .get(&doc)
            .map(|f| f.same_origin)
            .unwrap_or(false)
    }

    pub fn prefix_for(&self, doc: DocId) -> Option<&str> {
        self.frames.get(&doc).and_then(|f| f.prefix.as_deref())
    }

    /// Instrumented frames in index order.
    pub fn instrumented(&self) -> Vec<&FrameRecord> {
        let mut frames: Vec<&FrameRecord> = self
            .frames
            .values()
            .filter(|f| f.same_origin)
            .collect();
        frames.sort_by_key(|f| f.index);
        frames
    }

    pub fn skipped_cross_origin(&self) -> u64 {
        self.frames.values().filter(|f| !f.same_origin).count() as u64
    }
}
