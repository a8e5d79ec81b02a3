//! Engine side of the marker protocol.
//!
//! Injection is idempotent per document, keyed on the script element
//! id. Completion, re-mark acknowledgements, and frame observation
//! replies arrive on the custom-event bus and the frame message sink;
//! the bridge turns them into awaitable state for the async layer.
//! Every wait here is bounded: a missing or stuck marker degrades the
//! session to fallback identifiers, it never wedges it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::host::dom::{DocId, NodeId};
use crate::host::event::ListenerTier;
use crate::host::page::{FrameMessage, Page, PageHandle};
use crate::marker::{
    Marker, FRAME_OBSERVATION_COMPLETE, FRAME_OBSERVATION_REQUEST, INJECTION_COMPLETE,
    MARKER_SCRIPT_ID, REMARK_COMPLETE, REMARK_REQUEST,
};
use crate::utils::errors::{EngineError, Result};

/// How long a document may take to acknowledge injection.
pub const INJECTION_TIMEOUT_MS: u64 = 10_000;
/// How long a capture waits for fresh marks before proceeding.
pub const REMARK_WAIT_MS: u64 = 1_000;

/// Payload of an injection acknowledgement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkSummary {
    pub success: bool,
    pub elements_marked: Option<u64>,
    pub prefix: Option<String>,
}

struct BridgeShared {
    marked: Mutex<HashMap<DocId, MarkSummary>>,
    attached: Mutex<HashSet<DocId>>,
    remark_generation: AtomicU64,
    notify: Notify,
}

pub struct MarkerBridge {
    shared: Arc<BridgeShared>,
    marker: Mutex<Box<dyn Marker>>,
    frame_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FrameMessage>>,
}

impl MarkerBridge {
    /// Wires the bridge to a page. Takes over the frame message sink.
    pub fn new(page: &mut Page, marker: Box<dyn Marker>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        page.set_message_sink(tx);
        Self {
            shared: Arc::new(BridgeShared {
                marked: Mutex::new(HashMap::new()),
                attached: Mutex::new(HashSet::new()),
                remark_generation: AtomicU64::new(0),
                notify: Notify::new(),
            }),
            marker: Mutex::new(marker),
            frame_rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Registers bus listeners for one document. Idempotent.
    fn attach(&self, page: &mut Page, doc: DocId) {
        if !self.shared.attached.lock().insert(doc) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        page.add_custom_listener(
            doc,
            INJECTION_COMPLETE,
            ListenerTier::Bridge,
            Box::new(move |_page, event| {
                let summary = MarkSummary {
                    success: event
                        .detail
                        .get("success")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    elements_marked: event.detail.get("elementsMarked").and_then(Value::as_u64),
                    prefix: event
                        .detail
                        .get("prefix")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                };
                debug!(doc = ?event.doc, ?summary, "marker injection complete");
                shared.marked.lock().insert(event.doc, summary);
                shared.notify.notify_waiters();
            }),
        );
        let shared = Arc::clone(&self.shared);
        page.add_custom_listener(
            doc,
            REMARK_COMPLETE,
            ListenerTier::Bridge,
            Box::new(move |_page, _event| {
                shared.remark_generation.fetch_add(1, Ordering::AcqRel);
                shared.notify.notify_waiters();
            }),
        );
    }

    /// Injects the marker script into one document. Returns false when
    /// the script element is already present.
    pub fn inject(&self, page: &mut Page, doc: DocId, prefix: Option<&str>) -> bool {
        self.attach(page, doc);
        if page.dom(doc).find_by_id(MARKER_SCRIPT_ID).is_some() {
            debug!(?doc, "marker script already present");
            return false;
        }
        let dom = page.dom(doc);
        let parent = dom
            .find_by_tag("head")
            .or_else(|| dom.find_by_tag("html"))
            .unwrap_or_else(|| dom.root());
        page.append_element(doc, parent, "script", &[("id", MARKER_SCRIPT_ID)]);
        self.marker.lock().install(page, doc, prefix);
        true
    }

    pub fn is_marked(&self, doc: DocId) -> bool {
        self.shared.marked.lock().contains_key(&doc)
    }

    pub fn mark_summary(&self, doc: DocId) -> Option<MarkSummary> {
        self.shared.marked.lock().get(&doc).cloned()
    }

    /// Waits for a document's injection acknowledgement.
    pub async fn await_marked(&self, doc: DocId, timeout: Duration) -> Result<MarkSummary> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(summary) = self.shared.marked.lock().get(&doc).cloned() {
                return Ok(summary);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(EngineError::MarkerUnavailable(format!(
                    "injection ack timed out for document {}",
                    doc.0
                )));
            }
        }
    }

    /// Fire-and-forget re-mark. Snapshot paths use this: freshness is
    /// best-effort there and nothing waits on the acknowledgement.
    pub fn dispatch_remark(&self, page: &mut Page, doc: DocId) {
        let ts = page.now_ms();
        page.dispatch_custom(doc, REMARK_REQUEST, json!({ "timestamp": ts }));
    }

    /// Asks the marker to mark newly added elements and waits for the
    /// acknowledgement. Returns false on timeout; callers proceed with
    /// whatever marks exist.
    pub async fn request_remark(&self, page: &PageHandle, doc: DocId) -> bool {
        let before = self.shared.remark_generation.load(Ordering::Acquire);
        self.dispatch_remark(&mut page.lock(), doc);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(REMARK_WAIT_MS);
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.remark_generation.load(Ordering::Acquire) > before {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(?doc, "re-mark timed out, proceeding with stale marks");
                return false;
            }
        }
    }

    /// Asks each frame marker for its document HTML and collects the
    /// replies, keyed by iframe element for srcdoc substitution. Frames
    /// that stay silent past the deadline are simply absent from the
    /// result.
    pub async fn gather_frame_html(
        &self,
        page: &PageHandle,
        frames: &[(NodeId, DocId, usize)],
        timeout: Duration,
    ) -> HashMap<NodeId, String> {
        let mut out = HashMap::new();
        if frames.is_empty() {
            return out;
        }
        let mut rx = self.frame_rx.lock().await;
        // Drop replies left over from an earlier gather.
        while rx.try_recv().is_ok() {}

        let mut waiting: HashMap<u64, NodeId> = frames
            .iter()
            .map(|(element, _, index)| (*index as u64, *element))
            .collect();
        {
            let mut page = page.lock();
            for (_, doc, index) in frames {
                page.dispatch_custom(
                    *doc,
                    FRAME_OBSERVATION_REQUEST,
                    json!({ "iframeId": index }),
                );
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while !waiting.is_empty() {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(msg)) => {
                    let payload = &msg.payload;
                    if payload.get("type").and_then(Value::as_str)
                        != Some(FRAME_OBSERVATION_COMPLETE)
                    {
                        continue;
                    }
                    let Some(id) = payload.get("iframeId").and_then(Value::as_u64) else {
                        continue;
                    };
                    let Some(html) = payload.get("html").and_then(Value::as_str) else {
                        continue;
                    };
                    if let Some(element) = waiting.remove(&id) {
                        out.insert(element, html.to_string());
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = waiting.len(), "frame observation gather timed out");
                    break;
                }
            }
        }
        out
    }
}
