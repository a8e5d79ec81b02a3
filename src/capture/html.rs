//! Event-triggered whole-document snapshots.
//!
//! A snapshot re-marks the owning document, folds gathered same-origin
//! frame HTML back in as `srcdoc`, and serializes the result with
//! same-origin styles and open shadow roots inlined. The bytes travel
//! on the record inline and are offloaded to the blob store downstream.
//!
//! Admission gates, in order: global enable; a readiness queue holding
//! requests that arrive before the document's marker has announced
//! itself (the page-load capture always passes); a cooldown between
//! consecutive captures with a short override window opened by `change`
//! events; a boolean lock so captures never overlap.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::capture::records::{EventPayload, EventRecord, HtmlCapturePayload};
use crate::host::dom::{DocId, NodeId};
use crate::host::page::PageHandle;
use crate::host::serialize::{self, SerializeOptions};
use crate::marker::bridge::MarkerBridge;
use crate::marker::MARKER_SCRIPT_ID;

/// Minimum spacing between consecutive captures.
pub const CAPTURE_COOLDOWN_MS: u64 = 3_000;
/// Admission window a `change` event opens through the cooldown.
pub const CHANGE_OVERRIDE_MS: u64 = 250;
/// Queued requests run without marker readiness after this long.
pub const READINESS_FALLBACK_MS: u64 = 3_000;
/// Overall deadline for collecting frame HTML.
pub const FRAME_GATHER_MS: u64 = 3_000;
/// Trigger name for the capture taken when a page finishes loading.
pub const NEW_PAGE_TRIGGER: &str = "new page loaded";

/// Same-origin frame handle: host iframe element, frame document, index.
pub type FrameTriple = (NodeId, DocId, usize);

/// What became of a capture request.
#[derive(Debug, PartialEq)]
pub enum CaptureOutcome {
    /// Snapshot taken. `html` is inline; `documentKey` is still unset.
    Captured(EventRecord),
    /// Held until the document's marker announces itself.
    Queued,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Cooldown,
    Locked,
}

struct Pending {
    doc: DocId,
    trigger: String,
    queued_at_ms: u64,
}

#[derive(Default)]
struct HcState {
    last_capture_ms: Option<u64>,
    override_until_ms: u64,
    in_flight: bool,
    queued: VecDeque<Pending>,
}

/// Snapshot scheduler for one page.
pub struct HtmlCapture {
    page: PageHandle,
    bridge: Arc<MarkerBridge>,
    enabled: AtomicBool,
    state: Mutex<HcState>,
}

impl HtmlCapture {
    pub fn new(page: PageHandle, bridge: Arc<MarkerBridge>, enabled: bool) -> Self {
        Self {
            page,
            bridge,
            enabled: AtomicBool::new(enabled),
            state: Mutex::new(HcState::default()),
        }
    }

    /// Flips the enable gate; reread from the rule file at each arm.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Requests a snapshot of `doc` on behalf of `trigger`. `frames`
    /// are the instrumented frames to fold into the document.
    pub async fn request(
        &self,
        doc: DocId,
        trigger: &str,
        frames: &[FrameTriple],
    ) -> CaptureOutcome {
        if !self.enabled.load(Ordering::Acquire) {
            return CaptureOutcome::Skipped(SkipReason::Disabled);
        }
        let now = self.page.lock().now_ms();
        if trigger != NEW_PAGE_TRIGGER && !self.bridge.is_marked(doc) {
            let mut state = self.state.lock();
            state.queued.push_back(Pending {
                doc,
                trigger: trigger.to_string(),
                queued_at_ms: now,
            });
            debug!(%trigger, "marker not ready, capture queued");
            return CaptureOutcome::Queued;
        }
        self.admit_and_capture(doc, trigger, frames, now).await
    }

    /// Runs queued requests whose document announced readiness or whose
    /// fallback elapsed. Called from the consumer loop.
    pub async fn pump(&self, frames: &[FrameTriple]) -> Vec<EventRecord> {
        let now = self.page.lock().now_ms();
        let due: Vec<Pending> = {
            let mut state = self.state.lock();
            let mut due = Vec::new();
            let mut held = VecDeque::new();
            while let Some(p) = state.queued.pop_front() {
                let expired = now.saturating_sub(p.queued_at_ms) >= READINESS_FALLBACK_MS;
                if self.bridge.is_marked(p.doc) || expired {
                    due.push(p);
                } else {
                    held.push_back(p);
                }
            }
            state.queued = held;
            due
        };

        let mut out = Vec::new();
        for p in due {
            if !self.bridge.is_marked(p.doc) {
                warn!(trigger = %p.trigger, "marker never became ready, capturing anyway");
            }
            if let CaptureOutcome::Captured(record) =
                self.admit_and_capture(p.doc, &p.trigger, frames, now).await
            {
                out.push(record);
            }
        }
        out
    }

    /// Clears per-page admission state when the session moves to a new
    /// document. Queued requests for the old document drop with it.
    pub fn reset_page_state(&self) {
        let mut state = self.state.lock();
        state.last_capture_ms = None;
        state.override_until_ms = 0;
        state.queued.clear();
    }

    pub fn queued_len(&self) -> usize {
        self.state.lock().queued.len()
    }

    async fn admit_and_capture(
        &self,
        doc: DocId,
        trigger: &str,
        frames: &[FrameTriple],
        now: u64,
    ) -> CaptureOutcome {
        if let Err(reason) = self.admit(trigger, now) {
            debug!(%trigger, ?reason, "capture skipped");
            return CaptureOutcome::Skipped(reason);
        }
        let record = self.perform(doc, trigger, frames).await;
        let mut state = self.state.lock();
        state.last_capture_ms = Some(record.timestamp);
        state.in_flight = false;
        CaptureOutcome::Captured(record)
    }

    /// Cooldown and lock check. On success the lock is held; the
    /// capture path releases it when the snapshot lands.
    fn admit(&self, trigger: &str, now: u64) -> std::result::Result<(), SkipReason> {
        let mut state = self.state.lock();
        if state.in_flight {
            return Err(SkipReason::Locked);
        }
        if trigger == "change" {
            state.override_until_ms = now + CHANGE_OVERRIDE_MS;
        }
        let cooling = state
            .last_capture_ms
            .map(|last| now.saturating_sub(last) < CAPTURE_COOLDOWN_MS)
            .unwrap_or(false);
        if cooling && now >= state.override_until_ms {
            return Err(SkipReason::Cooldown);
        }
        state.in_flight = true;
        Ok(())
    }

    async fn perform(&self, doc: DocId, trigger: &str, frames: &[FrameTriple]) -> EventRecord {
        // Fresh marks first. The snapshot path does not wait on the
        // acknowledgement; whatever marks exist at serialization win.
        self.bridge.dispatch_remark(&mut self.page.lock(), doc);

        let gathered = self
            .bridge
            .gather_frame_html(&self.page, frames, Duration::from_millis(FRAME_GATHER_MS))
            .await;

        let page = self.page.lock();
        let mut opts = SerializeOptions::page_capture(MARKER_SCRIPT_ID);
        opts.inline_frames = gathered;
        let html = serialize::document_html(&page, doc, &opts);
        let timestamp = page.now_ms();
        let url = page.doc(doc).url.clone();
        drop(page);

        info!(%trigger, bytes = html.len(), "page snapshot taken");
        EventRecord {
            kind: "htmlCapture".to_string(),
            timestamp,
            url,
            payload: EventPayload::HtmlCapture(HtmlCapturePayload {
                event_type: trigger.to_string(),
                document_key: None,
                html: Some(html),
            }),
            ..Default::default()
        }
    }
}
