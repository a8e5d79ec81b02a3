//! Session recorder: the full capture pipeline for one page.
//!
//! Dispatch hooks run synchronously under the page lock and do the
//! minimum: freeze a target snapshot, apply the enqueue-time ignore
//! rules, push. An async consumer drains the queue, resolves stable
//! identifiers (marker attribute, one re-mark, deterministic fallback),
//! shapes the kind-specific payload, and emits finalized records on a
//! channel as one serial stream. Record sequence numbers are assigned
//! at emission and nowhere else, so the emitted order is the canonical
//! order even when snapshot records interleave with events.
//!
//! Debounced kinds (input, scroll) hold a trailing slot per target and
//! flush through the same enqueue path, so every record passes the same
//! rules regardless of route.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::capture::frames::{FrameManager, FrameReadyHook};
use crate::capture::html::{CaptureOutcome, FrameTriple, HtmlCapture, SkipReason, NEW_PAGE_TRIGGER};
use crate::capture::identity;
use crate::capture::listeners::{CaptureHook, ListenerManager};
use crate::capture::prebuffer::Prebuffer;
use crate::capture::queue::{EventQueue, IgnoreState, QueuedCapture, ScrollCapture};
use crate::capture::records::{
    ClickPayload, EventPayload, EventRecord, IframeInfo, InputPayload, KeyboardPayload,
    NavigationPayload, ScrollPayload, SelectionPayload,
};
use crate::capture::snapshot::{self, TargetSnapshot};
use crate::config::capture::{CaptureConfig, HandlerKind};
use crate::host::dom::{DocId, NodeId};
use crate::host::event::{DomEvent, EventDetail, EventFlow};
use crate::host::page::{MutationKind, Page, PageHandle};
use crate::marker::bridge::MarkerBridge;
use crate::marker::Marker;
use crate::utils::errors::Result;

/// Trailing window for bursty text input.
pub const INPUT_DEBOUNCE_MS: u64 = 300;
/// Trailing window for scroll streams.
pub const SCROLL_DEBOUNCE_MS: u64 = 100;
/// Consumer wakeup interval when no capture nudges it.
const CONSUMER_TICK_MS: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DebounceKind {
    Input,
    Scroll,
}

/// Trailing-debounce slot for one target. Each occurrence pushes the
/// deadline out and replaces the snapshot; scroll deltas accumulate.
struct PendingDebounce {
    kind: String,
    due_ms: u64,
    timestamp: u64,
    detail: EventDetail,
    snapshot: TargetSnapshot,
    scroll: Option<ScrollCapture>,
    iframe: Option<IframeInfo>,
}

struct Armed {
    task_id: String,
    config: CaptureConfig,
}

#[derive(Default)]
struct CaptureState {
    armed: Option<Armed>,
    prebuffer: Prebuffer,
    ignore: IgnoreState,
    debounces: HashMap<(DocId, NodeId, DebounceKind), PendingDebounce>,
    seen_click: bool,
    captured: u64,
    ignored: u64,
}

/// State reachable from the synchronous dispatch hooks.
struct SessionShared {
    queue: EventQueue,
    state: Mutex<CaptureState>,
    capture_ordinal: AtomicU64,
    emitted: AtomicU64,
    frames_dirty: AtomicBool,
    ready_frames: Mutex<Vec<DocId>>,
    wake: Notify,
}

impl SessionShared {
    /// Hook body. Runs under the page lock during dispatch; never
    /// blocks, never reaches for another engine lock besides `state`.
    fn observe(&self, page: &mut Page, flow: &EventFlow) {
        let event = &flow.event;
        let mut st = self.state.lock();
        let snapshot = snapshot::capture(page, event.doc, event.target);

        let Some(armed) = st.armed.as_ref() else {
            let now = page.now_ms();
            st.prebuffer.push(now, event.clone(), snapshot);
            return;
        };
        let handler = armed
            .config
            .handler_for(&event.name)
            .unwrap_or(HandlerKind::Record);

        let scroll = scroll_state(page, event);
        let iframe = frame_context(page, event.doc);

        match handler {
            HandlerKind::Record => {
                self.enqueue(
                    &mut st,
                    page,
                    &event.name,
                    event.timestamp,
                    event.doc,
                    event.target,
                    event.detail.clone(),
                    snapshot,
                    scroll,
                    iframe,
                );
            }
            HandlerKind::DebouncedInput => {
                let key = (event.doc, event.target, DebounceKind::Input);
                st.debounces.insert(
                    key,
                    PendingDebounce {
                        kind: event.name.clone(),
                        due_ms: event.timestamp + INPUT_DEBOUNCE_MS,
                        timestamp: event.timestamp,
                        detail: event.detail.clone(),
                        snapshot,
                        scroll: None,
                        iframe,
                    },
                );
            }
            HandlerKind::DebouncedScroll => {
                let key = (event.doc, event.target, DebounceKind::Scroll);
                match st.debounces.entry(key) {
                    Entry::Occupied(mut slot) => {
                        let p = slot.get_mut();
                        p.due_ms = event.timestamp + SCROLL_DEBOUNCE_MS;
                        p.timestamp = event.timestamp;
                        p.detail = event.detail.clone();
                        p.snapshot = snapshot;
                        match (p.scroll.as_mut(), scroll) {
                            (Some(acc), Some(new)) => {
                                acc.delta_y += new.delta_y;
                                acc.scroll_x = new.scroll_x;
                                acc.scroll_y = new.scroll_y;
                            }
                            (None, new) => p.scroll = new,
                            _ => {}
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(PendingDebounce {
                            kind: event.name.clone(),
                            due_ms: event.timestamp + SCROLL_DEBOUNCE_MS,
                            timestamp: event.timestamp,
                            detail: event.detail.clone(),
                            snapshot,
                            scroll,
                            iframe,
                        });
                    }
                }
            }
        }
        self.wake.notify_one();
    }

    /// Single entry point into the queue: ignore rules, value ledger,
    /// ordinal assignment. Both the hook and the debounce flush land
    /// here.
    #[allow(clippy::too_many_arguments)]
    fn enqueue(
        &self,
        st: &mut CaptureState,
        page: &Page,
        kind: &str,
        timestamp: u64,
        doc: DocId,
        node: NodeId,
        detail: EventDetail,
        snapshot: TargetSnapshot,
        scroll: Option<ScrollCapture>,
        iframe: Option<IframeInfo>,
    ) {
        if let Err(reason) =
            st.ignore
                .check(kind, timestamp, doc, node, &detail, &snapshot, scroll.as_ref())
        {
            st.ignored += 1;
            debug!(kind, ?reason, "capture ignored");
            return;
        }
        let previous_value = matches!(kind, "input" | "change")
            .then(|| st.ignore.previous_value(doc, node));
        st.ignore.accept(kind, timestamp, doc, node, &detail);
        if matches!(kind, "input" | "change") {
            st.ignore.record_value(doc, node, &snapshot.value);
        }
        let from_user_input = st.seen_click;
        if kind == "click" {
            st.seen_click = true;
        }

        let capture = QueuedCapture {
            sequence_number: self.capture_ordinal.fetch_add(1, Ordering::Relaxed),
            timestamp,
            kind: kind.to_string(),
            url: page.doc(doc).url.clone(),
            doc,
            detail,
            snapshot,
            iframe,
            previous_value,
            scroll,
            from_user_input,
        };
        if self.queue.push(capture) {
            st.captured += 1;
        }
    }

    /// Flushes debounce slots that came due (or all of them, on stop)
    /// in event order.
    fn flush_debounces(&self, page: &Page, now: u64, force: bool) {
        let mut st = self.state.lock();
        if st.armed.is_none() {
            st.debounces.clear();
            return;
        }
        let mut due: Vec<(DocId, NodeId, DebounceKind)> = st
            .debounces
            .iter()
            .filter(|(_, p)| force || now >= p.due_ms)
            .map(|(key, _)| *key)
            .collect();
        due.sort_by_key(|key| st.debounces[key].timestamp);
        for key in due {
            if let Some(p) = st.debounces.remove(&key) {
                let PendingDebounce {
                    kind,
                    timestamp,
                    detail,
                    snapshot,
                    scroll,
                    iframe,
                    ..
                } = p;
                self.enqueue(
                    &mut st, page, &kind, timestamp, key.0, key.1, detail, snapshot, scroll,
                    iframe,
                );
            }
        }
    }
}

/// Counters for one recorder, frozen at read time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub captured: u64,
    pub ignored: u64,
    pub emitted: u64,
    pub queue_dropped: u64,
    pub prebuffer_evicted: u64,
    pub frames_instrumented: u64,
    pub cross_origin_frames: u64,
}

/// Owns the capture pipeline for one page: listener tiers, frame
/// instrumentation, the queue consumer, and snapshot scheduling.
pub struct SessionRecorder {
    page: PageHandle,
    bridge: Arc<MarkerBridge>,
    hc: Arc<HtmlCapture>,
    shared: Arc<SessionShared>,
    listeners: Mutex<ListenerManager>,
    frames: Mutex<FrameManager>,
    hook: CaptureHook,
    frame_ready: FrameReadyHook,
    events_tx: mpsc::UnboundedSender<EventRecord>,
    emitted_seq: AtomicU64,
    rules_path: Option<PathBuf>,
    observer_id: Mutex<Option<u64>>,
    pending_page_load: AtomicBool,
    shutting_down: AtomicBool,
}

impl SessionRecorder {
    /// Builds the recorder around a page and takes ownership of it.
    /// Critical listeners attach immediately so the prebuffer sees
    /// interactions from before the first arm.
    pub fn new(
        mut page: Page,
        marker: Box<dyn Marker>,
        rules_path: Option<PathBuf>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<EventRecord>) {
        let bridge = Arc::new(MarkerBridge::new(&mut page, marker));
        let shared = Arc::new(SessionShared {
            queue: EventQueue::default(),
            state: Mutex::new(CaptureState::default()),
            capture_ordinal: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            frames_dirty: AtomicBool::new(false),
            ready_frames: Mutex::new(Vec::new()),
            wake: Notify::new(),
        });
        let hook: CaptureHook = {
            let shared = Arc::clone(&shared);
            Arc::new(move |page, flow| shared.observe(page, flow))
        };
        let frame_ready: FrameReadyHook = {
            let shared = Arc::clone(&shared);
            Arc::new(move |_page, doc| {
                shared.ready_frames.lock().push(doc);
                shared.frames_dirty.store(true, Ordering::Release);
                shared.wake.notify_one();
            })
        };

        let mut listeners = ListenerManager::new();
        listeners.attach_critical(&mut page, DocId::MAIN, &hook);
        let page = page.shared();
        let hc = Arc::new(HtmlCapture::new(
            Arc::clone(&page),
            Arc::clone(&bridge),
            true,
        ));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let recorder = Arc::new(Self {
            page,
            bridge,
            hc,
            shared,
            listeners: Mutex::new(listeners),
            frames: Mutex::new(FrameManager::new()),
            hook,
            frame_ready,
            events_tx,
            emitted_seq: AtomicU64::new(0),
            rules_path,
            observer_id: Mutex::new(None),
            pending_page_load: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        });
        (recorder, events_rx)
    }

    pub fn page(&self) -> PageHandle {
        Arc::clone(&self.page)
    }

    pub fn bridge(&self) -> Arc<MarkerBridge> {
        Arc::clone(&self.bridge)
    }

    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().armed.is_some()
    }

    /// Starts (or re-starts, after a navigation) recording. Reloads the
    /// rule file, flushes the prebuffer into the queue ahead of
    /// anything new, instruments the page, and schedules the page-load
    /// snapshot. `resume_seq` seeds record numbering; pass the
    /// persisted event count when re-arming mid-task.
    pub fn arm(&self, task_id: &str, start_ms: u64, resume_seq: u64) -> Result<()> {
        let config = self.load_config()?;
        self.hc.set_enabled(config.html_capture_enabled());
        self.emitted_seq.store(resume_seq, Ordering::SeqCst);

        let mut page = self.page.lock();
        {
            let mut st = self.shared.state.lock();
            if st.armed.is_some() {
                info!(task = task_id, "re-arming, instrumentation refreshed");
            }
            st.armed = Some(Armed {
                task_id: task_id.to_string(),
                config: config.clone(),
            });
            let drained = st.prebuffer.drain(start_ms);
            if !drained.is_empty() {
                info!(count = drained.len(), "prebuffered events flushed into recording");
            }
            for buffered in drained {
                let event = buffered.event;
                let iframe = frame_context(&page, event.doc);
                self.shared.enqueue(
                    &mut st,
                    &page,
                    &event.name,
                    event.timestamp,
                    event.doc,
                    event.target,
                    event.detail,
                    buffered.snapshot,
                    None,
                    iframe,
                );
            }
        }
        {
            let mut listeners = self.listeners.lock();
            listeners.attach_critical(&mut page, DocId::MAIN, &self.hook);
            listeners.attach_configured(&mut page, DocId::MAIN, &config, &self.hook);
        }
        self.bridge.inject(&mut page, DocId::MAIN, None);
        self.instrument_frames(&mut page, &config);
        if config.dynamic_dom() {
            self.watch_mutations(&mut page);
        }
        drop(page);

        if config.html_capture_enabled() {
            self.pending_page_load.store(true, Ordering::Release);
        }
        self.shared.wake.notify_one();
        info!(task = task_id, start_ms, resume_seq, "session recorder armed");
        Ok(())
    }

    /// Stops recording: pending debounces flush, the queue drains, and
    /// only then does the armed flag drop, so nothing captured before
    /// the stop is lost. Critical listeners stay for the next session.
    pub async fn stop(&self) -> SessionStats {
        {
            let page = self.page.lock();
            let now = page.now_ms();
            self.shared.flush_debounces(&page, now, true);
        }
        self.drain_queue(false).await;
        {
            let mut page = self.page.lock();
            let task = {
                let mut st = self.shared.state.lock();
                st.debounces.clear();
                st.armed.take().map(|a| a.task_id)
            };
            self.listeners.lock().detach_configured_all(&mut page);
            if let Some(id) = self.observer_id.lock().take() {
                page.unobserve_mutations(id);
            }
            if let Some(task) = task {
                info!(task = %task, "session recorder stopped");
            }
        }
        self.hc.reset_page_state();
        self.stats()
    }

    /// One consumer pass: late frames, the page-load snapshot, due
    /// debounces, the queue, released snapshot requests. The spawned
    /// consumer calls this on every wakeup; tests call it directly.
    pub async fn pump(&self) {
        if self.shared.frames_dirty.swap(false, Ordering::AcqRel) {
            let config = self
                .shared
                .state
                .lock()
                .armed
                .as_ref()
                .map(|a| a.config.clone());
            if let Some(config) = config {
                let mut page = self.page.lock();
                let ready: Vec<DocId> = std::mem::take(&mut *self.shared.ready_frames.lock());
                {
                    let mut frames = self.frames.lock();
                    for doc in ready {
                        frames.resolve_pending(&mut page, doc);
                    }
                }
                self.instrument_frames(&mut page, &config);
            }
        }

        if self.pending_page_load.swap(false, Ordering::AcqRel) {
            let triples = self.frame_triples();
            match self.hc.request(DocId::MAIN, NEW_PAGE_TRIGGER, &triples).await {
                CaptureOutcome::Captured(record) => self.emit(record),
                CaptureOutcome::Skipped(SkipReason::Locked) => {
                    self.pending_page_load.store(true, Ordering::Release);
                }
                _ => {}
            }
        }

        {
            let page = self.page.lock();
            let now = page.now_ms();
            self.shared.flush_debounces(&page, now, false);
        }

        self.drain_queue(true).await;

        let released = self.hc.pump(&self.frame_triples()).await;
        for record in released {
            self.emit(record);
        }
    }

    /// Runs the consumer until [`shutdown`](Self::shutdown).
    pub fn spawn_consumer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(CONSUMER_TICK_MS));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = recorder.shared.wake.notified() => {}
                    _ = tick.tick() => {}
                }
                if recorder.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                recorder.pump().await;
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }

    pub fn stats(&self) -> SessionStats {
        let st = self.shared.state.lock();
        let queue = self.shared.queue.stats();
        let frames = self.frames.lock();
        SessionStats {
            captured: st.captured,
            ignored: st.ignored,
            emitted: self.shared.emitted.load(Ordering::Relaxed),
            queue_dropped: queue.dropped,
            prebuffer_evicted: st.prebuffer.evicted(),
            frames_instrumented: frames.instrumented().len() as u64,
            cross_origin_frames: frames.skipped_cross_origin(),
        }
    }

    async fn drain_queue(&self, with_snapshots: bool) {
        while let Some(entry) = self.shared.queue.pop() {
            if !self.is_armed() {
                debug!(kind = %entry.kind, "recording stopped, capture dropped");
                continue;
            }
            let doc = entry.doc;
            let trigger = entry.kind.clone();
            let record = self.enrich(entry).await;
            self.emit(record);
            if with_snapshots {
                let triples = self.frame_triples();
                if let CaptureOutcome::Captured(capture) =
                    self.hc.request(doc, &trigger, &triples).await
                {
                    self.emit(capture);
                }
            }
        }
    }

    /// Turns a queued capture into its finalized record. The sequence
    /// number is left for [`emit`](Self::emit).
    async fn enrich(&self, entry: QueuedCapture) -> EventRecord {
        let bid = self.resolve_bid(&entry).await;
        let payload = build_payload(&entry);
        let target = snapshot::into_target_info(&entry.snapshot, bid);
        let (is_in_iframe, iframe_url, top_url) = match entry.iframe {
            Some(ref i) => (true, Some(i.iframe_url.clone()), i.top_url.clone()),
            None => (false, None, None),
        };
        EventRecord {
            kind: entry.kind,
            timestamp: entry.timestamp,
            url: entry.url,
            target: Some(target),
            is_in_iframe,
            iframe_url,
            top_url,
            payload,
            ..Default::default()
        }
    }

    /// Identifier resolution: the marker attribute frozen at capture
    /// time wins; with a live marker, one re-mark then a re-read; the
    /// deterministic fallback is written back so later captures of the
    /// same element agree.
    async fn resolve_bid(&self, entry: &QueuedCapture) -> String {
        if let Some(bid) = &entry.snapshot.cached_bid {
            return bid.clone();
        }
        if self.bridge.is_marked(entry.doc) {
            self.bridge.request_remark(&self.page, entry.doc).await;
            let page = self.page.lock();
            if let Some(bid) = identity::marker_bid(&page, entry.doc, entry.snapshot.node) {
                return bid;
            }
        }
        let bid = entry.snapshot.fallback_bid.clone();
        let mut page = self.page.lock();
        if identity::write_back(&mut page, entry.doc, entry.snapshot.node, &bid) {
            debug!(%bid, "fallback identifier written back");
        }
        bid
    }

    fn emit(&self, mut record: EventRecord) {
        record.sequence_number = self.emitted_seq.fetch_add(1, Ordering::SeqCst);
        self.shared.emitted.fetch_add(1, Ordering::Relaxed);
        if self.events_tx.send(record).is_err() {
            warn!("record receiver dropped, event lost");
        }
    }

    fn frame_triples(&self) -> Vec<FrameTriple> {
        self.frames
            .lock()
            .instrumented()
            .iter()
            .map(|f| (f.element, f.doc, f.index.unwrap_or(0)))
            .collect()
    }

    /// Discovers new frames and gives each the full treatment:
    /// listener tiers plus a prefixed marker injection.
    fn instrument_frames(&self, page: &mut Page, config: &CaptureConfig) {
        let fresh = self.frames.lock().discover(page, &self.frame_ready);
        if fresh.is_empty() {
            return;
        }
        let mut listeners = self.listeners.lock();
        for frame in fresh {
            listeners.attach_critical(page, frame.doc, &self.hook);
            listeners.attach_configured(page, frame.doc, config, &self.hook);
            self.bridge.inject(page, frame.doc, frame.prefix.as_deref());
        }
    }

    /// Subtree additions may carry frames; the observer only flags,
    /// the consumer re-discovers.
    fn watch_mutations(&self, page: &mut Page) {
        let mut slot = self.observer_id.lock();
        if slot.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let id = page.observe_mutations(Box::new(move |_page, records| {
            let added = records
                .iter()
                .any(|r| matches!(r.kind, MutationKind::ChildrenAdded { .. }));
            if added {
                shared.frames_dirty.store(true, Ordering::Release);
                shared.wake.notify_one();
            }
        }));
        *slot = Some(id);
    }

    fn load_config(&self) -> Result<CaptureConfig> {
        match &self.rules_path {
            Some(path) => CaptureConfig::load_from(path),
            None => Ok(CaptureConfig::default()),
        }
    }
}

/// Kind-specific payload from the frozen capture.
fn build_payload(entry: &QueuedCapture) -> EventPayload {
    match &entry.detail {
        EventDetail::Mouse(m) => EventPayload::Click(ClickPayload {
            x: m.client_x,
            y: m.client_y,
            screen_x: m.screen_x,
            screen_y: m.screen_y,
            button: m.button,
            modifiers: m.modifiers,
        }),
        EventDetail::Key(k) => EventPayload::Keyboard(KeyboardPayload {
            key: k.key.clone(),
            code: k.code.clone(),
            repeat: k.repeat,
            modifiers: k.modifiers,
        }),
        EventDetail::Input(i) => EventPayload::Input(InputPayload {
            input_type: Some(i.input_type.clone()),
            data: i.data.clone(),
            value: entry.snapshot.value.clone(),
            old_value: entry.previous_value.clone().unwrap_or_default(),
            selection_start: entry.snapshot.selection.map(|s| s.0),
            selection_end: entry.snapshot.selection.map(|s| s.1),
        }),
        EventDetail::Scroll(_) => {
            let s = entry.scroll.unwrap_or_default();
            EventPayload::Scroll(ScrollPayload {
                scroll_x: s.scroll_x,
                scroll_y: s.scroll_y,
                delta_y: s.delta_y,
            })
        }
        EventDetail::Navigation(n) => EventPayload::Navigation(NavigationPayload {
            category: "navigation".to_string(),
            from_url: n.from_url.clone(),
            to_url: n.to_url.clone(),
            referrer: n.referrer.clone(),
            from_user_input: entry.from_user_input,
        }),
        EventDetail::None => match entry.kind.as_str() {
            "change" => EventPayload::Input(InputPayload {
                input_type: None,
                data: None,
                value: entry.snapshot.value.clone(),
                old_value: entry.previous_value.clone().unwrap_or_default(),
                selection_start: entry.snapshot.selection.map(|s| s.0),
                selection_end: entry.snapshot.selection.map(|s| s.1),
            }),
            "selectstart" => EventPayload::Selection(SelectionPayload {
                selection_start: entry.snapshot.selection.map(|s| s.0),
                selection_end: entry.snapshot.selection.map(|s| s.1),
            }),
            _ => EventPayload::Empty {},
        },
    }
}

/// Frame context for an event originating in `doc`. Cross-origin
/// frames keep `top_url` unset.
fn frame_context(page: &Page, doc: DocId) -> Option<IframeInfo> {
    if doc.is_main() {
        return None;
    }
    let same_origin = page
        .doc(doc)
        .frame_host
        .map(|(host, _)| page.same_origin(host, doc))
        .unwrap_or(false);
    Some(IframeInfo {
        iframe_url: page.doc(doc).url.clone(),
        top_url: same_origin.then(|| page.main_url()),
    })
}

/// Scroll geometry at dispatch time: element offsets for element
/// scrolls, document offsets for the root.
fn scroll_state(page: &Page, event: &DomEvent) -> Option<ScrollCapture> {
    let EventDetail::Scroll(s) = &event.detail else {
        return None;
    };
    let doc = page.doc(event.doc);
    let (scroll_x, scroll_y) = page
        .dom(event.doc)
        .element(event.target)
        .map(|el| (el.scroll_x, el.scroll_y))
        .unwrap_or((doc.scroll_x, doc.scroll_y));
    Some(ScrollCapture {
        scroll_x,
        scroll_y,
        delta_y: s.delta_y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::marker::{ScriptedMarker, ScriptedMarkerHandle};
    use crate::utils::time::ManualClock;

    struct Rig {
        clock: Arc<ManualClock>,
        recorder: Arc<SessionRecorder>,
        rx: mpsc::UnboundedReceiver<EventRecord>,
        marker: ScriptedMarkerHandle,
        _rules_dir: Option<TempDir>,
    }

    fn rig(html: &str, overrides: Option<serde_json::Value>) -> Rig {
        let clock = ManualClock::new(0);
        let page = Page::with_html(clock.clone(), "https://shop.example.com/a", html);
        let marker = ScriptedMarker::new();
        let handle = marker.handle();
        let (rules_dir, rules_path) = match overrides {
            Some(o) => {
                let dir = TempDir::new().unwrap();
                let path = dir.path().join("capture.json");
                std::fs::write(&path, o.to_string()).unwrap();
                (Some(dir), Some(path))
            }
            None => (None, None),
        };
        let (recorder, rx) = SessionRecorder::new(page, Box::new(marker), rules_path);
        Rig {
            clock,
            recorder,
            rx,
            marker: handle,
            _rules_dir: rules_dir,
        }
    }

    fn no_html() -> serde_json::Value {
        json!({ "htmlCapture": { "enabled": false } })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<EventRecord>) -> Vec<EventRecord> {
        let mut out = Vec::new();
        while let Ok(record) = rx.try_recv() {
            out.push(record);
        }
        out
    }

    fn find(page: &PageHandle, doc: DocId, id: &str) -> NodeId {
        page.lock().dom(doc).find_by_id(id).unwrap()
    }

    #[tokio::test]
    async fn test_prebuffered_click_flushes_ahead_of_new_events() {
        let mut rig = rig("<button id=\"buy\">Buy</button>", Some(no_html()));
        let page = rig.recorder.page();
        let buy = find(&page, DocId::MAIN, "buy");

        rig.clock.advance(900);
        page.lock().click(DocId::MAIN, buy, 10.0, 10.0);
        rig.clock.advance(100);
        rig.recorder.arm("task-pb", 1_000, 0).unwrap();
        rig.recorder.pump().await;

        rig.clock.advance(500);
        page.lock().click(DocId::MAIN, buy, 50.0, 40.0);
        rig.recorder.pump().await;

        let records = drain(&mut rig.rx);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, 900);
        assert_eq!(records[0].sequence_number, 0);
        assert_eq!(records[1].timestamp, 1_500);
        assert_eq!(records[1].sequence_number, 1);
    }

    #[tokio::test]
    async fn test_duplicate_click_within_window_dropped() {
        let mut rig = rig("<button id=\"buy\">Buy</button>", Some(no_html()));
        let page = rig.recorder.page();
        let buy = find(&page, DocId::MAIN, "buy");
        rig.recorder.arm("task-dup", 0, 0).unwrap();

        rig.clock.advance(5_000);
        page.lock().click(DocId::MAIN, buy, 100.0, 100.0);
        rig.clock.advance(100);
        page.lock().click(DocId::MAIN, buy, 100.0, 100.0);
        rig.recorder.pump().await;

        let records = drain(&mut rig.rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 5_000);
        assert_eq!(rig.recorder.stats().ignored, 1);
    }

    #[tokio::test]
    async fn test_input_debounce_emits_single_trailing_record() {
        let mut rig = rig("<input id=\"q\">", Some(no_html()));
        let page = rig.recorder.page();
        let q = find(&page, DocId::MAIN, "q");
        rig.recorder.arm("task-input", 0, 0).unwrap();

        rig.clock.advance(100);
        page.lock().set_input_value(DocId::MAIN, q, "a", "insertText", Some("a"));
        rig.clock.advance(50);
        page.lock().set_input_value(DocId::MAIN, q, "ab", "insertText", Some("b"));
        rig.clock.advance(50);
        page.lock().set_input_value(DocId::MAIN, q, "abc", "insertText", Some("c"));

        // Still inside the trailing window: nothing emitted yet.
        rig.recorder.pump().await;
        assert!(drain(&mut rig.rx).is_empty());

        rig.clock.advance(300);
        rig.recorder.pump().await;
        let records = drain(&mut rig.rx);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.kind, "input");
        assert_eq!(record.timestamp, 200);
        match &record.payload {
            EventPayload::Input(p) => {
                assert_eq!(p.value, "abc");
                assert_eq!(p.old_value, "");
                assert_eq!(p.data.as_deref(), Some("c"));
                assert_eq!(p.selection_start, Some(3));
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scroll_debounce_accumulates_and_thresholds() {
        let mut rig = rig("", Some(no_html()));
        let page = rig.recorder.page();
        rig.recorder.arm("task-scroll", 0, 0).unwrap();

        for _ in 0..3 {
            page.lock().scroll_to(DocId::MAIN, None, 0.0, 120.0, 20.0);
            rig.clock.advance(50);
        }
        rig.clock.advance(50);
        rig.recorder.pump().await;

        let records = drain(&mut rig.rx);
        assert_eq!(records.len(), 1);
        match &records[0].payload {
            EventPayload::Scroll(p) => {
                assert_eq!(p.delta_y, 60.0);
                assert_eq!(p.scroll_y, 120.0);
            }
            other => panic!("wrong payload: {other:?}"),
        }

        // A lone small scroll flushes but fails the delta threshold.
        rig.clock.advance(1_000);
        page.lock().scroll_to(DocId::MAIN, None, 0.0, 130.0, 10.0);
        rig.clock.advance(200);
        rig.recorder.pump().await;
        assert!(drain(&mut rig.rx).is_empty());
        assert_eq!(rig.recorder.stats().ignored, 1);
    }

    #[tokio::test]
    async fn test_pushstate_recorded_as_navigation_after_click() {
        let mut rig = rig("<button id=\"go\">Go</button>", Some(no_html()));
        let page = rig.recorder.page();
        let go = find(&page, DocId::MAIN, "go");
        rig.recorder.arm("task-nav", 0, 0).unwrap();

        rig.clock.advance(100);
        page.lock().click(DocId::MAIN, go, 5.0, 5.0);
        rig.clock.advance(300);
        page.lock().push_state(DocId::MAIN, "https://shop.example.com/b");
        rig.recorder.pump().await;

        let records = drain(&mut rig.rx);
        assert_eq!(records.len(), 2);
        let nav = &records[1];
        assert_eq!(nav.kind, "pushState");
        match &nav.payload {
            EventPayload::Navigation(p) => {
                assert_eq!(p.category, "navigation");
                assert_eq!(p.from_url, "https://shop.example.com/a");
                assert_eq!(p.to_url, "https://shop.example.com/b");
                assert!(p.from_user_input);
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_frame_click_carries_context_and_prefix() {
        let mut rig = rig("", Some(no_html()));
        let page = rig.recorder.page();
        let frame = {
            let mut p = page.lock();
            let body = p.dom(DocId::MAIN).find_by_tag("body").unwrap();
            let (_, frame) = p.create_frame(DocId::MAIN, body, "https://shop.example.com/widget");
            p.load_frame_html(frame, "<button id=\"go\">go</button>");
            frame
        };
        rig.recorder.arm("task-frame", 0, 0).unwrap();

        rig.clock.advance(50);
        let go = find(&page, frame, "go");
        page.lock().click(frame, go, 3.0, 3.0);
        rig.recorder.pump().await;

        let records = drain(&mut rig.rx);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.is_in_iframe);
        assert_eq!(
            record.iframe_url.as_deref(),
            Some("https://shop.example.com/widget")
        );
        assert_eq!(record.top_url.as_deref(), Some("https://shop.example.com/a"));
        let bid = &record.target.as_ref().unwrap().bid;
        assert!(bid.starts_with("iframe0_"), "got {bid}");
    }

    #[tokio::test]
    async fn test_stop_flushes_pending_and_freezes_capture() {
        let mut rig = rig(
            "<input id=\"q\"><button id=\"b\">b</button>",
            Some(no_html()),
        );
        let page = rig.recorder.page();
        let q = find(&page, DocId::MAIN, "q");
        let b = find(&page, DocId::MAIN, "b");
        rig.recorder.arm("task-stop", 0, 0).unwrap();

        rig.clock.advance(100);
        page.lock().click(DocId::MAIN, b, 9.0, 9.0);
        rig.clock.advance(100);
        page.lock().set_input_value(DocId::MAIN, q, "a", "insertText", Some("a"));

        // The input debounce is still pending; stop must flush it.
        rig.clock.advance(50);
        rig.recorder.stop().await;

        let records = drain(&mut rig.rx);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, "click");
        assert_eq!(records[1].kind, "input");
        assert!(!rig.recorder.is_armed());

        rig.clock.advance(500);
        page.lock().click(DocId::MAIN, b, 30.0, 9.0);
        rig.recorder.pump().await;
        assert!(drain(&mut rig.rx).is_empty());
    }

    #[tokio::test]
    async fn test_rearm_continues_sequence_numbers() {
        let mut rig = rig("<button id=\"b\">b</button>", Some(no_html()));
        let page = rig.recorder.page();
        let b = find(&page, DocId::MAIN, "b");
        rig.recorder.arm("task-seq", 0, 0).unwrap();

        rig.clock.advance(100);
        page.lock().click(DocId::MAIN, b, 1.0, 1.0);
        rig.recorder.pump().await;
        let first = drain(&mut rig.rx);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].sequence_number, 0);

        // A navigation re-arm resumes numbering at the persisted count.
        rig.clock.advance(5_000);
        rig.recorder.arm("task-seq", 5_100, 1).unwrap();
        rig.clock.advance(100);
        page.lock().click(DocId::MAIN, b, 50.0, 50.0);
        rig.recorder.pump().await;
        let second = drain(&mut rig.rx);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].sequence_number, 1);
    }

    #[tokio::test]
    async fn test_fallback_identifier_when_marker_never_answers() {
        let mut rig = rig("<button id=\"buy\">Buy</button>", Some(no_html()));
        rig.marker.mute_injection();
        let page = rig.recorder.page();
        let buy = find(&page, DocId::MAIN, "buy");
        rig.recorder.arm("task-fb", 0, 0).unwrap();

        rig.clock.advance(50);
        page.lock().click(DocId::MAIN, buy, 2.0, 2.0);
        rig.recorder.pump().await;

        let records = drain(&mut rig.rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target.as_ref().unwrap().bid, "id-buy");
        // Written back: later captures read the same identifier.
        let written = identity::marker_bid(&page.lock(), DocId::MAIN, buy);
        assert_eq!(written.as_deref(), Some("id-buy"));
    }

    #[tokio::test]
    async fn test_event_capture_follows_recorded_event() {
        let mut rig = rig("<button id=\"b\">b</button>", None);
        let page = rig.recorder.page();
        let b = find(&page, DocId::MAIN, "b");
        rig.recorder.arm("task-hc", 0, 0).unwrap();
        rig.recorder.pump().await;

        let load = drain(&mut rig.rx);
        assert_eq!(load.len(), 1);
        assert!(load[0].is_html_capture());
        assert_eq!(load[0].sequence_number, 0);

        rig.clock.advance(5_000);
        page.lock().click(DocId::MAIN, b, 4.0, 4.0);
        rig.recorder.pump().await;

        let rest = drain(&mut rig.rx);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].kind, "click");
        assert_eq!(rest[0].sequence_number, 1);
        assert!(rest[1].is_html_capture());
        assert_eq!(rest[1].sequence_number, 2);
        match &rest[1].payload {
            EventPayload::HtmlCapture(p) => assert_eq!(p.event_type, "click"),
            other => panic!("wrong payload: {other:?}"),
        }
    }
}
