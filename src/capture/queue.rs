//! Ordered capture queue and enqueue-time ignore rules.
//!
//! Lock-free MPSC-style queue between the synchronous dispatch hooks
//! and the async enrichment consumer. Sequence numbers are assigned
//! before push, so FIFO consumption preserves the canonical order.
//! When the queue is full the capture is dropped and counted; capture
//! must never block the page.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use crate::capture::records::IframeInfo;
use crate::capture::snapshot::TargetSnapshot;
use crate::host::dom::{DocId, NodeId};
use crate::host::event::EventDetail;

const DEFAULT_CAPACITY: usize = 1024;

const CLICK_DEDUP_MS: u64 = 200;
const CLICK_DEDUP_PX: f64 = 2.0;
const SAME_ELEMENT_CLICK_MS: u64 = 25;
const SCROLL_MIN_DELTA: f64 = 50.0;
const GENERIC_DEDUP_MS: u64 = 300;

/// Scroll geometry frozen at event time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollCapture {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub delta_y: f64,
}

/// Everything synthesized synchronously at enqueue time.
#[derive(Debug, Clone)]
pub struct QueuedCapture {
    pub sequence_number: u64,
    pub timestamp: u64,
    pub kind: String,
    pub url: String,
    pub doc: DocId,
    pub detail: EventDetail,
    pub snapshot: TargetSnapshot,
    pub iframe: Option<IframeInfo>,
    pub previous_value: Option<String>,
    pub scroll: Option<ScrollCapture>,
    /// Whether an accepted click preceded this capture in the session.
    pub from_user_input: bool,
}

/// Bounded queue between capture and enrichment.
#[derive(Clone)]
pub struct EventQueue {
    queue: Arc<ArrayQueue<QueuedCapture>>,
    enqueued: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub depth: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity)),
            enqueued: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// True when accepted; false when full (capture dropped, counted).
    pub fn push(&self, capture: QueuedCapture) -> bool {
        match self.queue.push(capture) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pop(&self) -> Option<QueuedCapture> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            depth: self.queue.len(),
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Why a capture was refused at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    DuplicateClick,
    RapidSameElementClick,
    UnchangedValue,
    SmallScroll,
    NonInteractiveHover,
    RepeatedKind,
}

/// Pointer coordinate window for one event kind.
#[derive(Debug, Clone, Default)]
pub struct ClickState {
    pub last_ms: u64,
    pub x: f64,
    pub y: f64,
    pub button: i16,
    pub last_target: Option<(DocId, NodeId)>,
    pub last_target_ms: u64,
    pub click_count: u64,
    seen_any: bool,
}

/// Dedup state. Updated for accepted events only, so a dropped
/// duplicate cannot shift the window for the next one. Click and
/// mouseup windows are tracked per kind; a gesture's own mouseup
/// must not shadow the click that follows it.
#[derive(Debug, Clone, Default)]
pub struct IgnoreState {
    last_seen: HashMap<(String, DocId, NodeId), u64>,
    pub click: ClickState,
    mouseup: ClickState,
    values: HashMap<(DocId, NodeId), String>,
}

impl IgnoreState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the ignore rules without mutating state.
    pub fn check(
        &self,
        kind: &str,
        timestamp: u64,
        doc: DocId,
        node: NodeId,
        detail: &EventDetail,
        snapshot: &TargetSnapshot,
        scroll: Option<&ScrollCapture>,
    ) -> Result<(), IgnoreReason> {
        if kind == "click" || kind == "mouseup" {
            if let EventDetail::Mouse(m) = detail {
                let c = if kind == "click" { &self.click } else { &self.mouseup };
                if c.seen_any
                    && timestamp.saturating_sub(c.last_ms) < CLICK_DEDUP_MS
                    && (m.screen_x - c.x).abs() <= CLICK_DEDUP_PX
                    && (m.screen_y - c.y).abs() <= CLICK_DEDUP_PX
                    && m.button == c.button
                {
                    return Err(IgnoreReason::DuplicateClick);
                }
            }
            if kind == "click"
                && self.click.last_target == Some((doc, node))
                && timestamp.saturating_sub(self.click.last_target_ms) < SAME_ELEMENT_CLICK_MS
            {
                return Err(IgnoreReason::RapidSameElementClick);
            }
            return Ok(());
        }

        if kind == "input" {
            if self.previous_value(doc, node) == snapshot.value {
                return Err(IgnoreReason::UnchangedValue);
            }
            return Ok(());
        }

        if kind == "scroll" {
            if let Some(s) = scroll {
                if s.delta_y.abs() < SCROLL_MIN_DELTA {
                    return Err(IgnoreReason::SmallScroll);
                }
            }
        }

        if kind == "mouseover"
            && !snapshot.is_interactive
            && !snapshot.attributes.contains_key("title")
        {
            return Err(IgnoreReason::NonInteractiveHover);
        }

        if let Some(&last) = self.last_seen.get(&(kind.to_string(), doc, node)) {
            if timestamp.saturating_sub(last) < GENERIC_DEDUP_MS {
                return Err(IgnoreReason::RepeatedKind);
            }
        }
        Ok(())
    }

    /// Records an accepted event into the dedup state.
    pub fn accept(
        &mut self,
        kind: &str,
        timestamp: u64,
        doc: DocId,
        node: NodeId,
        detail: &EventDetail,
    ) {
        self.last_seen
            .insert((kind.to_string(), doc, node), timestamp);
        if kind == "click" || kind == "mouseup" {
            if let EventDetail::Mouse(m) = detail {
                let c = if kind == "click" {
                    &mut self.click
                } else {
                    &mut self.mouseup
                };
                c.last_ms = timestamp;
                c.x = m.screen_x;
                c.y = m.screen_y;
                c.button = m.button;
                c.seen_any = true;
            }
            if kind == "click" {
                self.click.last_target = Some((doc, node));
                self.click.last_target_ms = timestamp;
                self.click.click_count += 1;
            }
        }
    }

    /// Last recorded unified value for a control; empty when first seen.
    pub fn previous_value(&self, doc: DocId, node: NodeId) -> String {
        self.values.get(&(doc, node)).cloned().unwrap_or_default()
    }

    pub fn record_value(&mut self, doc: DocId, node: NodeId, value: &str) {
        self.values.insert((doc, node), value.to_string());
    }
}
