//! Pre-arm event ring.
//!
//! Critical listeners fire before recording is armed; their captures
//! land here. The ring is bounded two ways: at most 100 entries, and
//! nothing older than a 2000 ms sliding window. Arming drains entries
//! newer than `startMs - 250 ms` into the queue in capture order, so
//! the click that started the recording is never lost.

use std::collections::VecDeque;

use crate::capture::snapshot::TargetSnapshot;
use crate::host::event::DomEvent;

const MAX_ENTRIES: usize = 100;
const WINDOW_MS: u64 = 2_000;
const PRE_START_GRACE_MS: u64 = 250;

/// One buffered capture: the raw event plus the frozen snapshot taken
/// at dispatch time.
#[derive(Debug, Clone)]
pub struct PrebufferedEvent {
    pub ts: u64,
    pub event: DomEvent,
    pub snapshot: TargetSnapshot,
}

#[derive(Debug, Default)]
pub struct Prebuffer {
    entries: VecDeque<PrebufferedEvent>,
    pushed: u64,
    evicted: u64,
}

impl Prebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, now_ms: u64, event: DomEvent, snapshot: TargetSnapshot) {
        self.evict_window(now_ms);
        if self.entries.len() == MAX_ENTRIES {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(PrebufferedEvent {
            ts: event.timestamp,
            event,
            snapshot,
        });
        self.pushed += 1;
    }

    fn evict_window(&mut self, now_ms: u64) {
        let floor = now_ms.saturating_sub(WINDOW_MS);
        while let Some(front) = self.entries.front() {
            if front.ts >= floor {
                break;
            }
            self.entries.pop_front();
            self.evicted += 1;
        }
    }

    /// Drains everything captured at or after `startMs - 250 ms`,
    /// oldest first. Earlier entries are discarded.
    pub fn drain(&mut self, start_ms: u64) -> Vec<PrebufferedEvent> {
        let floor = start_ms.saturating_sub(PRE_START_GRACE_MS);
        let drained: Vec<PrebufferedEvent> = self
            .entries
            .drain(..)
            .filter(|e| e.ts >= floor)
            .collect();
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
