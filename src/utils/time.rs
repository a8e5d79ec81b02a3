//! Time sources.
//!
//! All recorded timestamps are Unix epoch milliseconds. Components never
//! call `Utc::now()` directly; they go through a [`Clock`] handle so tests
//! can drive the timeline with literal values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Source of epoch-millisecond timestamps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Shared clock handle passed to every component.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `chrono`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicU64::new(start_ms),
        })
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Filesystem-safe ISO-8601 folder name for a session start time.
///
/// Colons and dots are replaced so the name is valid on every platform:
/// `2025-11-18T02:20:01.939Z` becomes `2025-11-18T02-20-01-939Z`.
pub fn iso_folder_name(epoch_ms: u64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(epoch_ms as i64)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH);
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(':', "-")
        .replace('.', "-")
}
