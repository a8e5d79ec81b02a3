//! Listener attachment.
//!
//! Two tiers feed the same capture hook. Critical listeners cover the
//! interaction kinds a session can never afford to miss and attach at
//! creation time, before recording is armed, so the prebuffer sees
//! them. Configured listeners follow the rule file and attach at arm.
//! A kind already owned by the critical tier is not attached twice;
//! its rule still decides downstream how the occurrences are handled.
//!
//! All engine listeners register at the document root in the capture
//! phase, so page handlers deeper in the path cannot hide events by
//! stopping propagation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::capture::CaptureConfig;
use crate::host::dom::DocId;
use crate::host::event::{EventFlow, ListenerId, ListenerTier, Phase};
use crate::host::page::Page;

/// Event kinds recorded regardless of configuration.
pub const CRITICAL_EVENTS: [&str; 9] = [
    "pointerdown",
    "mousedown",
    "mouseup",
    "click",
    "submit",
    "input",
    "change",
    "keydown",
    "selectstart",
];

pub fn is_critical(name: &str) -> bool {
    CRITICAL_EVENTS.contains(&name)
}

/// Shared callback invoked for every observed event occurrence.
pub type CaptureHook = Arc<dyn Fn(&mut Page, &EventFlow) + Send + Sync>;

/// Tracks which documents carry which tier, per session.
#[derive(Default)]
pub struct ListenerManager {
    critical: HashMap<DocId, Vec<ListenerId>>,
    configured: HashMap<DocId, Vec<ListenerId>>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn critical_attached(&self, doc: DocId) -> bool {
        self.critical.contains_key(&doc)
    }

    /// Attaches the critical tier to one document. Idempotent.
    pub fn attach_critical(&mut self, page: &mut Page, doc: DocId, hook: &CaptureHook) {
        if self.critical.contains_key(&doc) {
            return;
        }
        let root = page.dom(doc).root();
        let mut ids = Vec::with_capacity(CRITICAL_EVENTS.len());
        for name in CRITICAL_EVENTS {
            let hook = Arc::clone(hook);
            ids.push(page.add_listener(
                doc,
                root,
                name,
                Phase::Capture,
                ListenerTier::Critical,
                Box::new(move |page, flow| hook(page, flow)),
            ));
        }
        debug!(?doc, listeners = ids.len(), "critical listeners attached");
        self.critical.insert(doc, ids);
    }

    /// Attaches configured listeners for one document, replacing any
    /// previous configured set so rule reloads take effect.
    pub fn attach_configured(
        &mut self,
        page: &mut Page,
        doc: DocId,
        config: &CaptureConfig,
        hook: &CaptureHook,
    ) {
        self.detach_configured(page, doc);
        let root = page.dom(doc).root();
        let mut ids = Vec::new();

        for (name, _) in config.enabled_dom_events() {
            if is_critical(&name) && self.critical_attached(doc) {
                continue;
            }
            let hook = Arc::clone(hook);
            ids.push(page.add_listener(
                doc,
                root,
                &name,
                Phase::Capture,
                ListenerTier::Configured,
                Box::new(move |page, flow| hook(page, flow)),
            ));
        }
        for name in config.enabled_navigation_events() {
            let hook = Arc::clone(hook);
            ids.push(page.add_listener(
                doc,
                root,
                &name,
                Phase::Capture,
                ListenerTier::Configured,
                Box::new(move |page, flow| hook(page, flow)),
            ));
        }
        debug!(?doc, listeners = ids.len(), "configured listeners attached");
        self.configured.insert(doc, ids);
    }

    pub fn detach_configured(&mut self, page: &mut Page, doc: DocId) {
        if self.configured.remove(&doc).is_some() {
            page.remove_tier(doc, ListenerTier::Configured);
        }
    }

    /// Drops the configured tier everywhere, keeping critical listeners.
    pub fn detach_configured_all(&mut self, page: &mut Page) {
        for doc in self.configured.keys().copied().collect::<Vec<_>>() {
            page.remove_tier(doc, ListenerTier::Configured);
        }
        self.configured.clear();
    }

    /// Removes every engine listener this manager attached.
    pub fn detach_all(&mut self, page: &mut Page) {
        for doc in self.configured.keys().copied().collect::<Vec<_>>() {
            page.remove_tier(doc, ListenerTier::Configured);
        }
        for doc in self.critical.keys().copied().collect::<Vec<_>>() {
            page.remove_tier(doc, ListenerTier::Critical);
        }
        self.configured.clear();
        self.critical.clear();
    }

    /// Documents carrying the critical tier.
    pub fn critical_docs(&self) -> Vec<DocId> {
        self.critical.keys().copied().collect()
    }
}
