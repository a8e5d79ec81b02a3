//! Event types and listener plumbing for the page host.

use serde::{Deserialize, Serialize};

use crate::host::dom::{DocId, NodeId};

/// Dispatch phase a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Capture,
    Bubble,
}

/// Who owns a listener. Detachment and duplicate checks go by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerTier {
    /// Always-on capture-phase listeners owned by the capture engine.
    Critical,
    /// Config-driven listeners, attached while recording is armed.
    Configured,
    /// Listeners installed by page content itself.
    Page,
    /// Marker bridge protocol listeners.
    Bridge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Modifier keys snapshot shared by mouse and keyboard details.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
    pub meta: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MouseDetail {
    pub client_x: f64,
    pub client_y: f64,
    pub screen_x: f64,
    pub screen_y: f64,
    pub button: i16,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyDetail {
    pub key: String,
    pub code: String,
    pub repeat: bool,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputDetail {
    pub input_type: String,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollDetail {
    pub delta_y: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationDetail {
    pub from_url: String,
    pub to_url: String,
    pub referrer: Option<String>,
}

/// Kind-specific fields of a raw event.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EventDetail {
    #[default]
    None,
    Mouse(MouseDetail),
    Key(KeyDetail),
    Input(InputDetail),
    Scroll(ScrollDetail),
    Navigation(NavigationDetail),
}

impl EventDetail {
    pub fn mouse(&self) -> Option<&MouseDetail> {
        match self {
            EventDetail::Mouse(m) => Some(m),
            _ => None,
        }
    }
}

/// A raw event as delivered to listeners during dispatch.
#[derive(Debug, Clone)]
pub struct DomEvent {
    pub name: String,
    pub doc: DocId,
    pub target: NodeId,
    pub timestamp: u64,
    pub detail: EventDetail,
    /// False for events synthesized by page scripts.
    pub is_trusted: bool,
}

impl DomEvent {
    pub fn new(name: &str, doc: DocId, target: NodeId, timestamp: u64, detail: EventDetail) -> Self {
        Self {
            name: name.to_string(),
            doc,
            target,
            timestamp,
            detail,
            is_trusted: true,
        }
    }
}

/// Mutable dispatch state handed to each listener in path order.
#[derive(Debug)]
pub struct EventFlow {
    pub event: DomEvent,
    pub phase: Phase,
    pub current_target: NodeId,
    pub(crate) stopped: bool,
    pub(crate) default_prevented: bool,
}

impl EventFlow {
    pub(crate) fn new(event: DomEvent) -> Self {
        let target = event.target;
        Self {
            event,
            phase: Phase::Capture,
            current_target: target,
            stopped: false,
            default_prevented: false,
        }
    }

    /// Halts propagation after the current listener returns.
    pub fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }
}

/// Result of a full dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub listeners_run: usize,
    pub propagation_stopped: bool,
    pub default_prevented: bool,
}

/// A custom event on the document-level bus. Detail is free-form JSON,
/// mirroring `CustomEvent.detail`.
#[derive(Debug, Clone)]
pub struct CustomEvent {
    pub name: String,
    pub doc: DocId,
    pub detail: serde_json::Value,
}

/// Events that do not bubble; capture-phase listeners still see them.
pub fn bubbles(name: &str) -> bool {
    !matches!(name, "focus" | "blur")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focus_does_not_bubble() {
        assert!(!bubbles("focus"));
        assert!(bubbles("click"));
        assert!(bubbles("input"));
    }

    #[test]
    fn test_flow_stop_propagation_sets_flag() {
        let event = DomEvent::new("click", DocId::MAIN, NodeId(1), 10, EventDetail::None);
        let mut flow = EventFlow::new(event);
        assert!(!flow.stopped);
        flow.stop_propagation();
        assert!(flow.stopped);
    }
}
