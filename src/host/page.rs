//! Live page state: documents, frames, listeners, dispatch.
//!
//! A [`Page`] owns the top-level document plus every frame document and
//! drives synchronous event dispatch through capture and bubble phases.
//! The engine and page content register listeners through the same API;
//! a [`ListenerTier`] tag tells them apart. Mutation observers and the
//! custom-event bus give the capture layer the same hooks a content
//! script would use, with none of the nondeterminism.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::host::dom::{DocId, Dom, ListenerRecord, NodeId, Rect, ShadowMode};
use crate::host::event::{
    bubbles, CustomEvent, DispatchOutcome, DomEvent, EventDetail, EventFlow, InputDetail,
    KeyDetail, ListenerId, ListenerTier, Modifiers, MouseDetail, NavigationDetail, Phase,
    ScrollDetail,
};
use crate::host::parser;
use crate::utils::time::SharedClock;

/// Shared, lockable page handle used across tasks.
pub type PageHandle = Arc<Mutex<Page>>;

pub type EventHandler = Box<dyn FnMut(&mut Page, &mut EventFlow) + Send>;
pub type CustomHandler = Box<dyn FnMut(&mut Page, &CustomEvent) + Send>;
pub type ObserverHandler = Box<dyn FnMut(&mut Page, &[MutationRecord]) + Send>;

/// Document load progress, mirroring `document.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

/// A stylesheet attached to a document. Cross-origin sheets carry no
/// readable text, so serialization keeps the `<link>` untouched.
#[derive(Debug, Clone)]
pub struct Stylesheet {
    pub href: Option<String>,
    pub css: String,
    pub same_origin: bool,
}

/// One document inside the page: the top-level one or a frame's.
pub struct Document {
    pub dom: Dom,
    pub url: String,
    pub origin: String,
    pub title: String,
    pub referrer: String,
    pub ready: ReadyState,
    /// Prefix frame markers prepend to identifiers, set by the bridge.
    pub marker_prefix: Option<String>,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub stylesheets: Vec<Stylesheet>,
    /// Owning document and iframe element, `None` for the top document.
    pub frame_host: Option<(DocId, NodeId)>,
}

impl Document {
    fn new(url: &str, frame_host: Option<(DocId, NodeId)>) -> Self {
        Self {
            dom: Dom::new(),
            url: url.to_string(),
            origin: origin_of(url),
            title: String::new(),
            referrer: String::new(),
            ready: ReadyState::Loading,
            marker_prefix: None,
            scroll_x: 0.0,
            scroll_y: 0.0,
            stylesheets: Vec::new(),
            frame_host,
        }
    }

    pub fn is_frame(&self) -> bool {
        self.frame_host.is_some()
    }
}

/// Scheme plus authority, the part origin comparisons care about.
pub fn origin_of(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    format!("{}{}", &url[..scheme_end + 3], &rest[..authority_end])
}

/// What changed in a document tree.
#[derive(Debug, Clone)]
pub enum MutationKind {
    ChildrenAdded { parent: NodeId, added: Vec<NodeId> },
    ChildrenRemoved { parent: NodeId, removed: Vec<NodeId> },
    Attribute { node: NodeId, name: String },
}

#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub doc: DocId,
    pub kind: MutationKind,
}

/// A message posted from a frame context toward the engine, standing in
/// for `window.postMessage` toward the parent.
#[derive(Debug, Clone)]
pub struct FrameMessage {
    pub from: DocId,
    pub payload: Value,
}

struct CustomListener {
    id: u64,
    doc: DocId,
    name: String,
    tier: ListenerTier,
}

pub struct Page {
    docs: Vec<Document>,
    clock: SharedClock,
    pub viewport: Rect,
    next_listener: u64,
    handlers: HashMap<u64, Option<EventHandler>>,
    listener_index: HashMap<u64, (DocId, NodeId, String)>,
    custom_listeners: Vec<CustomListener>,
    custom_handlers: HashMap<u64, Option<CustomHandler>>,
    observers: Vec<(u64, Option<ObserverHandler>)>,
    next_observer: u64,
    message_tx: Option<mpsc::UnboundedSender<FrameMessage>>,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("documents", &self.docs.len())
            .field("listeners", &self.listener_index.len())
            .field("custom_listeners", &self.custom_listeners.len())
            .finish()
    }
}

impl Page {
    pub fn new(clock: SharedClock, url: &str) -> Self {
        Self {
            docs: vec![Document::new(url, None)],
            clock,
            viewport: Rect::new(0.0, 0.0, 1280.0, 720.0),
            next_listener: 1,
            handlers: HashMap::new(),
            listener_index: HashMap::new(),
            custom_listeners: Vec::new(),
            custom_handlers: HashMap::new(),
            observers: Vec::new(),
            next_observer: 1,
            message_tx: None,
        }
    }

    /// Builds a page whose main document is parsed from `html` and
    /// already complete.
    pub fn with_html(clock: SharedClock, url: &str, html: &str) -> Self {
        let mut page = Self::new(clock, url);
        parser::parse_into(&mut page.docs[0].dom, html);
        page.docs[0].ready = ReadyState::Complete;
        page
    }

    pub fn shared(self) -> PageHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }

    // ---- documents ----

    pub fn doc(&self, id: DocId) -> &Document {
        &self.docs[id.0]
    }

    pub fn doc_mut(&mut self, id: DocId) -> &mut Document {
        &mut self.docs[id.0]
    }

    pub fn dom(&self, id: DocId) -> &Dom {
        &self.docs[id.0].dom
    }

    pub fn dom_mut(&mut self, id: DocId) -> &mut Dom {
        &mut self.docs[id.0].dom
    }

    pub fn doc_ids(&self) -> Vec<DocId> {
        (0..self.docs.len()).map(DocId).collect()
    }

    pub fn main_url(&self) -> String {
        self.docs[0].url.clone()
    }

    pub fn same_origin(&self, a: DocId, b: DocId) -> bool {
        self.docs[a.0].origin == self.docs[b.0].origin
    }

    /// Marks a document finished loading and announces it.
    pub fn set_ready(&mut self, doc: DocId, state: ReadyState) {
        self.docs[doc.0].ready = state;
        let root = self.docs[doc.0].dom.root();
        let ts = self.now_ms();
        self.dispatch(DomEvent::new("readystatechange", doc, root, ts, EventDetail::None));
    }

    // ---- frames ----

    /// Creates an iframe element plus its child document. The child's
    /// origin comes from `url`, so cross-origin frames arise naturally.
    pub fn create_frame(&mut self, host_doc: DocId, parent: NodeId, url: &str) -> (NodeId, DocId) {
        let iframe = {
            let dom = &mut self.docs[host_doc.0].dom;
            let el = dom.create_element("iframe");
            dom.element_mut(el)
                .map(|e| e.set_attr("src", url));
            dom.append_child(parent, el);
            el
        };
        let child = DocId(self.docs.len());
        self.docs
            .push(Document::new(url, Some((host_doc, iframe))));
        if let Some(el) = self.docs[host_doc.0].dom.element_mut(iframe) {
            el.content_doc = Some(child);
        }
        self.emit_mutations(vec![MutationRecord {
            doc: host_doc,
            kind: MutationKind::ChildrenAdded {
                parent,
                added: vec![iframe],
            },
        }]);
        (iframe, child)
    }

    /// Parses `html` into a frame document and completes it.
    pub fn load_frame_html(&mut self, frame: DocId, html: &str) {
        parser::parse_into(&mut self.docs[frame.0].dom, html);
        self.set_ready(frame, ReadyState::Complete);
    }

    /// Child document of an iframe element, when one exists.
    pub fn content_doc(&self, doc: DocId, iframe: NodeId) -> Option<DocId> {
        self.docs[doc.0]
            .dom
            .element(iframe)
            .and_then(|el| el.content_doc)
    }

    // ---- listeners ----

    pub fn add_listener(
        &mut self,
        doc: DocId,
        node: NodeId,
        name: &str,
        phase: Phase,
        tier: ListenerTier,
        handler: EventHandler,
    ) -> ListenerId {
        let id = self.next_listener;
        self.next_listener += 1;
        self.docs[doc.0].dom.node_mut(node).listeners.push((
            name.to_string(),
            ListenerRecord {
                id: ListenerId(id),
                phase,
                tier,
            },
        ));
        self.handlers.insert(id, Some(handler));
        self.listener_index
            .insert(id, (doc, node, name.to_string()));
        ListenerId(id)
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        if let Some((doc, node, _)) = self.listener_index.remove(&id.0) {
            self.docs[doc.0]
                .dom
                .node_mut(node)
                .listeners
                .retain(|(_, rec)| rec.id != id);
        }
        self.handlers.remove(&id.0);
    }

    /// Drops every listener of a tier in one document, custom-bus
    /// listeners included.
    pub fn remove_tier(&mut self, doc: DocId, tier: ListenerTier) {
        let ids: Vec<u64> = self
            .listener_index
            .iter()
            .filter_map(|(id, (d, node, _))| {
                if *d != doc {
                    return None;
                }
                let owned = self.docs[d.0]
                    .dom
                    .node(*node)
                    .listeners
                    .iter()
                    .any(|(_, rec)| rec.id.0 == *id && rec.tier == tier);
                owned.then_some(*id)
            })
            .collect();
        for id in ids {
            self.remove_listener(ListenerId(id));
        }

        let custom: Vec<u64> = self
            .custom_listeners
            .iter()
            .filter(|l| l.doc == doc && l.tier == tier)
            .map(|l| l.id)
            .collect();
        for id in custom {
            self.remove_custom_listener(ListenerId(id));
        }
    }

    /// True when `node` has a listener for `name`, any tier.
    pub fn has_listener(&self, doc: DocId, node: NodeId, name: &str) -> bool {
        self.docs[doc.0]
            .dom
            .node(node)
            .listeners
            .iter()
            .any(|(n, _)| n == name)
    }

    /// True when a tier already owns `name` on `node`.
    pub fn tier_owns(&self, doc: DocId, node: NodeId, name: &str, tier: ListenerTier) -> bool {
        self.docs[doc.0]
            .dom
            .node(node)
            .listeners
            .iter()
            .any(|(n, rec)| n == name && rec.tier == tier)
    }

    // ---- dispatch ----

    /// Full capture/target/bubble dispatch. Engine listeners attach at
    /// the document root in the capture phase and therefore run before
    /// any page handler deeper in the path can stop propagation.
    pub fn dispatch(&mut self, event: DomEvent) -> DispatchOutcome {
        let doc = event.doc;
        let path = self.docs[doc.0].dom.composed_ancestors(event.target);
        trace!(name = %event.name, ?doc, target = event.target.0, "dispatch");

        let mut flow = EventFlow::new(event);
        let mut run = 0usize;

        // Capture: root toward target, target included.
        'capture: for &node in path.iter().rev() {
            flow.phase = Phase::Capture;
            flow.current_target = node;
            run += self.run_listeners(doc, node, Phase::Capture, &mut flow);
            if flow.stopped {
                break 'capture;
            }
        }

        // Bubble: target toward root. Non-bubbling events still fire
        // bubble-phase listeners registered on the target itself.
        if !flow.stopped {
            let event_bubbles = bubbles(&flow.event.name);
            for &node in path.iter() {
                if !event_bubbles && node != flow.event.target {
                    break;
                }
                flow.phase = Phase::Bubble;
                flow.current_target = node;
                run += self.run_listeners(doc, node, Phase::Bubble, &mut flow);
                if flow.stopped {
                    break;
                }
            }
        }

        DispatchOutcome {
            listeners_run: run,
            propagation_stopped: flow.stopped,
            default_prevented: flow.default_prevented,
        }
    }

    fn run_listeners(
        &mut self,
        doc: DocId,
        node: NodeId,
        phase: Phase,
        flow: &mut EventFlow,
    ) -> usize {
        let matching: Vec<u64> = self.docs[doc.0]
            .dom
            .node(node)
            .listeners
            .iter()
            .filter(|(name, rec)| *name == flow.event.name && rec.phase == phase)
            .map(|(_, rec)| rec.id.0)
            .collect();

        let mut run = 0;
        for id in matching {
            let Some(slot) = self.handlers.get_mut(&id) else {
                continue;
            };
            let Some(mut handler) = slot.take() else {
                continue;
            };
            handler(self, flow);
            run += 1;
            if let Some(slot) = self.handlers.get_mut(&id) {
                *slot = Some(handler);
            }
            if flow.stopped {
                break;
            }
        }
        run
    }

    // ---- custom-event bus ----

    pub fn add_custom_listener(
        &mut self,
        doc: DocId,
        name: &str,
        tier: ListenerTier,
        handler: CustomHandler,
    ) -> ListenerId {
        let id = self.next_listener;
        self.next_listener += 1;
        self.custom_listeners.push(CustomListener {
            id,
            doc,
            name: name.to_string(),
            tier,
        });
        self.custom_handlers.insert(id, Some(handler));
        ListenerId(id)
    }

    pub fn remove_custom_listener(&mut self, id: ListenerId) {
        self.custom_listeners.retain(|l| l.id != id.0);
        self.custom_handlers.remove(&id.0);
    }

    /// Document-scoped custom event, the CSP-safe channel between the
    /// engine and page-context markers.
    pub fn dispatch_custom(&mut self, doc: DocId, name: &str, detail: Value) {
        let event = CustomEvent {
            name: name.to_string(),
            doc,
            detail,
        };
        let matching: Vec<u64> = self
            .custom_listeners
            .iter()
            .filter(|l| l.doc == doc && l.name == name)
            .map(|l| l.id)
            .collect();
        trace!(name, ?doc, listeners = matching.len(), "dispatch_custom");
        for id in matching {
            let Some(slot) = self.custom_handlers.get_mut(&id) else {
                continue;
            };
            let Some(mut handler) = slot.take() else {
                continue;
            };
            handler(self, &event);
            if let Some(slot) = self.custom_handlers.get_mut(&id) {
                *slot = Some(handler);
            }
        }
    }

    // ---- frame messaging ----

    pub fn set_message_sink(&mut self, tx: mpsc::UnboundedSender<FrameMessage>) {
        self.message_tx = Some(tx);
    }

    /// Sends a frame-to-engine message; drops it when nobody listens.
    pub fn post_message(&mut self, from: DocId, payload: Value) {
        if let Some(tx) = &self.message_tx {
            let _ = tx.send(FrameMessage { from, payload });
        }
    }

    // ---- mutation observation ----

    pub fn observe_mutations(&mut self, handler: ObserverHandler) -> u64 {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers.push((id, Some(handler)));
        id
    }

    pub fn unobserve_mutations(&mut self, id: u64) {
        self.observers.retain(|(oid, _)| *oid != id);
    }

    fn emit_mutations(&mut self, records: Vec<MutationRecord>) {
        if records.is_empty() {
            return;
        }
        let ids: Vec<u64> = self.observers.iter().map(|(id, _)| *id).collect();
        for id in ids {
            let Some(entry) = self.observers.iter_mut().find(|(oid, _)| *oid == id) else {
                continue;
            };
            let Some(mut handler) = entry.1.take() else {
                continue;
            };
            handler(self, &records);
            if let Some(entry) = self.observers.iter_mut().find(|(oid, _)| *oid == id) {
                entry.1 = Some(handler);
            }
        }
    }

    // ---- tree mutation ----

    pub fn append_element(
        &mut self,
        doc: DocId,
        parent: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> NodeId {
        let node = {
            let dom = &mut self.docs[doc.0].dom;
            let node = dom.create_element(tag);
            if let Some(el) = dom.element_mut(node) {
                for (k, v) in attrs {
                    el.set_attr(k, v);
                }
            }
            dom.append_child(parent, node);
            node
        };
        self.emit_mutations(vec![MutationRecord {
            doc,
            kind: MutationKind::ChildrenAdded {
                parent,
                added: vec![node],
            },
        }]);
        node
    }

    pub fn append_text(&mut self, doc: DocId, parent: NodeId, text: &str) -> NodeId {
        let node = {
            let dom = &mut self.docs[doc.0].dom;
            let node = dom.create_text(text);
            dom.append_child(parent, node);
            node
        };
        self.emit_mutations(vec![MutationRecord {
            doc,
            kind: MutationKind::ChildrenAdded {
                parent,
                added: vec![node],
            },
        }]);
        node
    }

    /// Parses an HTML fragment under `parent`. Returns the top-level
    /// nodes that were added.
    pub fn append_html(&mut self, doc: DocId, parent: NodeId, html: &str) -> Vec<NodeId> {
        let added = parser::parse_fragment(&mut self.docs[doc.0].dom, parent, html);
        self.emit_mutations(vec![MutationRecord {
            doc,
            kind: MutationKind::ChildrenAdded {
                parent,
                added: added.clone(),
            },
        }]);
        added
    }

    pub fn remove_node(&mut self, doc: DocId, node: NodeId) {
        let parent = self.docs[doc.0].dom.node(node).parent;
        self.docs[doc.0].dom.detach(node);
        if let Some(parent) = parent {
            self.emit_mutations(vec![MutationRecord {
                doc,
                kind: MutationKind::ChildrenRemoved {
                    parent,
                    removed: vec![node],
                },
            }]);
        }
    }

    pub fn set_attribute(&mut self, doc: DocId, node: NodeId, name: &str, value: &str) {
        if let Some(el) = self.docs[doc.0].dom.element_mut(node) {
            el.set_attr(name, value);
        }
        self.emit_mutations(vec![MutationRecord {
            doc,
            kind: MutationKind::Attribute {
                node,
                name: name.to_string(),
            },
        }]);
    }

    pub fn remove_attribute(&mut self, doc: DocId, node: NodeId, name: &str) {
        let removed = self.docs[doc.0]
            .dom
            .element_mut(node)
            .map(|el| el.remove_attr(name))
            .unwrap_or(false);
        if removed {
            self.emit_mutations(vec![MutationRecord {
                doc,
                kind: MutationKind::Attribute {
                    node,
                    name: name.to_string(),
                },
            }]);
        }
    }

    pub fn attach_shadow(&mut self, doc: DocId, host: NodeId, mode: ShadowMode) -> NodeId {
        self.docs[doc.0].dom.attach_shadow(host, mode)
    }

    pub fn set_bounds(&mut self, doc: DocId, node: NodeId, bounds: Rect) {
        if let Some(el) = self.docs[doc.0].dom.element_mut(node) {
            el.bounds = bounds;
        }
    }

    pub fn add_stylesheet(&mut self, doc: DocId, href: Option<&str>, css: &str, same_origin: bool) {
        self.docs[doc.0].stylesheets.push(Stylesheet {
            href: href.map(str::to_string),
            css: css.to_string(),
            same_origin,
        });
    }

    // ---- user gestures ----

    /// Single trusted click event at page coordinates.
    pub fn click(&mut self, doc: DocId, target: NodeId, x: f64, y: f64) -> DispatchOutcome {
        let ts = self.now_ms();
        self.dispatch(DomEvent::new(
            "click",
            doc,
            target,
            ts,
            EventDetail::Mouse(MouseDetail {
                client_x: x,
                client_y: y,
                screen_x: x,
                screen_y: y,
                button: 0,
                modifiers: Modifiers::default(),
            }),
        ))
    }

    /// Full pointer gesture: pointerdown, mousedown, mouseup, click.
    pub fn click_gesture(&mut self, doc: DocId, target: NodeId, x: f64, y: f64) {
        for name in ["pointerdown", "mousedown", "mouseup", "click"] {
            let ts = self.now_ms();
            self.dispatch(DomEvent::new(
                name,
                doc,
                target,
                ts,
                EventDetail::Mouse(MouseDetail {
                    client_x: x,
                    client_y: y,
                    screen_x: x,
                    screen_y: y,
                    button: 0,
                    modifiers: Modifiers::default(),
                }),
            ));
        }
    }

    pub fn press_key(&mut self, doc: DocId, target: NodeId, key: &str) -> DispatchOutcome {
        let ts = self.now_ms();
        let code = key_code_of(key);
        self.dispatch(DomEvent::new(
            "keydown",
            doc,
            target,
            ts,
            EventDetail::Key(KeyDetail {
                key: key.to_string(),
                code,
                repeat: false,
                modifiers: Modifiers::default(),
            }),
        ))
    }

    /// Sets a control's live value and fires `input`.
    pub fn set_input_value(
        &mut self,
        doc: DocId,
        target: NodeId,
        value: &str,
        input_type: &str,
        data: Option<&str>,
    ) -> DispatchOutcome {
        if let Some(el) = self.docs[doc.0].dom.element_mut(target) {
            el.value = Some(value.to_string());
            el.selection = Some((value.len() as u32, value.len() as u32));
        }
        let ts = self.now_ms();
        self.dispatch(DomEvent::new(
            "input",
            doc,
            target,
            ts,
            EventDetail::Input(InputDetail {
                input_type: input_type.to_string(),
                data: data.map(str::to_string),
            }),
        ))
    }

    /// Types text one character at a time: keydown, then value append
    /// plus `input`, per character.
    pub fn type_text(&mut self, doc: DocId, target: NodeId, text: &str) {
        for ch in text.chars() {
            let key = ch.to_string();
            self.press_key(doc, target, &key);
            let current = self.docs[doc.0]
                .dom
                .element(target)
                .and_then(|el| el.value.clone())
                .unwrap_or_default();
            let next = format!("{current}{ch}");
            self.set_input_value(doc, target, &next, "insertText", Some(&key));
        }
    }

    /// Scrolls an element (or the document when `target` is `None`) and
    /// fires `scroll`.
    pub fn scroll_to(
        &mut self,
        doc: DocId,
        target: Option<NodeId>,
        x: f64,
        y: f64,
        delta_y: f64,
    ) -> DispatchOutcome {
        let node = match target {
            Some(n) => {
                if let Some(el) = self.docs[doc.0].dom.element_mut(n) {
                    el.scroll_x = x;
                    el.scroll_y = y;
                }
                n
            }
            None => {
                self.docs[doc.0].scroll_x = x;
                self.docs[doc.0].scroll_y = y;
                self.docs[doc.0].dom.root()
            }
        };
        let ts = self.now_ms();
        self.dispatch(DomEvent::new(
            "scroll",
            doc,
            node,
            ts,
            EventDetail::Scroll(ScrollDetail { delta_y }),
        ))
    }

    pub fn focus(&mut self, doc: DocId, target: NodeId) -> DispatchOutcome {
        let ts = self.now_ms();
        self.dispatch(DomEvent::new("focus", doc, target, ts, EventDetail::None))
    }

    pub fn submit(&mut self, doc: DocId, form: NodeId) -> DispatchOutcome {
        let ts = self.now_ms();
        self.dispatch(DomEvent::new("submit", doc, form, ts, EventDetail::None))
    }

    pub fn select_start(&mut self, doc: DocId, target: NodeId) -> DispatchOutcome {
        let ts = self.now_ms();
        self.dispatch(DomEvent::new(
            "selectstart",
            doc,
            target,
            ts,
            EventDetail::None,
        ))
    }

    // ---- history ----

    pub fn push_state(&mut self, doc: DocId, to_url: &str) -> DispatchOutcome {
        self.history_event(doc, "pushState", to_url)
    }

    pub fn replace_state(&mut self, doc: DocId, to_url: &str) -> DispatchOutcome {
        self.history_event(doc, "replaceState", to_url)
    }

    pub fn pop_state(&mut self, doc: DocId, to_url: &str) -> DispatchOutcome {
        self.history_event(doc, "popstate", to_url)
    }

    pub fn begin_unload(&mut self, doc: DocId) -> DispatchOutcome {
        let url = self.docs[doc.0].url.clone();
        let root = self.docs[doc.0].dom.root();
        let ts = self.now_ms();
        self.dispatch(DomEvent::new(
            "beforeunload",
            doc,
            root,
            ts,
            EventDetail::Navigation(NavigationDetail {
                from_url: url.clone(),
                to_url: url,
                referrer: None,
            }),
        ))
    }

    fn history_event(&mut self, doc: DocId, name: &str, to_url: &str) -> DispatchOutcome {
        let from_url = self.docs[doc.0].url.clone();
        self.docs[doc.0].url = to_url.to_string();
        self.docs[doc.0].origin = origin_of(to_url);
        let root = self.docs[doc.0].dom.root();
        let ts = self.now_ms();
        self.dispatch(DomEvent::new(
            name,
            doc,
            root,
            ts,
            EventDetail::Navigation(NavigationDetail {
                from_url,
                to_url: to_url.to_string(),
                referrer: Some(self.docs[doc.0].referrer.clone()),
            }),
        ))
    }
}

fn key_code_of(key: &str) -> String {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => format!("Key{}", c.to_ascii_uppercase()),
        (Some(c), None) if c.is_ascii_digit() => format!("Digit{c}"),
        _ => key.to_string(),
    }
}
