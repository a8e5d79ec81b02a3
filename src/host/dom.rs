//! Arena-backed document tree.
//!
//! Nodes live in a flat `Vec` and reference each other by [`NodeId`],
//! so traversal never fights the borrow checker and the whole tree is
//! `Send`. Shadow roots are extra roots inside the same arena, linked
//! from their host element.

use std::collections::VecDeque;

/// Index of a node inside one document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of a document inside a [`crate::host::Page`]. Document `0` is
/// always the top-level document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(pub usize);

impl DocId {
    pub const MAIN: DocId = DocId(0);

    pub fn is_main(self) -> bool {
        self.0 == 0
    }
}

/// Shadow root mode. Closed roots are skipped by serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowMode {
    Open,
    Closed,
}

/// Element geometry in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Per-element state. `value` is the live control value and can diverge
/// from the `value` attribute, exactly like the DOM property does.
#[derive(Debug, Clone, Default)]
pub struct ElementData {
    pub tag: String,
    attrs: Vec<(String, String)>,
    pub value: Option<String>,
    pub checked: bool,
    pub selection: Option<(u32, u32)>,
    pub bounds: Rect,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub shadow_root: Option<NodeId>,
    pub content_doc: Option<DocId>,
}

impl ElementData {
    pub fn new(tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        let value = if is_form_control(&tag) {
            Some(String::new())
        } else {
            None
        };
        Self {
            tag,
            value,
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(k, _)| k == name)
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(slot) = self.attrs.iter_mut().find(|(k, _)| k == name) {
            slot.1 = value.to_string();
        } else {
            self.attrs.push((name.to_string(), value.to_string()));
        }
        // The value attribute seeds the live value until a user edit.
        if name == "value" && is_form_control(&self.tag) {
            self.value.get_or_insert_with(String::new);
            if let Some(v) = &mut self.value {
                if v.is_empty() {
                    *v = value.to_string();
                }
            }
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|(k, _)| k != name);
        self.attrs.len() != before
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attr("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// What a node is. Shadow roots record their host so connectivity
/// checks can climb out of the shadow tree.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    ShadowRoot { mode: ShadowMode, host: NodeId },
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListenerRecord {
    pub id: crate::host::event::ListenerId,
    pub phase: crate::host::event::Phase,
    pub tier: crate::host::event::ListenerTier,
}

#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
    pub(crate) listeners: Vec<(String, ListenerRecord)>,
    /// True once removed from its tree. Removed subtrees stay in the
    /// arena so queued captures can still read their final state.
    pub(crate) detached: bool,
}

impl Node {
    pub fn element(&self) -> Option<&ElementData> {
        match &self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.element().map(|el| el.tag.as_str())
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element(_))
    }
}

/// One document tree. The root is always a `Document` node; shadow
/// roots are additional parentless roots linked from host elements.
#[derive(Debug)]
pub struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Dom {
    pub fn new() -> Self {
        let mut dom = Dom {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        dom.root = dom.insert(NodeKind::Document);
        dom
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            parent: None,
            children: Vec::new(),
            kind,
            listeners: Vec::new(),
            detached: false,
        });
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        self.node(id).element()
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        self.node_mut(id).element_mut()
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.insert(NodeKind::Element(ElementData::new(tag)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.insert(NodeKind::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.insert(NodeKind::Comment(text.to_string()))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(self.nodes[child.0].parent.is_none());
        self.nodes[child.0].parent = Some(parent);
        self.nodes[child.0].detached = false;
        self.nodes[parent.0].children.push(child);
    }

    /// Unlinks a subtree. Nodes stay allocated and marked detached.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            self.nodes[n.0].detached = true;
            stack.extend(self.nodes[n.0].children.iter().copied());
        }
    }

    pub fn attach_shadow(&mut self, host: NodeId, mode: ShadowMode) -> NodeId {
        let root = self.insert(NodeKind::ShadowRoot { mode, host });
        if let Some(el) = self.element_mut(host) {
            el.shadow_root = Some(root);
        }
        root
    }

    /// True when the node hangs off the document root, crossing shadow
    /// boundaries through their hosts.
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if self.nodes[current.0].detached {
                return false;
            }
            match (&self.nodes[current.0].kind, self.nodes[current.0].parent) {
                (NodeKind::Document, _) => return true,
                (NodeKind::ShadowRoot { host, .. }, _) => current = *host,
                (_, Some(parent)) => current = parent,
                (_, None) => return false,
            }
        }
    }

    /// Chain from the node up to its tree root, target first. Crosses
    /// shadow boundaries so dispatch paths match composed DOM order.
    pub fn composed_ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(n) = current {
            chain.push(n);
            current = match &self.nodes[n.0].kind {
                NodeKind::ShadowRoot { host, .. } => Some(*host),
                _ => self.nodes[n.0].parent,
            };
        }
        chain
    }

    /// Parent element, crossing shadow boundaries.
    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        let mut current = match &self.nodes[id.0].kind {
            NodeKind::ShadowRoot { host, .. } => Some(*host),
            _ => self.nodes[id.0].parent,
        };
        while let Some(n) = current {
            if self.nodes[n.0].is_element() {
                return Some(n);
            }
            current = match &self.nodes[n.0].kind {
                NodeKind::ShadowRoot { host, .. } => Some(*host),
                _ => self.nodes[n.0].parent,
            };
        }
        None
    }

    /// 1-based position among siblings with the same tag.
    pub fn sibling_index(&self, id: NodeId) -> usize {
        let Some(tag) = self.node(id).tag().map(str::to_string) else {
            return 1;
        };
        let Some(parent) = self.nodes[id.0].parent else {
            return 1;
        };
        let mut index = 0;
        for &sibling in &self.nodes[parent.0].children {
            if self.node(sibling).tag() == Some(tag.as_str()) {
                index += 1;
                if sibling == id {
                    return index;
                }
            }
        }
        1
    }

    /// Breadth-first walk over a subtree, optionally descending into
    /// open shadow roots.
    pub fn descendants(&self, from: NodeId, include_shadow: bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([from]);
        while let Some(n) = queue.pop_front() {
            out.push(n);
            if include_shadow {
                if let Some(el) = self.node(n).element() {
                    if let Some(root) = el.shadow_root {
                        queue.push_back(root);
                    }
                }
            }
            queue.extend(self.nodes[n.0].children.iter().copied());
        }
        out
    }

    pub fn find_by_id(&self, id_attr: &str) -> Option<NodeId> {
        self.descendants(self.root, true).into_iter().find(|&n| {
            self.node(n)
                .element()
                .map(|el| el.id() == Some(id_attr))
                .unwrap_or(false)
        })
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.descendants(self.root, false)
            .into_iter()
            .find(|&n| self.node(n).tag() == Some(tag))
    }

    pub fn find_all_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.descendants(self.root, true)
            .into_iter()
            .filter(|&n| self.node(n).tag() == Some(tag))
            .collect()
    }

    /// Concatenated text of a subtree, whitespace-normalized.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        for n in self.descendants(id, false) {
            if let NodeKind::Text(t) = &self.nodes[n.0].kind {
                let trimmed = t.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
        }
        parts.join(" ")
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

/// Tags whose DOM interface exposes a live `value` property.
pub fn is_form_control(tag: &str) -> bool {
    matches!(tag, "input" | "textarea" | "select" | "option" | "button")
}

/// Tags the capture layer treats as interactive targets.
pub fn is_interactive_tag(tag: &str) -> bool {
    matches!(
        tag,
        "a" | "button" | "input" | "select" | "textarea" | "option" | "label" | "summary"
    )
}
