//! Element snapshots.
//!
//! Everything volatile about a target element is copied synchronously
//! at dispatch time: values and geometry change the moment the page
//! script reacts, so enrichment later works only on this frozen copy
//! plus the node reference for identifier lookup.

use std::collections::BTreeMap;

use crate::capture::identity;
use crate::capture::records::{A11yInfo, BoundingBox, TargetInfo};
use crate::capture::selectors;
use crate::host::dom::{is_interactive_tag, DocId, NodeId};
use crate::host::page::Page;
use crate::host::serialize::{self, SerializeOptions};

const TEXT_MAX: usize = 200;
const SNIPPET_MAX: usize = 3000;

/// Roles that make an element interactive regardless of tag.
const INTERACTIVE_ROLES: [&str; 8] = [
    "button", "link", "checkbox", "radio", "textbox", "combobox", "listbox", "menuitem",
];

/// Frozen copy of an element's observable state at one instant.
#[derive(Debug, Clone)]
pub struct TargetSnapshot {
    pub doc: DocId,
    pub node: NodeId,
    pub tag: String,
    pub id: Option<String>,
    pub class: Option<String>,
    pub text: String,
    pub value: String,
    pub is_interactive: bool,
    pub xpath: String,
    pub css_path: String,
    pub a11y: A11yInfo,
    pub attributes: BTreeMap<String, String>,
    pub bounding_box: BoundingBox,
    pub outer_html_full: String,
    pub outer_html_snippet: String,
    /// Marker identifier already present at capture time.
    pub cached_bid: Option<String>,
    /// Deterministic identifier computed from the same instant,
    /// frame prefix included.
    pub fallback_bid: String,
    pub selection: Option<(u32, u32)>,
}

/// Captures a snapshot of `node`. Non-element targets (the document
/// root for scroll and navigation events) produce a minimal snapshot.
pub fn capture(page: &Page, doc: DocId, node: NodeId) -> TargetSnapshot {
    let dom = page.dom(doc);
    let Some(el) = dom.element(node) else {
        return document_snapshot(page, doc, node);
    };

    let text = clip(&dom.text_content(node), TEXT_MAX);
    let value = unified_value(page, doc, node);
    let attributes: BTreeMap<String, String> = el
        .attrs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let outer_html_full = serialize::node_html(page, doc, node, &SerializeOptions::default());
    let outer_html_snippet = serialize::truncate_chars(&outer_html_full, SNIPPET_MAX);

    TargetSnapshot {
        doc,
        node,
        tag: el.tag.to_ascii_uppercase(),
        id: el.id().map(str::to_string),
        class: el.attr("class").map(str::to_string),
        text,
        value,
        is_interactive: is_interactive(page, doc, node),
        xpath: selectors::xpath(page, doc, node),
        css_path: selectors::css_path(page, doc, node),
        a11y: a11y_info(page, doc, node),
        attributes,
        bounding_box: BoundingBox::from(el.bounds),
        outer_html_full,
        outer_html_snippet,
        cached_bid: identity::marker_bid(page, doc, node),
        fallback_bid: identity::fallback_bid(page, doc, node),
        selection: el.selection,
    }
}

fn document_snapshot(page: &Page, doc: DocId, node: NodeId) -> TargetSnapshot {
    TargetSnapshot {
        doc,
        node,
        tag: "#DOCUMENT".to_string(),
        id: None,
        class: None,
        text: String::new(),
        value: String::new(),
        is_interactive: false,
        xpath: String::new(),
        css_path: String::new(),
        a11y: A11yInfo {
            role: Some("document".to_string()),
            name: None,
            path: String::new(),
            id: None,
            tag: "#document".to_string(),
        },
        attributes: BTreeMap::new(),
        bounding_box: BoundingBox::default(),
        outer_html_full: String::new(),
        outer_html_snippet: String::new(),
        cached_bid: None,
        fallback_bid: format!(
            "{}document",
            page.doc(doc).marker_prefix.clone().unwrap_or_default()
        ),
        selection: None,
    }
}

/// `.value` when the control defines one, else content-editable text,
/// else the `value` attribute, else trimmed text content.
pub fn unified_value(page: &Page, doc: DocId, node: NodeId) -> String {
    let dom = page.dom(doc);
    let Some(el) = dom.element(node) else {
        return String::new();
    };
    if let Some(v) = &el.value {
        return v.clone();
    }
    if el
        .attr("contenteditable")
        .map(|v| v != "false")
        .unwrap_or(false)
    {
        return dom.text_content(node);
    }
    if let Some(v) = el.attr("value") {
        return v.to_string();
    }
    dom.text_content(node)
}

/// Interactive when the tag is a control, the role says so, a click
/// handler is attached, or the element is keyboard-focusable.
pub fn is_interactive(page: &Page, doc: DocId, node: NodeId) -> bool {
    let dom = page.dom(doc);
    let Some(el) = dom.element(node) else {
        return false;
    };
    if is_interactive_tag(&el.tag) {
        return true;
    }
    if let Some(role) = el.attr("role") {
        if INTERACTIVE_ROLES.contains(&role) {
            return true;
        }
    }
    if page.has_listener(doc, node, "click") {
        return true;
    }
    el.attr("tabindex") == Some("0")
}

fn a11y_info(page: &Page, doc: DocId, node: NodeId) -> A11yInfo {
    let dom = page.dom(doc);
    let el = dom.element(node);
    A11yInfo {
        role: el.map(selectors::role_of),
        name: selectors::accessible_name(page, doc, node),
        path: selectors::a11y_path(page, doc, node),
        id: el.and_then(|e| e.id().map(str::to_string)),
        tag: el.map(|e| e.tag.clone()).unwrap_or_default(),
    }
}

/// Final record metadata once the identifier is resolved.
pub fn into_target_info(snapshot: &TargetSnapshot, bid: String) -> TargetInfo {
    TargetInfo {
        tag: snapshot.tag.clone(),
        id: snapshot.id.clone(),
        class: snapshot.class.clone(),
        text: snapshot.text.clone(),
        value: snapshot.value.clone(),
        is_interactive: snapshot.is_interactive,
        xpath: snapshot.xpath.clone(),
        css_path: snapshot.css_path.clone(),
        bid,
        a11y: snapshot.a11y.clone(),
        attributes: snapshot.attributes.clone(),
        bounding_box: snapshot.bounding_box,
        outer_html_snippet: snapshot.outer_html_snippet.clone(),
        outer_html_full: snapshot.outer_html_full.clone(),
    }
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::dom::Rect;
    use crate::utils::time::ManualClock;

    fn page(html: &str) -> Page {
        Page::with_html(ManualClock::new(0), "https://app.example.com/", html)
    }

    #[test]
    fn test_snapshot_of_button_is_complete() {
        let mut p = page(
            "<html><body><button id=\"buy\" class=\"cta big\" title=\"Buy it\">Buy now</button>\
             </body></html>",
        );
        let b = p.dom(DocId::MAIN).find_by_id("buy").unwrap();
        p.set_bounds(DocId::MAIN, b, Rect::new(10.0, 20.0, 80.0, 30.0));

        let snap = capture(&p, DocId::MAIN, b);
        assert_eq!(snap.tag, "BUTTON");
        assert_eq!(snap.id.as_deref(), Some("buy"));
        assert_eq!(snap.class.as_deref(), Some("cta big"));
        assert_eq!(snap.text, "Buy now");
        assert!(snap.is_interactive);
        assert_eq!(snap.fallback_bid, "id-buy");
        assert_eq!(snap.bounding_box.right, 90.0);
        assert_eq!(snap.bounding_box.bottom, 50.0);
        assert_eq!(snap.attributes.get("title").map(String::as_str), Some("Buy it"));
        assert!(snap.outer_html_full.starts_with("<button"));
        assert_eq!(snap.a11y.role.as_deref(), Some("button"));
        assert_eq!(snap.a11y.name.as_deref(), Some("Buy it"));
    }

    #[test]
    fn test_snapshot_freezes_value_at_capture_time() {
        let mut p = page("<html><body><input id=\"q\"></body></html>");
        let input = p.dom(DocId::MAIN).find_by_id("q").unwrap();
        p.dom_mut(DocId::MAIN).element_mut(input).unwrap().value = Some("before".to_string());
        let snap = capture(&p, DocId::MAIN, input);
        p.dom_mut(DocId::MAIN).element_mut(input).unwrap().value = Some("after".to_string());
        assert_eq!(snap.value, "before");
    }

    #[test]
    fn test_unified_value_priority() {
        let p = page(
            "<html><body>\
             <input id=\"a\" value=\"live\">\
             <div id=\"b\" contenteditable=\"true\"> edited </div>\
             <div id=\"c\" value=\"attr-only\">ignored</div>\
             <span id=\"d\">  plain text </span>\
             </body></html>",
        );
        let dom = p.dom(DocId::MAIN);
        let a = dom.find_by_id("a").unwrap();
        assert_eq!(unified_value(&p, DocId::MAIN, a), "live");
        let b = dom.find_by_id("b").unwrap();
        assert_eq!(unified_value(&p, DocId::MAIN, b), "edited");
        let c = dom.find_by_id("c").unwrap();
        assert_eq!(unified_value(&p, DocId::MAIN, c), "attr-only");
        let d = dom.find_by_id("d").unwrap();
        assert_eq!(unified_value(&p, DocId::MAIN, d), "plain text");
    }

    #[test]
    fn test_interactive_classification() {
        let mut p = page(
            "<html><body>\
             <span id=\"role\" role=\"button\">x</span>\
             <span id=\"tab\" tabindex=\"0\">x</span>\
             <span id=\"plain\">x</span>\
             <span id=\"handler\">x</span>\
             </body></html>",
        );
        let dom_ids: Vec<_> = ["role", "tab", "plain", "handler"]
            .iter()
            .map(|id| p.dom(DocId::MAIN).find_by_id(id).unwrap())
            .collect();
        p.add_listener(
            DocId::MAIN,
            dom_ids[3],
            "click",
            crate::host::event::Phase::Bubble,
            crate::host::event::ListenerTier::Page,
            Box::new(|_, _| {}),
        );
        assert!(is_interactive(&p, DocId::MAIN, dom_ids[0]));
        assert!(is_interactive(&p, DocId::MAIN, dom_ids[1]));
        assert!(!is_interactive(&p, DocId::MAIN, dom_ids[2]));
        assert!(is_interactive(&p, DocId::MAIN, dom_ids[3]));
    }

    #[test]
    fn test_text_and_snippet_limits() {
        let long_text = "x".repeat(500);
        let p = page(&format!("<html><body><div id=\"t\">{long_text}</div></body></html>"));
        let d = p.dom(DocId::MAIN).find_by_id("t").unwrap();
        let snap = capture(&p, DocId::MAIN, d);
        assert_eq!(snap.text.chars().count(), 200);
        assert!(snap.outer_html_snippet.chars().count() <= 3000);
    }

    #[test]
    fn test_marker_bid_cached_when_present() {
        let p = page("<html><body><button data-bid=\"m3\">k</button></body></html>");
        let b = p.dom(DocId::MAIN).find_by_tag("button").unwrap();
        let snap = capture(&p, DocId::MAIN, b);
        assert_eq!(snap.cached_bid.as_deref(), Some("m3"));
    }
}
