//! Selector derivation: CSS path, XPath, accessibility path.
//!
//! Paths are bounded bottom-up walks. An id terminates the walk early
//! since it already pins the element; otherwise tag plus positional
//! hints keep selectors unambiguous enough for replay matching.

use crate::host::dom::{DocId, ElementData, NodeId};
use crate::host::page::Page;

/// Ancestor budget shared by the CSS and accessibility paths.
const MAX_SEGMENTS: usize = 5;
const A11Y_NAME_MAX: usize = 25;

/// CSS path with at most five segments, ending early at an id.
pub fn css_path(page: &Page, doc: DocId, node: NodeId) -> String {
    let dom = page.dom(doc);
    let mut segments: Vec<String> = Vec::new();
    let mut current = Some(node);

    while let Some(n) = current {
        if segments.len() >= MAX_SEGMENTS {
            break;
        }
        let Some(el) = dom.element(n) else {
            break;
        };
        if let Some(id) = el.id() {
            segments.push(format!("#{id}"));
            break;
        }
        let mut seg = el.tag.clone();
        for class in el.classes() {
            seg.push('.');
            seg.push_str(class);
        }
        if has_same_tag_sibling(page, doc, n) {
            seg.push_str(&format!(":nth-of-type({})", dom.sibling_index(n)));
        }
        segments.push(seg);
        current = dom.parent_element(n);
    }

    segments.reverse();
    segments.join(" > ")
}

/// XPath terminating at an id, `body`, or the document element.
pub fn xpath(page: &Page, doc: DocId, node: NodeId) -> String {
    let dom = page.dom(doc);
    let Some(el) = dom.element(node) else {
        return String::new();
    };
    if let Some(id) = el.id() {
        return format!("//*[@id=\"{id}\"]");
    }
    match el.tag.as_str() {
        "body" => return "/html/body".to_string(),
        "html" => return "/html".to_string(),
        _ => {}
    }

    let step = format!("{}[{}]", el.tag, dom.sibling_index(node));
    match dom.parent_element(node) {
        Some(parent) => format!("{}/{}", xpath(page, doc, parent), step),
        None => format!("/{step}"),
    }
}

/// Accessibility path: up to five `role[name]` segments, element first
/// ancestor-last reversed into document order.
pub fn a11y_path(page: &Page, doc: DocId, node: NodeId) -> String {
    let dom = page.dom(doc);
    let mut segments: Vec<String> = Vec::new();
    let mut current = Some(node);

    while let Some(n) = current {
        if segments.len() >= MAX_SEGMENTS {
            break;
        }
        let Some(el) = dom.element(n) else {
            break;
        };
        let role = role_of(el);
        let name = accessible_name(page, doc, n);
        let segment = match name {
            Some(name) => format!("{role}[{}]", ellipsize(&name, A11Y_NAME_MAX)),
            None => role,
        };
        segments.push(segment);
        current = dom.parent_element(n);
    }

    segments.reverse();
    segments.join(" > ")
}

/// Explicit `role` attribute, else an implicit mapping for common tags.
pub fn role_of(el: &ElementData) -> String {
    if let Some(role) = el.attr("role") {
        if !role.is_empty() {
            return role.to_string();
        }
    }
    implicit_role(&el.tag, el.attr("type")).to_string()
}

fn implicit_role(tag: &str, input_type: Option<&str>) -> &'static str {
    match tag {
        "a" => "link",
        "button" => "button",
        "select" => "combobox",
        "textarea" => "textbox",
        "img" => "img",
        "nav" => "navigation",
        "main" => "main",
        "form" => "form",
        "table" => "table",
        "ul" | "ol" => "list",
        "li" => "listitem",
        "option" => "option",
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "input" => match input_type.unwrap_or("text") {
            "checkbox" => "checkbox",
            "radio" => "radio",
            "button" | "submit" | "reset" => "button",
            "range" => "slider",
            _ => "textbox",
        },
        _ => "generic",
    }
}

/// aria-label, alt, title, then text clipped to 50 chars.
pub fn accessible_name(page: &Page, doc: DocId, node: NodeId) -> Option<String> {
    let dom = page.dom(doc);
    let el = dom.element(node)?;
    for attr in ["aria-label", "alt", "title"] {
        if let Some(v) = el.attr(attr) {
            if !v.trim().is_empty() {
                return Some(v.trim().to_string());
            }
        }
    }
    let text: String = dom.text_content(node).chars().take(50).collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn has_same_tag_sibling(page: &Page, doc: DocId, node: NodeId) -> bool {
    let dom = page.dom(doc);
    let Some(tag) = dom.node(node).tag() else {
        return false;
    };
    let Some(parent) = dom.node(node).parent else {
        return false;
    };
    dom.node(parent)
        .children
        .iter()
        .filter(|&&c| dom.node(c).tag() == Some(tag))
        .count()
        > 1
}

fn ellipsize(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
