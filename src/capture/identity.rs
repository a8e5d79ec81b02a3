//! Stable element identifiers.
//!
//! The marker stamps each element with an identifier attribute in page
//! context. When it has not run yet (or never will), a deterministic
//! fallback is synthesized from stable attributes, or from structural
//! fingerprinting as a last resort, and written back to the element so
//! later captures agree.

use crate::host::dom::{DocId, NodeId};
use crate::host::page::Page;

/// Attribute the marker writes.
pub const MARKER_ATTR: &str = "data-bid";
/// Legacy attribute some pages carry already.
pub const MARKER_ATTR_LEGACY: &str = "bid";

/// Stable attributes tried in order; the short name becomes the
/// identifier prefix.
const FALLBACK_ATTRS: [(&str, &str); 8] = [
    ("data-testid", "test-id"),
    ("aria-label", "aria-label"),
    ("id", "id"),
    ("name", "name"),
    ("placeholder", "placeholder"),
    ("alt", "alt"),
    ("title", "title"),
    ("role", "role"),
];

/// Marker-assigned identifier, when present.
pub fn marker_bid(page: &Page, doc: DocId, node: NodeId) -> Option<String> {
    let el = page.dom(doc).element(node)?;
    el.attr(MARKER_ATTR)
        .or_else(|| el.attr(MARKER_ATTR_LEGACY))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Deterministic identifier used when the marker is absent. The frame
/// prefix (when any) keeps identifiers globally unique across frames.
pub fn fallback_bid(page: &Page, doc: DocId, node: NodeId) -> String {
    let prefix = page
        .doc(doc)
        .marker_prefix
        .clone()
        .unwrap_or_default();
    format!("{prefix}{}", fallback_base(page, doc, node))
}

fn fallback_base(page: &Page, doc: DocId, node: NodeId) -> String {
    let dom = page.dom(doc);
    let Some(el) = dom.element(node) else {
        return format!("node-{}", node.0);
    };

    for (attr, prefix) in FALLBACK_ATTRS {
        if let Some(value) = el.attr(attr) {
            let slug = normalize(value);
            if !slug.is_empty() {
                return format!("{prefix}-{slug}");
            }
        }
    }

    let class_slug = normalize(&el.classes().join(" "));
    let tag = el.tag.clone();
    let hash = hash6(&dom_fingerprint(page, doc, node, &tag, &class_slug));
    if class_slug.is_empty() {
        format!("{tag}-{hash}")
    } else {
        format!("{tag}-{class_slug}-{hash}")
    }
}

fn dom_fingerprint(
    page: &Page,
    doc: DocId,
    node: NodeId,
    tag: &str,
    class_slug: &str,
) -> String {
    let dom = page.dom(doc);
    let text: String = dom.text_content(node).chars().take(30).collect();
    let index = dom.sibling_index(node);
    format!("{tag}|{class_slug}|{text}|{index}")
}

/// Writes a fallback identifier onto a still-connected element so the
/// next observation returns the same value.
pub fn write_back(page: &mut Page, doc: DocId, node: NodeId, bid: &str) -> bool {
    if !page.dom(doc).is_connected(node) {
        return false;
    }
    if let Some(el) = page.dom_mut(doc).element_mut(node) {
        el.set_attr(MARKER_ATTR, bid);
        return true;
    }
    false
}

/// Lowercase slug: alphanumerics kept, runs of anything else become a
/// single dash. Capped so attribute-derived identifiers stay short.
pub fn normalize(value: &str) -> String {
    let mut out = String::with_capacity(value.len().min(40));
    let mut dash = false;
    for c in value.chars() {
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
        if out.len() >= 40 {
            break;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Base-36 DJB2, truncated to six characters.
pub fn hash6(seed: &str) -> String {
    let mut h: u32 = 5381;
    for b in seed.bytes() {
        h = h.wrapping_mul(33).wrapping_add(u32::from(b));
    }
    let mut n = h;
    let mut digits = Vec::new();
    if n == 0 {
        digits.push(b'0');
    }
    while n > 0 {
        let d = (n % 36) as u8;
        digits.push(if d < 10 { b'0' + d } else { b'a' + d - 10 });
        n /= 36;
    }
    digits.reverse();
    let s: String = digits.into_iter().map(char::from).collect();
    s.chars().take(6).collect()
}
