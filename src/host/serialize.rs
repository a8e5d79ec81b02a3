//! DOM to HTML serialization.
//!
//! Used by element snapshots (single subtree) and full-page capture
//! (whole document with frame contents inlined as `srcdoc`). Open
//! shadow roots serialize as declarative `<template shadowrootmode>`
//! blocks so replay tooling can rebuild the composed tree.

use std::collections::HashMap;

use crate::host::dom::{DocId, NodeId, NodeKind, ShadowMode};
use crate::host::page::Page;
use crate::host::parser;

/// Controls for one serialization pass.
#[derive(Debug, Default)]
pub struct SerializeOptions {
    /// Omit the injected marker script element with this id.
    pub skip_script_id: Option<String>,
    /// Serialize open shadow roots as declarative templates.
    pub include_shadow: bool,
    /// Collapse whitespace runs in text nodes.
    pub minify: bool,
    /// Pre-gathered frame HTML, inlined as `srcdoc` on the iframe.
    pub inline_frames: HashMap<NodeId, String>,
    /// Replace same-origin stylesheet links with inline `<style>`.
    pub inline_same_origin_styles: bool,
}

impl SerializeOptions {
    /// Settings used for full-page captures.
    pub fn page_capture(marker_script_id: &str) -> Self {
        Self {
            skip_script_id: Some(marker_script_id.to_string()),
            include_shadow: true,
            minify: true,
            inline_frames: HashMap::new(),
            inline_same_origin_styles: true,
        }
    }
}

/// Serializes a whole document, doctype included.
pub fn document_html(page: &Page, doc: DocId, opts: &SerializeOptions) -> String {
    let dom = page.dom(doc);
    let mut out = String::from("<!DOCTYPE html>");
    for &child in &dom.node(dom.root()).children {
        write_node(page, doc, child, opts, &mut out);
    }
    out
}

/// Serializes one subtree, the element's own tag included.
pub fn node_html(page: &Page, doc: DocId, node: NodeId, opts: &SerializeOptions) -> String {
    let mut out = String::new();
    write_node(page, doc, node, opts, &mut out);
    out
}

fn write_node(page: &Page, doc: DocId, node: NodeId, opts: &SerializeOptions, out: &mut String) {
    let dom = page.dom(doc);
    match &dom.node(node).kind {
        NodeKind::Document | NodeKind::ShadowRoot { .. } => {
            for &child in &dom.node(node).children {
                write_node(page, doc, child, opts, out);
            }
        }
        NodeKind::Text(text) => {
            let escaped = escape_text(text);
            if opts.minify {
                let collapsed = collapse_whitespace(&escaped);
                if collapsed != " " {
                    out.push_str(&collapsed);
                }
            } else {
                out.push_str(&escaped);
            }
        }
        NodeKind::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeKind::Element(el) => {
            if el.tag == "script" {
                if let (Some(skip), Some(id)) = (&opts.skip_script_id, el.id()) {
                    if skip.as_str() == id {
                        return;
                    }
                }
            }
            if el.tag == "link"
                && opts.inline_same_origin_styles
                && el.attr("rel") == Some("stylesheet")
            {
                if let Some(css) = same_origin_css(page, doc, el.attr("href")) {
                    out.push_str("<style");
                    if let Some(href) = el.attr("href") {
                        out.push_str(" data-href=\"");
                        out.push_str(&escape_attr(href));
                        out.push('"');
                    }
                    out.push('>');
                    out.push_str(&css);
                    out.push_str("</style>");
                    return;
                }
            }

            out.push('<');
            out.push_str(&el.tag);
            let inline = opts.inline_frames.get(&node);
            for (name, value) in el.attrs() {
                if inline.is_some() && name == "srcdoc" {
                    continue;
                }
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            if let Some(frame_html) = inline {
                out.push_str(" srcdoc=\"");
                out.push_str(&escape_attr(frame_html));
                out.push('"');
            }
            if is_void(&el.tag) {
                out.push('>');
                return;
            }
            out.push('>');

            if opts.include_shadow {
                if let Some(root) = el.shadow_root {
                    if let NodeKind::ShadowRoot {
                        mode: ShadowMode::Open,
                        ..
                    } = dom.node(root).kind
                    {
                        out.push_str("<template shadowrootmode=\"open\">");
                        write_node(page, doc, root, opts, out);
                        out.push_str("</template>");
                    }
                }
            }

            if parser::is_raw_text(&el.tag) {
                // Script and style bodies go out verbatim; escaping
                // them would change their meaning on replay.
                for &child in &dom.node(node).children {
                    if let NodeKind::Text(t) = &dom.node(child).kind {
                        out.push_str(t);
                    }
                }
            } else {
                for &child in &dom.node(node).children {
                    write_node(page, doc, child, opts, out);
                }
            }
            out.push_str("</");
            out.push_str(&el.tag);
            out.push('>');
        }
    }
}

fn same_origin_css(page: &Page, doc: DocId, href: Option<&str>) -> Option<String> {
    let href = href?;
    page.doc(doc)
        .stylesheets
        .iter()
        .find(|s| s.same_origin && s.href.as_deref() == Some(href))
        .map(|s| s.css.clone())
}

fn is_void(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_ws = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
                in_ws = true;
            }
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Truncates on a char boundary; used for snapshot snippets.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

/// Re-parses serialized HTML. Round-trip helper for verification.
pub fn reparse(html: &str) -> crate::host::dom::Dom {
    let mut dom = crate::host::dom::Dom::new();
    parser::parse_into(&mut dom, html);
    dom
}
