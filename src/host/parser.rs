//! Forgiving HTML parser.
//!
//! Builds arena nodes from markup the way capture targets actually ship
//! it: unclosed tags, bare attributes, stray close tags. Not a
//! standards-grade parser; it covers the constructs session pages use.
//! Whitespace-only text between tags is dropped, raw text inside
//! `script` and `style` is preserved verbatim.

use crate::host::dom::{Dom, NodeId};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Elements whose text content is never entity-escaped.
pub(crate) fn is_raw_text(tag: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&tag)
}

/// Parses a full document into `dom` under its document root. Ensures
/// an `html > body` skeleton when the markup has none.
pub fn parse_into(dom: &mut Dom, html: &str) {
    let mut parser = Parser::new(html);
    let mut top = Vec::new();
    loop {
        top.extend(parser.parse_nodes(dom));
        if parser.eof() {
            break;
        }
        // Stray close tag at top level; skip it and keep going.
        parser.skip_tag();
    }

    let root = dom.root();
    let has_html = top
        .iter()
        .any(|&n| dom.node(n).tag() == Some("html"));
    if has_html {
        for n in top {
            dom.append_child(root, n);
        }
    } else {
        let html_el = dom.create_element("html");
        let body = dom.create_element("body");
        dom.append_child(root, html_el);
        dom.append_child(html_el, body);
        for n in top {
            dom.append_child(body, n);
        }
    }
}

/// Parses a fragment and hangs the produced top-level nodes under
/// `parent`. Returns those nodes in document order.
pub fn parse_fragment(dom: &mut Dom, parent: NodeId, html: &str) -> Vec<NodeId> {
    let mut parser = Parser::new(html);
    let mut top = Vec::new();
    loop {
        top.extend(parser.parse_nodes(dom));
        if parser.eof() {
            break;
        }
        parser.skip_tag();
    }
    for &n in &top {
        dom.append_child(parent, n);
    }
    top
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn next_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.next_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn consume_while(&mut self, test: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.next_char() {
            if !test(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        self.consume_while(|c| c.is_whitespace());
    }

    /// Skips one tag-shaped run, used for stray close tags.
    fn skip_tag(&mut self) {
        while let Some(c) = self.bump() {
            if c == '>' {
                break;
            }
        }
    }

    fn parse_nodes(&mut self, dom: &mut Dom) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        loop {
            if self.eof() || self.starts_with("</") {
                break;
            }
            if let Some(node) = self.parse_node(dom) {
                nodes.push(node);
            }
        }
        nodes
    }

    fn parse_node(&mut self, dom: &mut Dom) -> Option<NodeId> {
        if self.starts_with("<!--") {
            return self.parse_comment(dom);
        }
        if self.starts_with("<!") {
            // Doctype or declaration; structure only, no node.
            self.skip_tag();
            return None;
        }
        if self.starts_with("<") && self.rest().len() > 1 {
            return Some(self.parse_element(dom));
        }
        self.parse_text(dom)
    }

    fn parse_comment(&mut self, dom: &mut Dom) -> Option<NodeId> {
        self.pos += 4; // <!--
        let start = self.pos;
        let end = self.rest().find("-->").map(|i| self.pos + i);
        let (text, next) = match end {
            Some(e) => (&self.input[start..e], e + 3),
            None => (&self.input[start..], self.input.len()),
        };
        self.pos = next;
        Some(dom.create_comment(text))
    }

    fn parse_text(&mut self, dom: &mut Dom) -> Option<NodeId> {
        let raw = self.consume_while(|c| c != '<');
        if raw.is_empty() {
            // Lone '<' at end of input; never stall.
            self.bump();
            return None;
        }
        if raw.trim().is_empty() {
            return None;
        }
        Some(dom.create_text(&decode_entities(raw)))
    }

    fn parse_element(&mut self, dom: &mut Dom) -> NodeId {
        self.bump(); // <
        let tag = self
            .consume_while(|c| c.is_ascii_alphanumeric() || c == '-')
            .to_ascii_lowercase();
        let node = dom.create_element(&tag);

        // Attributes.
        let mut self_closing = false;
        loop {
            self.skip_whitespace();
            match self.next_char() {
                None => break,
                Some('>') => {
                    self.bump();
                    break;
                }
                Some('/') => {
                    self.bump();
                    if self.next_char() == Some('>') {
                        self.bump();
                    }
                    self_closing = true;
                    break;
                }
                _ => {
                    let (name, value) = self.parse_attribute();
                    if !name.is_empty() {
                        if let Some(el) = dom.element_mut(node) {
                            el.set_attr(&name, &value);
                        }
                    }
                }
            }
        }

        if self_closing || VOID_ELEMENTS.contains(&tag.as_str()) {
            return node;
        }

        if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
            let close = format!("</{tag}");
            let raw_end = self
                .rest()
                .to_ascii_lowercase()
                .find(&close)
                .map(|i| self.pos + i)
                .unwrap_or(self.input.len());
            let raw = &self.input[self.pos..raw_end];
            if !raw.is_empty() {
                let text = dom.create_text(raw);
                dom.append_child(node, text);
            }
            self.pos = raw_end;
            if !self.eof() {
                self.skip_tag();
            }
            return node;
        }

        let children = self.parse_nodes(dom);
        for child in children {
            dom.append_child(node, child);
        }

        // Matching (or stray) close tag.
        if self.starts_with("</") {
            self.skip_tag();
        }
        node
    }

    fn parse_attribute(&mut self) -> (String, String) {
        let name = self
            .consume_while(|c| !c.is_whitespace() && c != '=' && c != '>' && c != '/')
            .to_ascii_lowercase();
        self.skip_whitespace();
        if self.next_char() != Some('=') {
            return (name, String::new());
        }
        self.bump(); // =
        self.skip_whitespace();
        let value = match self.next_char() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                let v = self.consume_while(|c| c != q).to_string();
                self.bump();
                v
            }
            _ => self
                .consume_while(|c| !c.is_whitespace() && c != '>')
                .to_string(),
        };
        (name, decode_entities(&value))
    }
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}
