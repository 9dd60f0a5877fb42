//! HTML parser – converts an HTML string into a simple DOM tree.
//!
//! We support the controlled subset manuals are composed from:
//! - Structural: div, section, article, p, h1-h6, ul, ol, li, table, tr, td,
//!   th, pre, hr, img
//! - Inline: span, a, strong, b, em, i, code, br, small, sup, sub
//! - `script` and `style` bodies are raw text and are dropped
//! - Named and numeric character references

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// DOM types
// ---------------------------------------------------------------------------

/// The tag name of a supported element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Div,
    Section,
    Article,
    P,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    Ul,
    Ol,
    Li,
    Table,
    Tr,
    Td,
    Th,
    Pre,
    Hr,
    Img,
    Span,
    A,
    Strong,
    B,
    Em,
    I,
    Code,
    Br,
    Small,
    Sup,
    Sub,
    Body,
    Html,
    Head,
    Title,
    Script,
    Style,
    Meta,
    Link,
    /// Catch-all for unknown tags – they are kept but treated as divs.
    Unknown(String),
}

impl Tag {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "div" => Tag::Div,
            "section" => Tag::Section,
            "article" => Tag::Article,
            "p" => Tag::P,
            "h1" => Tag::H1,
            "h2" => Tag::H2,
            "h3" => Tag::H3,
            "h4" => Tag::H4,
            "h5" => Tag::H5,
            "h6" => Tag::H6,
            "ul" => Tag::Ul,
            "ol" => Tag::Ol,
            "li" => Tag::Li,
            "table" => Tag::Table,
            "tr" => Tag::Tr,
            "td" => Tag::Td,
            "th" => Tag::Th,
            "pre" => Tag::Pre,
            "hr" => Tag::Hr,
            "img" => Tag::Img,
            "span" => Tag::Span,
            "a" => Tag::A,
            "strong" => Tag::Strong,
            "b" => Tag::B,
            "em" => Tag::Em,
            "i" => Tag::I,
            "code" => Tag::Code,
            "br" => Tag::Br,
            "small" => Tag::Small,
            "sup" => Tag::Sup,
            "sub" => Tag::Sub,
            "body" => Tag::Body,
            "html" => Tag::Html,
            "head" => Tag::Head,
            "title" => Tag::Title,
            "script" => Tag::Script,
            "style" => Tag::Style,
            "meta" => Tag::Meta,
            "link" => Tag::Link,
            other => Tag::Unknown(other.to_string()),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            Tag::Span
                | Tag::A
                | Tag::Strong
                | Tag::B
                | Tag::Em
                | Tag::I
                | Tag::Code
                | Tag::Br
                | Tag::Small
                | Tag::Sup
                | Tag::Sub
        )
    }

    /// Elements that never have children or a closing tag.
    pub fn is_void(&self) -> bool {
        matches!(self, Tag::Img | Tag::Br | Tag::Hr | Tag::Meta | Tag::Link)
            || matches!(self, Tag::Unknown(name) if name == "input" || name == "wbr")
    }

    /// Elements whose body is raw text up to the matching end tag.
    fn is_raw_text(&self) -> bool {
        matches!(self, Tag::Script | Tag::Style)
    }

    /// Heading level for h1-h6.
    pub fn heading_level(&self) -> Option<u8> {
        match self {
            Tag::H1 => Some(1),
            Tag::H2 => Some(2),
            Tag::H3 => Some(3),
            Tag::H4 => Some(4),
            Tag::H5 => Some(5),
            Tag::H6 => Some(6),
            _ => None,
        }
    }

    /// Content never laid out on a page.
    pub fn is_hidden(&self) -> bool {
        matches!(
            self,
            Tag::Head | Tag::Title | Tag::Script | Tag::Style | Tag::Meta | Tag::Link
        )
    }
}

/// A node in our DOM tree.
#[derive(Debug, Clone, PartialEq)]
pub enum DomNode {
    Element(ElementNode),
    Text(String),
}

/// An element node carrying tag, attributes, and children.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub tag: Tag,
    pub attributes: HashMap<String, String>,
    pub children: Vec<DomNode>,
}

impl ElementNode {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    /// The `id` attribute, if present and non-empty.
    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attributes
            .get("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().contains(&class)
    }

    pub fn inline_style(&self) -> Option<&str> {
        self.attr("style")
    }

    /// Value of one declaration in the inline `style` attribute.
    pub fn style_property(&self, property: &str) -> Option<String> {
        self.inline_style()?.split(';').find_map(|decl| {
            let (key, value) = decl.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(property)
                .then(|| value.trim().to_ascii_lowercase())
        })
    }

    pub fn src(&self) -> Option<&str> {
        self.attr("src")
    }

    /// Concatenated text of every descendant, hidden elements excluded.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }
}

fn collect_text(nodes: &[DomNode], out: &mut String) {
    for node in nodes {
        match node {
            DomNode::Text(t) => out.push_str(t),
            DomNode::Element(e) if e.tag.is_hidden() => {}
            DomNode::Element(e) => collect_text(&e.children, out),
        }
    }
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Tree walks
// ---------------------------------------------------------------------------

/// Visit every element in document order (pre-order).
pub fn walk_elements<'a>(nodes: &'a [DomNode], visit: &mut impl FnMut(&'a ElementNode)) {
    for node in nodes {
        if let DomNode::Element(e) = node {
            visit(e);
            walk_elements(&e.children, visit);
        }
    }
}

/// Visit every element in document order, mutably.
pub fn walk_elements_mut(nodes: &mut [DomNode], visit: &mut impl FnMut(&mut ElementNode)) {
    for node in nodes {
        if let DomNode::Element(e) = node {
            visit(e);
            walk_elements_mut(&mut e.children, visit);
        }
    }
}

/// First descendant of `element` (not the element itself) carrying an id.
pub fn first_descendant_id(element: &ElementNode) -> Option<&str> {
    let mut found = None;
    walk_elements(&element.children, &mut |e| {
        if found.is_none() {
            found = e.id();
        }
    });
    found
}

// ---------------------------------------------------------------------------
// Parser – simple recursive descent over HTML
// ---------------------------------------------------------------------------

/// Parse an HTML string into a list of DOM nodes.
///
/// We use a hand-written parser that handles the controlled subset. Unclosed
/// elements are closed at the end of their parent.
pub fn parse_html(html: &str) -> Vec<DomNode> {
    let mut parser = Parser::new(html);
    let mut nodes = parser.parse_nodes();
    // A stray end tag at the top level must not end the document.
    while !parser.eof() {
        parser.skip_past(">");
        nodes.extend(parser.parse_nodes());
    }
    nodes
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_nodes(&mut self) -> Vec<DomNode> {
        let mut nodes = Vec::new();
        loop {
            self.skip_whitespace_preserve();
            if self.eof() || self.starts_with("</") {
                break;
            }
            if let Some(node) = self.parse_node() {
                nodes.push(node);
            }
        }
        nodes
    }

    fn parse_node(&mut self) -> Option<DomNode> {
        if self.starts_with("<!--") {
            self.skip_comment();
            return None;
        }
        if self.starts_with("<!") || self.starts_with("<?") {
            // Skip doctype / processing instructions
            self.skip_past(">");
            return None;
        }
        let next_is_name = self.input[self.pos..]
            .chars()
            .nth(1)
            .is_some_and(|c| c.is_ascii_alphabetic());
        if self.starts_with("<") && next_is_name {
            Some(self.parse_element())
        } else {
            Some(self.parse_text())
        }
    }

    fn parse_text(&mut self) -> DomNode {
        let start = self.pos;
        // A stray '<' that does not open a tag is text.
        if self.starts_with("<") {
            self.advance(1);
        }
        while !self.eof() && !self.starts_with("<") {
            self.advance(1);
        }
        let text = &self.input[start..self.pos];
        DomNode::Text(decode_entities(text))
    }

    fn parse_element(&mut self) -> DomNode {
        // Consume '<'
        self.advance(1);
        let tag_name = self.parse_name();
        let tag = Tag::parse(&tag_name);
        let mut elem = ElementNode::new(tag.clone());

        // Parse attributes
        loop {
            self.skip_whitespace();
            if self.eof() || self.starts_with(">") || self.starts_with("/>") {
                break;
            }
            let before = self.pos;
            let (key, value) = self.parse_attribute();
            if self.pos == before {
                // Unparseable character inside the tag.
                self.advance(1);
                continue;
            }
            if !key.is_empty() {
                elem.attributes.entry(key.to_ascii_lowercase()).or_insert(value);
            }
        }

        if self.starts_with("/>") {
            self.advance(2);
            return DomNode::Element(elem);
        }
        if self.starts_with(">") {
            self.advance(1);
        }
        if tag.is_void() {
            return DomNode::Element(elem);
        }
        if tag.is_raw_text() {
            self.skip_raw_text(&tag_name);
            return DomNode::Element(elem);
        }

        // Parse children
        elem.children = self.parse_nodes();

        // Consume closing tag
        if self.starts_with("</") {
            self.advance(2);
            self.parse_name();
            self.skip_whitespace();
            if self.starts_with(">") {
                self.advance(1);
            }
        }

        DomNode::Element(elem)
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.current_char() {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == ':' {
                self.advance(1);
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_string()
    }

    fn parse_attribute(&mut self) -> (String, String) {
        let key = self.parse_name();
        self.skip_whitespace();
        if !self.starts_with("=") {
            return (key, String::new());
        }
        self.advance(1); // skip '='
        self.skip_whitespace();
        let value = self.parse_attr_value();
        (key, value)
    }

    fn parse_attr_value(&mut self) -> String {
        for quote in ["\"", "'"] {
            if self.starts_with(quote) {
                self.advance(1);
                let start = self.pos;
                while !self.eof() && !self.starts_with(quote) {
                    self.advance(1);
                }
                let val = self.input[start..self.pos].to_string();
                if !self.eof() {
                    self.advance(1);
                }
                return decode_entities(&val);
            }
        }
        let start = self.pos;
        while let Some(c) = self.current_char() {
            if c.is_whitespace() || c == '>' {
                break;
            }
            if c == '/' && self.input[self.pos..].starts_with("/>") {
                break;
            }
            self.advance(1);
        }
        decode_entities(&self.input[start..self.pos])
    }

    /// Skip the body of a raw-text element and its end tag.
    fn skip_raw_text(&mut self, tag_name: &str) {
        let end_tag = format!("</{}", tag_name.to_ascii_lowercase());
        let rest = self.input[self.pos..].to_ascii_lowercase();
        match rest.find(&end_tag) {
            Some(offset) => {
                self.pos += offset;
                self.skip_past(">");
            }
            None => self.pos = self.input.len(),
        }
    }

    fn skip_past(&mut self, marker: &str) {
        match self.input[self.pos..].find(marker) {
            Some(offset) => self.pos += offset + marker.len(),
            None => self.pos = self.input.len(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.current_char().is_some_and(char::is_whitespace) {
            self.advance(1);
        }
    }

    fn skip_whitespace_preserve(&mut self) {
        // Skip runs of pure whitespace between elements.
        let saved = self.pos;
        self.skip_whitespace();
        // If we reached a tag or EOF, keep the skip. Otherwise revert.
        if !self.eof() && !self.starts_with("<") {
            self.pos = saved;
        }
    }

    fn skip_comment(&mut self) {
        self.advance(4); // skip <!--
        self.skip_past("-->");
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self, n: usize) {
        // Advance by `n` characters (not bytes).
        for _ in 0..n {
            if let Some(c) = self.current_char() {
                self.pos += c.len_utf8();
            }
        }
    }
}

/// Decode named and numeric character references.
fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|semi| *semi <= 10)
            .and_then(|semi| decode_reference(&after[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{00A0}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "hellip" => '\u{2026}',
        "copy" => '\u{00A9}',
        "reg" => '\u{00AE}',
        "trade" => '\u{2122}',
        "bull" => '\u{2022}',
        "rarr" => '\u{2192}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Convenience helpers
// ---------------------------------------------------------------------------

/// Find the `<body>` element and return its children, or return all nodes if
/// no `<body>` is present.
pub fn body_children(nodes: &[DomNode]) -> &[DomNode] {
    for node in nodes {
        if let DomNode::Element(e) = node {
            if e.tag == Tag::Body {
                return &e.children;
            }
            // Recurse into <html>
            if e.tag == Tag::Html {
                let inner = body_children(&e.children);
                if !std::ptr::eq(inner, e.children.as_slice()) {
                    return inner;
                }
            }
        }
    }
    nodes
}

/// Text of the first `<title>` element.
pub fn document_title(nodes: &[DomNode]) -> Option<String> {
    let mut title = None;
    walk_elements(nodes, &mut |e| {
        if title.is_none() && e.tag == Tag::Title {
            title = Some(collapse_whitespace(&e.text_content()));
        }
    });
    title.filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_element(nodes: &[DomNode]) -> &ElementNode {
        match &nodes[0] {
            DomNode::Element(e) => e,
            other => panic!("Expected element, got {other:?}"),
        }
    }

    #[test]
    fn parse_simple_div() {
        let html = r#"<div class="chapter intro"><p>Hello</p></div>"#;
        let nodes = parse_html(html);
        assert_eq!(nodes.len(), 1);
        let e = first_element(&nodes);
        assert_eq!(e.tag, Tag::Div);
        assert_eq!(e.classes(), vec!["chapter", "intro"]);
        assert!(e.has_class("chapter"));
        assert_eq!(e.children.len(), 1);
    }

    #[test]
    fn parse_void_elements() {
        let nodes = parse_html(r#"<p>one<br>two<img src="data:x"></p><hr><p>three</p>"#);
        assert_eq!(nodes.len(), 3);
        let p = first_element(&nodes);
        assert_eq!(p.children.len(), 4);
        assert_eq!(p.text_content(), "onetwo");
    }

    #[test]
    fn script_and_style_bodies_are_dropped() {
        let html = "<style>p > a { color: red }</style><script>if (a < b) {}</script><p>Body</p>";
        let nodes = parse_html(html);
        assert_eq!(nodes.len(), 3);
        if let DomNode::Element(p) = &nodes[2] {
            assert_eq!(p.text_content(), "Body");
        } else {
            panic!("Expected p element");
        }
    }

    #[test]
    fn entities_decode() {
        let nodes = parse_html("<p>a &amp; b &#xBAA9; &#54620; &mdash; &unknown; &</p>");
        assert_eq!(first_element(&nodes).text_content(), "a & b 목 한 \u{2014} &unknown; &");
    }

    #[test]
    fn ids_and_styles() {
        let html = r#"<section id="ch1" style="page-break-before: ALWAYS; color: red"><h1 id="intro">1. Intro</h1></section>"#;
        let nodes = parse_html(html);
        let section = first_element(&nodes);
        assert_eq!(section.id(), Some("ch1"));
        assert_eq!(section.style_property("page-break-before").as_deref(), Some("always"));
        assert_eq!(first_descendant_id(section), Some("intro"));
    }

    #[test]
    fn body_children_and_title() {
        let html = "<!DOCTYPE html><html><head><title> Ops  Guide </title></head><body><p>x</p></body></html>";
        let nodes = parse_html(html);
        assert_eq!(body_children(&nodes).len(), 1);
        assert_eq!(document_title(&nodes).as_deref(), Some("Ops Guide"));
    }

    #[test]
    fn parse_table() {
        let html = r#"<table><tr><th>Name</th><th>Age</th></tr><tr><td>Alice</td><td>30</td></tr></table>"#;
        let nodes = parse_html(html);
        assert_eq!(nodes.len(), 1);
        let table = first_element(&nodes);
        assert_eq!(table.tag, Tag::Table);
        assert_eq!(table.children.len(), 2); // 2 rows
    }
}
