//! Flow layout and pagination – walks the DOM top to bottom and places
//! wrapped lines, images and rules onto pages.
//!
//! Handles:
//! - Page-break-before / page-break-after hints (classes and inline styles)
//! - Headings kept with the line that follows them
//! - Lists with bullet / number markers
//! - Preformatted blocks in Courier with a background band
//! - Simple tables with equal-width columns
//!
//! Every element id is recorded as an [`AnchorMark`] at the position of the
//! first content laid out for that element.

use std::collections::HashMap;

use crate::config::PrintOptions;
use crate::fonts::{wrap_text, BuiltinFace};

use super::dom::{collapse_whitespace, DomNode, ElementNode, Tag};
use super::layout::{
    AnchorMark, ImageContent, LayoutBox, LayoutConfig, PageLayout, RuleStyle, TextContent, TextLine,
};

const BODY_SIZE: f32 = 10.5;
const LINE_FACTOR: f32 = 1.35;
const PARAGRAPH_GAP: f32 = 6.0;
const LIST_ITEM_GAP: f32 = 2.0;
const LIST_INDENT: f32 = 18.0;
const PRE_SIZE: f32 = 9.0;
const PRE_PADDING: f32 = 4.0;
const CELL_PADDING: f32 = 3.0;
const HEADING_SIZES: [f32; 6] = [22.0, 17.0, 14.0, 12.0, 11.0, 10.5];
const TEXT_COLOR: [f32; 3] = [0.1, 0.1, 0.1];
const PRE_BACKGROUND: [f32; 3] = [0.94, 0.94, 0.94];
const RULE_COLOR: [f32; 3] = [0.75, 0.75, 0.75];

/// Pixel dimensions of decoded images, by `src`.
pub type ImageSizes = HashMap<String, (u32, u32)>;

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    face: BuiltinFace,
    size: f32,
}

impl TextStyle {
    const BODY: Self = Self {
        face: BuiltinFace::Helvetica,
        size: BODY_SIZE,
    };

    fn line_height(&self) -> f32 {
        self.size * LINE_FACTOR
    }
}

/// Block context inherited by children.
#[derive(Debug, Clone, Copy)]
struct Block {
    indent: f32,
    style: TextStyle,
    gap: f32,
}

/// Lay out `nodes` (the body content) into pages.
pub fn flow_document(nodes: &[DomNode], title: &str, options: &PrintOptions, images: &ImageSizes) -> LayoutConfig {
    let mut flow = Flow::new(title, options, images);
    let block = Block {
        indent: 0.0,
        style: TextStyle::BODY,
        gap: PARAGRAPH_GAP,
    };
    flow.layout_nodes(nodes, block);
    flow.finish()
}

struct Flow<'a> {
    options: &'a PrintOptions,
    images: &'a ImageSizes,
    layout: LayoutConfig,
    current: Vec<LayoutBox>,
    /// Page-absolute y (top-left origin) of the next content.
    cursor: f32,
    /// Ids waiting for the next placed box.
    pending_anchors: Vec<String>,
}

impl<'a> Flow<'a> {
    fn new(title: &str, options: &'a PrintOptions, images: &'a ImageSizes) -> Self {
        Self {
            options,
            images,
            layout: LayoutConfig::new(title, options.effective_width(), options.effective_height()),
            current: Vec::new(),
            cursor: options.margins.top,
            pending_anchors: Vec::new(),
        }
    }

    fn left(&self) -> f32 {
        self.options.margins.left
    }

    fn bottom(&self) -> f32 {
        self.options.effective_height() - self.options.margins.bottom
    }

    fn content_width(&self) -> f32 {
        self.options.content_width()
    }

    fn at_page_top(&self) -> bool {
        self.current.is_empty()
    }

    fn new_page(&mut self) {
        let boxes = std::mem::take(&mut self.current);
        self.layout.pages.push(PageLayout {
            page_index: self.layout.pages.len(),
            boxes,
        });
        self.cursor = self.options.margins.top;
    }

    /// Forced break; a no-op at the top of an empty page.
    fn break_page(&mut self) {
        if !self.at_page_top() {
            self.new_page();
        }
    }

    /// Start a new page unless `height` more points fit on this one.
    fn ensure_room(&mut self, height: f32) {
        if self.cursor + height > self.bottom() && !self.at_page_top() {
            self.new_page();
        }
    }

    fn place(&mut self, b: LayoutBox) {
        let page_index = self.layout.pages.len();
        for id in self.pending_anchors.drain(..) {
            self.layout.anchors.push(AnchorMark {
                id,
                page_index,
                x: self.options.margins.left,
                y: b.y,
            });
        }
        self.current.push(b);
    }

    fn finish(mut self) -> LayoutConfig {
        if !self.pending_anchors.is_empty() {
            let (page_index, y) = if self.at_page_top() && !self.layout.pages.is_empty() {
                (self.layout.pages.len() - 1, self.bottom())
            } else {
                (self.layout.pages.len(), self.cursor)
            };
            for id in self.pending_anchors.drain(..) {
                self.layout.anchors.push(AnchorMark {
                    id,
                    page_index,
                    x: self.options.margins.left,
                    y,
                });
            }
        }
        if !self.current.is_empty() || self.layout.pages.is_empty() {
            self.new_page();
        }
        self.layout
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    fn layout_nodes(&mut self, nodes: &[DomNode], block: Block) {
        let mut run: Vec<&DomNode> = Vec::new();
        for node in nodes {
            if is_inline(node) {
                run.push(node);
                continue;
            }
            self.flush_inline_run(&mut run, block);
            if let DomNode::Element(e) = node {
                self.layout_element(e, block);
            }
        }
        self.flush_inline_run(&mut run, block);
    }

    fn flush_inline_run(&mut self, run: &mut Vec<&DomNode>, block: Block) {
        if run.is_empty() {
            return;
        }
        let nodes: Vec<DomNode> = run.drain(..).cloned().collect();
        collect_ids(&nodes, &mut self.pending_anchors);
        let text = inline_text(&nodes);
        if !text.trim().is_empty() {
            self.paragraph(&text, block);
        }
    }

    fn layout_element(&mut self, e: &ElementNode, block: Block) {
        if e.tag.is_hidden() {
            return;
        }
        if breaks_before(e) {
            self.break_page();
        }
        if let Some(id) = e.id() {
            self.pending_anchors.push(id.to_string());
        }

        match &e.tag {
            tag if tag.heading_level().is_some() => {
                let level = tag.heading_level().unwrap_or(1);
                self.heading(e, level, block);
            }
            Tag::Ul | Tag::Ol => self.list(e, block),
            Tag::Pre => self.preformatted(e, block),
            Tag::Img => self.image(e, block),
            Tag::Hr => self.rule(block),
            Tag::Table => self.table(e, block),
            _ if e.children.iter().all(is_inline) => {
                collect_ids(&e.children, &mut self.pending_anchors);
                let text = inline_text(&e.children);
                if !text.trim().is_empty() {
                    self.paragraph(&text, block);
                }
            }
            _ => self.layout_nodes(&e.children, block),
        }

        if breaks_after(e) {
            self.break_page();
        }
    }

    /// Place wrapped lines at the block's indent.
    fn paragraph(&mut self, text: &str, block: Block) {
        let width = (self.content_width() - block.indent).max(1.0);
        let lh = block.style.line_height();
        for line in wrap_text(text, block.style.face, block.style.size, width) {
            self.ensure_room(lh);
            let b = text_box(self.left() + block.indent, self.cursor, width, &line, block.style);
            self.place(b);
            self.cursor += lh;
        }
        self.cursor += block.gap;
    }

    fn heading(&mut self, e: &ElementNode, level: u8, block: Block) {
        collect_ids(&e.children, &mut self.pending_anchors);
        let text = inline_text(&e.children);
        if text.trim().is_empty() {
            return;
        }
        let size = HEADING_SIZES[(level.clamp(1, 6) - 1) as usize];
        let style = TextStyle {
            face: BuiltinFace::HelveticaBold,
            size,
        };
        if !self.at_page_top() {
            self.cursor += size * 0.6;
        }
        let width = (self.content_width() - block.indent).max(1.0);
        let lines = wrap_text(&text, style.face, size, width);
        // Keep the heading together with the first line after it.
        let needed = lines.len() as f32 * style.line_height() + size * 0.4 + TextStyle::BODY.line_height();
        self.ensure_room(needed);
        self.paragraph(
            &text,
            Block {
                style,
                gap: size * 0.4,
                ..block
            },
        );
    }

    fn list(&mut self, e: &ElementNode, block: Block) {
        let ordered = e.tag == Tag::Ol;
        let mut number = e
            .attr("start")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(1);
        let item_block = Block {
            indent: block.indent + LIST_INDENT,
            gap: LIST_ITEM_GAP,
            ..block
        };
        for child in &e.children {
            let DomNode::Element(li) = child else { continue };
            if li.tag != Tag::Li {
                self.layout_element(li, item_block);
                continue;
            }
            if let Some(id) = li.id() {
                self.pending_anchors.push(id.to_string());
            }
            let marker = if ordered {
                format!("{number}.")
            } else {
                "-".to_string()
            };
            number += 1;

            self.ensure_room(block.style.line_height());
            let marker_box = text_box(
                self.left() + block.indent,
                self.cursor,
                LIST_INDENT,
                &marker,
                block.style,
            );
            self.place(marker_box);
            self.layout_nodes(&li.children, item_block);
        }
        self.cursor += block.gap;
    }

    fn preformatted(&mut self, e: &ElementNode, block: Block) {
        let style = TextStyle {
            face: BuiltinFace::Courier,
            size: PRE_SIZE,
        };
        let width = (self.content_width() - block.indent).max(1.0);
        let char_width = BuiltinFace::Courier.measure("M", PRE_SIZE);
        let per_line = (((width - 2.0 * PRE_PADDING) / char_width).floor() as usize).max(1);
        let lh = style.line_height();
        let background = self.options.print_background.then_some(PRE_BACKGROUND);

        let raw = e.text_content();
        let raw = raw.strip_prefix('\n').unwrap_or(&raw);
        let raw = raw.trim_end();
        for source_line in raw.split('\n') {
            let chars: Vec<char> = source_line.replace('\t', "    ").chars().collect();
            let chunks: Vec<String> = if chars.is_empty() {
                vec![String::new()]
            } else {
                chars.chunks(per_line).map(|c| c.iter().collect()).collect()
            };
            for chunk in chunks {
                self.ensure_room(lh);
                let mut b = text_box(self.left() + block.indent, self.cursor, width, &chunk, style);
                if let Some(text) = b.text.as_mut() {
                    for line in &mut text.lines {
                        line.x_offset = PRE_PADDING;
                    }
                }
                b.background_color = background;
                self.place(b);
                self.cursor += lh;
            }
        }
        self.cursor += block.gap;
    }

    fn image(&mut self, e: &ElementNode, block: Block) {
        let Some(src) = e.src() else { return };
        let Some(&(px_w, px_h)) = self.images.get(src) else {
            log::warn!("Skipping image without decoded data");
            return;
        };
        if px_w == 0 || px_h == 0 {
            return;
        }
        let max_w = (self.content_width() - block.indent).max(1.0);
        let max_h = (self.bottom() - self.options.margins.top).max(1.0);
        // 1 px = 1 pt at 72 dpi.
        let mut width = (px_w as f32).min(max_w);
        let mut height = width * px_h as f32 / px_w as f32;
        if height > max_h {
            width *= max_h / height;
            height = max_h;
        }
        self.ensure_room(height);
        let mut b = LayoutBox::new(self.left() + block.indent, self.cursor, width, height);
        b.image = Some(ImageContent {
            src: src.to_string(),
            width,
            height,
        });
        self.place(b);
        self.cursor += height + block.gap;
    }

    fn rule(&mut self, block: Block) {
        let height = 8.0;
        self.ensure_room(height);
        let mut b = LayoutBox::new(
            self.left() + block.indent,
            self.cursor,
            self.content_width() - block.indent,
            height,
        );
        b.rule = Some(RuleStyle {
            width: 0.75,
            color: RULE_COLOR,
        });
        self.place(b);
        self.cursor += height + block.gap;
    }

    fn table(&mut self, e: &ElementNode, block: Block) {
        let mut rows: Vec<&ElementNode> = Vec::new();
        collect_rows(&e.children, &mut rows);
        let columns = rows
            .iter()
            .map(|r| cells(r).count())
            .max()
            .unwrap_or(0);
        if columns == 0 {
            return;
        }
        let width = (self.content_width() - block.indent).max(1.0);
        let col_width = width / columns as f32;
        let text_width = (col_width - 2.0 * CELL_PADDING).max(1.0);
        let lh = block.style.line_height();

        for row in rows {
            if let Some(id) = row.id() {
                self.pending_anchors.push(id.to_string());
            }
            let mut cell_lines = Vec::new();
            for cell in cells(row) {
                collect_ids(&cell.children, &mut self.pending_anchors);
                let style = TextStyle {
                    face: if cell.tag == Tag::Th {
                        BuiltinFace::HelveticaBold
                    } else {
                        BuiltinFace::Helvetica
                    },
                    size: block.style.size,
                };
                let text = inline_text(&cell.children);
                cell_lines.push((style, wrap_text(text.trim(), style.face, style.size, text_width)));
            }
            let row_lines = cell_lines.iter().map(|(_, l)| l.len()).max().unwrap_or(1);
            let row_height = row_lines as f32 * lh + 2.0 * CELL_PADDING;
            self.ensure_room(row_height);

            for (col, (style, lines)) in cell_lines.into_iter().enumerate() {
                let x = self.left() + block.indent + col as f32 * col_width;
                let mut b = LayoutBox::new(x, self.cursor, col_width, row_height);
                b.text = Some(TextContent {
                    lines: lines
                        .into_iter()
                        .enumerate()
                        .map(|(i, text)| TextLine {
                            text,
                            x_offset: CELL_PADDING,
                            y_offset: CELL_PADDING + i as f32 * lh,
                        })
                        .collect(),
                    face: style.face,
                    font_size: style.size,
                    color: TEXT_COLOR,
                    line_height: lh,
                });
                self.place(b);
            }
            self.cursor += row_height;
        }
        self.cursor += block.gap;
    }
}

fn text_box(x: f32, y: f32, width: f32, line: &str, style: TextStyle) -> LayoutBox {
    let lh = style.line_height();
    let mut b = LayoutBox::new(x, y, width, lh);
    b.text = Some(TextContent {
        lines: vec![TextLine {
            text: line.to_string(),
            x_offset: 0.0,
            y_offset: 0.0,
        }],
        face: style.face,
        font_size: style.size,
        color: TEXT_COLOR,
        line_height: lh,
    });
    b
}

fn is_inline(node: &DomNode) -> bool {
    match node {
        DomNode::Text(_) => true,
        DomNode::Element(e) => e.tag.is_inline() || e.tag.is_hidden(),
    }
}

fn breaks_before(e: &ElementNode) -> bool {
    e.has_class("chapter")
        || e.has_class("page-break")
        || e.style_property("page-break-before").as_deref() == Some("always")
        || e.style_property("break-before").as_deref() == Some("page")
}

fn breaks_after(e: &ElementNode) -> bool {
    e.has_class("page-break-after")
        || e.style_property("page-break-after").as_deref() == Some("always")
        || e.style_property("break-after").as_deref() == Some("page")
}

/// Text of inline content: whitespace collapsed, `<br>` kept as a newline.
fn inline_text(nodes: &[DomNode]) -> String {
    let mut raw = String::new();
    push_inline(nodes, &mut raw);
    raw.split('\n')
        .map(collapse_whitespace)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

fn push_inline(nodes: &[DomNode], out: &mut String) {
    for node in nodes {
        match node {
            DomNode::Text(t) => out.push_str(&t.replace('\n', " ")),
            DomNode::Element(e) if e.tag == Tag::Br => out.push('\n'),
            DomNode::Element(e) if e.tag.is_hidden() => {}
            DomNode::Element(e) => push_inline(&e.children, out),
        }
    }
}

/// Ids of every element in `nodes`, in document order.
fn collect_ids(nodes: &[DomNode], out: &mut Vec<String>) {
    super::dom::walk_elements(nodes, &mut |e| {
        if let Some(id) = e.id() {
            out.push(id.to_string());
        }
    });
}

fn collect_rows<'a>(nodes: &'a [DomNode], rows: &mut Vec<&'a ElementNode>) {
    for node in nodes {
        if let DomNode::Element(e) = node {
            if e.tag == Tag::Tr {
                rows.push(e);
            } else if e.tag != Tag::Table {
                // thead / tbody / tfoot
                collect_rows(&e.children, rows);
            }
        }
    }
}

fn cells(row: &ElementNode) -> impl Iterator<Item = &ElementNode> {
    row.children.iter().filter_map(|n| match n {
        DomNode::Element(e) if matches!(e.tag, Tag::Td | Tag::Th) => Some(e),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dom::parse_html;

    fn flow(html: &str) -> LayoutConfig {
        let nodes = parse_html(html);
        flow_document(&nodes, "t", &PrintOptions::default(), &ImageSizes::new())
    }

    #[test]
    fn single_page() {
        let layout = flow("<p>Short text</p>");
        assert_eq!(layout.pages.len(), 1);
    }

    #[test]
    fn multiple_pages() {
        let mut html = String::new();
        for i in 0..80 {
            html.push_str(&format!("<p>Paragraph {} with some text</p>", i));
        }
        let layout = flow(&html);
        assert!(layout.pages.len() > 1, "Expected multiple pages, got {}", layout.pages.len());
    }

    #[test]
    fn chapters_start_new_pages() {
        let html = r#"
            <div class="cover"><h1>Manual</h1></div>
            <div class="chapter" id="c1"><h1 id="intro">1. Intro</h1><p>a</p></div>
            <div class="chapter"><h1 id="next">2. Next</h1><p>b</p></div>"#;
        let layout = flow(html);
        assert_eq!(layout.pages.len(), 3);
        assert_eq!(layout.anchor_page("c1"), Some(1));
        assert_eq!(layout.anchor_page("intro"), Some(1));
        assert_eq!(layout.anchor_page("next"), Some(2));
    }

    #[test]
    fn leading_break_does_not_leave_blank_page() {
        let layout = flow(r#"<div class="page-break"></div><p id="x">first</p><div style="page-break-after: always"></div>"#);
        assert_eq!(layout.pages.len(), 1);
        assert_eq!(layout.anchor_page("x"), Some(0));
    }

    #[test]
    fn inline_ids_anchor_their_paragraph() {
        let layout = flow(r##"<p>Go to <a id="deep" href="#x">there</a></p>"##);
        assert_eq!(layout.anchor_page("deep"), Some(0));
    }

    #[test]
    fn heading_moves_with_following_line() {
        // Fill the page nearly to the bottom, then add a heading.
        let mut html = String::new();
        for i in 0..200 {
            html.push_str(&format!("<p>Line {i}</p>"));
            let layout = flow(&format!("{html}<h2 id=\"h\">Heading</h2><p>after</p>"));
            if layout.pages.len() > 1 {
                let page = layout.anchor_page("h").unwrap();
                let first_after = layout.pages[page].boxes.iter().any(|b| {
                    b.text.as_ref().is_some_and(|t| t.lines.iter().any(|l| l.text == "after"))
                });
                assert!(first_after);
                return;
            }
        }
        panic!("content never overflowed");
    }

    #[test]
    fn lists_get_markers() {
        let layout = flow("<ol><li>one</li><li>two</li></ol><ul><li>dot</li></ul>");
        let texts: Vec<&str> = layout.pages[0]
            .boxes
            .iter()
            .filter_map(|b| b.text.as_ref())
            .flat_map(|t| t.lines.iter().map(|l| l.text.as_str()))
            .collect();
        assert_eq!(texts, vec!["1.", "one", "2.", "two", "-", "dot"]);
    }

    #[test]
    fn pre_keeps_lines_and_band() {
        let layout = flow("<pre>\nfn main() {\n    run();\n}\n</pre>");
        let boxes = &layout.pages[0].boxes;
        assert_eq!(boxes.len(), 3);
        assert!(boxes.iter().all(|b| b.background_color.is_some()));
        assert_eq!(boxes[1].text.as_ref().unwrap().lines[0].text, "    run();");
    }

    #[test]
    fn images_scale_to_content_width() {
        let nodes = parse_html(r#"<img src="data:wide">"#);
        let mut images = ImageSizes::new();
        images.insert("data:wide".to_string(), (2000, 1000));
        let options = PrintOptions::default();
        let layout = flow_document(&nodes, "t", &options, &images);
        let img = layout.pages[0].boxes[0].image.as_ref().unwrap();
        assert!((img.width - options.content_width()).abs() < 0.01);
        assert!((img.height - options.content_width() / 2.0).abs() < 0.01);
    }
}
