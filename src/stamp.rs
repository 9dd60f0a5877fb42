//! Header/footer compositor – stamps the running title, rules, page number
//! and current section label onto every page after the cover.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object};

use crate::config::{Margins, RunningHeadStyle};
use crate::error::Result;
use crate::fallback::EmbeddedFont;
use crate::fonts::{FontHandle, LatinFont, ELLIPSIS};
use crate::pdfdoc::{add_page_fonts, append_isolated_content, page_media_box};
use crate::timeline::SectionTimeline;

/// The fonts available while finalizing: Helvetica always, plus an embedded
/// fallback when one was found.
pub struct StampFonts {
    pub latin: LatinFont,
    pub fallback: Option<EmbeddedFont>,
}

impl StampFonts {
    pub fn new(latin: LatinFont, fallback: Option<EmbeddedFont>) -> Self {
        Self { latin, fallback }
    }

    /// The font used for every stamped string: the fallback when embedded.
    pub fn active(&mut self) -> &mut dyn FontHandle {
        match self.fallback.as_mut() {
            Some(font) => font,
            None => &mut self.latin,
        }
    }

    /// Write any deferred font objects (the fallback subset) into `doc`.
    pub fn finish(self, doc: &mut Document) {
        if let Some(font) = self.fallback {
            font.finish(doc);
        }
    }
}

/// Fit `label` into `max_width`.
///
/// A label that fits is returned unchanged. Otherwise characters are dropped
/// from the end, re-measuring `label + "…"` each time, until it fits; the
/// result ends with exactly one ellipsis. `None` when not even the bare
/// ellipsis fits.
pub fn truncate_to_width(label: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Option<String> {
    if label.is_empty() {
        return None;
    }
    if measure(label) <= max_width {
        return Some(label.to_string());
    }
    let mut chars: Vec<char> = label.chars().collect();
    loop {
        let candidate: String = chars.iter().collect::<String>() + ELLIPSIS;
        if measure(&candidate) <= max_width {
            return Some(candidate);
        }
        if chars.pop().is_none() {
            return None;
        }
    }
}

/// Stamp running heads on every page except the first. Returns the number of
/// pages stamped.
pub fn stamp_running_heads(
    doc: &mut Document,
    timeline: &SectionTimeline,
    title: &str,
    style: &RunningHeadStyle,
    margins: &Margins,
    fonts: &mut StampFonts,
) -> Result<usize> {
    let pages = doc.get_pages();
    let mut stamped = 0;
    for (page_no, page_id) in pages {
        if page_no == 1 {
            continue;
        }
        let [x0, y0, x1, y1] = page_media_box(doc, page_id);
        let geometry = PageGeometry {
            left: x0 + margins.left,
            right: x1 - margins.right,
            top: y1,
            bottom: y0,
        };

        let font = fonts.active();
        let label = if page_no >= timeline.first_content_page() {
            timeline.label_for(page_no)
        } else {
            None
        };
        let ops = running_head_ops(font, &geometry, style, title, page_no, label);
        let bytes = Content { operations: ops }.encode()?;

        let resource_name = font.resource_name().to_string();
        add_page_fonts(doc, page_id, &[(resource_name.as_str(), font.object_id())])?;
        append_isolated_content(doc, page_id, bytes)?;
        log::debug!("Stamped page {page_no} (label: {label:?})");
        stamped += 1;
    }
    log::info!("Stamped running heads on {stamped} pages");
    Ok(stamped)
}

/// Horizontal content extent and vertical page edges, in PDF user space.
struct PageGeometry {
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
}

impl PageGeometry {
    fn content_width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }
}

fn running_head_ops(
    font: &mut dyn FontHandle,
    page: &PageGeometry,
    style: &RunningHeadStyle,
    title: &str,
    page_no: u32,
    label: Option<&str>,
) -> Vec<Operation> {
    let size = style.font_size;
    let header_rule_y = page.top - style.header_rule;
    let footer_rule_y = page.bottom + style.footer_rule;

    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new("w", vec![Object::Real(style.rule_width)]),
        Operation::new("RG", rgb(style.rule_color)),
    ];
    for y in [header_rule_y, footer_rule_y] {
        ops.push(Operation::new("m", vec![Object::Real(page.left), Object::Real(y)]));
        ops.push(Operation::new("l", vec![Object::Real(page.right), Object::Real(y)]));
        ops.push(Operation::new("S", vec![]));
    }
    ops.push(Operation::new("Q", vec![]));

    if let Some(title) = truncate_to_width(title, page.content_width(), |s| font.measure(s, size)) {
        let y = page.top - style.header_baseline;
        push_text(&mut ops, font, style, &title, page.left, y);
    }

    let number = page_no.to_string();
    let number_width = font.measure(&number, size);
    let footer_y = page.bottom + style.footer_baseline;
    push_text(&mut ops, font, style, &number, page.right - number_width, footer_y);

    if let Some(label) = label {
        let max_width = page.content_width() - number_width - style.gutter;
        if let Some(label) = truncate_to_width(label, max_width, |s| font.measure(s, size)) {
            push_text(&mut ops, font, style, &label, page.left, footer_y);
        }
    }
    ops
}

fn push_text(
    ops: &mut Vec<Operation>,
    font: &mut dyn FontHandle,
    style: &RunningHeadStyle,
    text: &str,
    x: f32,
    y: f32,
) {
    let operand = font.encode(text);
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![
            Object::Name(font.resource_name().as_bytes().to_vec()),
            Object::Real(style.font_size),
        ],
    ));
    ops.push(Operation::new("rg", rgb(style.text_color)));
    ops.push(Operation::new("Td", vec![Object::Real(x), Object::Real(y)]));
    ops.push(Operation::new("Tj", vec![operand]));
    ops.push(Operation::new("ET", vec![]));
}

fn rgb(color: [f32; 3]) -> Vec<Object> {
    color.iter().map(|c| Object::Real(*c)).collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::anchors::SectionInfo;
    use crate::destinations::tests::fixture_with_dests;
    use crate::fallback::tests::FIXTURE_FONT;
    use crate::fallback::FALLBACK_RESOURCE;
    use crate::fonts::{BuiltinFace, LATIN_RESOURCE};
    use crate::pdfdoc::save_to_vec;

    /// `(font resource, string bytes)` of every text run on a page.
    fn text_runs(doc: &Document, page_id: lopdf::ObjectId) -> Vec<(Vec<u8>, Vec<u8>)> {
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let mut runs = Vec::new();
        let mut font = Vec::new();
        for op in content.operations {
            match op.operator.as_str() {
                "Tf" => font = op.operands[0].as_name().unwrap().to_vec(),
                "Tj" => runs.push((font.clone(), op.operands[0].as_str().unwrap().to_vec())),
                _ => {}
            }
        }
        runs
    }

    /// Every character is 10 units wide, the ellipsis too.
    fn ten_per_char(s: &str) -> f32 {
        s.chars().count() as f32 * 10.0
    }

    #[test]
    fn fitting_label_is_untouched() {
        assert_eq!(truncate_to_width("Setup", 50.0, ten_per_char).as_deref(), Some("Setup"));
    }

    #[test]
    fn overlong_label_is_shortened_with_one_ellipsis() {
        // 22 chars = 220 units against a 180 budget: 17 chars + ellipsis.
        let label = "Chapter 2 \u{2014} Networking";
        assert_eq!(ten_per_char(label), 220.0);
        let out = truncate_to_width(label, 180.0, ten_per_char).unwrap();
        assert_eq!(ten_per_char(&out), 180.0);
        assert!(out.ends_with(ELLIPSIS));
        assert_eq!(out.matches(ELLIPSIS).count(), 1);
        assert_eq!(out, "Chapter 2 \u{2014} Netwo\u{2026}");
    }

    #[test]
    fn nothing_fits() {
        assert_eq!(truncate_to_width("Setup", 5.0, ten_per_char), None);
        assert_eq!(truncate_to_width("Setup", 10.0, ten_per_char).as_deref(), Some(ELLIPSIS));
        assert_eq!(truncate_to_width("", 100.0, ten_per_char), None);
    }

    proptest! {
        #[test]
        fn truncated_text_never_exceeds_budget(label in "[a-zA-Z0-9 ]{0,40}", max in 0.0f32..200.0) {
            let measure = |s: &str| BuiltinFace::Helvetica.measure(s, 8.5);
            if let Some(out) = truncate_to_width(&label, max, measure) {
                prop_assert!(measure(&out) <= max);
                if out != label {
                    prop_assert!(out.ends_with(ELLIPSIS));
                    prop_assert_eq!(out.matches(ELLIPSIS).count(), 1);
                    let stem = out.trim_end_matches(ELLIPSIS);
                    prop_assert!(label.starts_with(stem));
                }
            }
        }
    }

    #[test]
    fn stamps_every_page_after_the_cover() {
        let bytes = fixture_with_dests(4, &[]);
        let mut doc = Document::load_mem(&bytes).unwrap();
        let sections = vec![SectionInfo {
            anchor_id: "setup".to_string(),
            label: "1.1 Setup".to_string(),
            level: 2,
            start_page: Some(3),
        }];
        let timeline = SectionTimeline::build(&sections, 4);
        let mut fonts = StampFonts::new(LatinFont::register(&mut doc), None);

        let stamped = stamp_running_heads(
            &mut doc,
            &timeline,
            "Operator Manual",
            &RunningHeadStyle::default(),
            &Margins::default(),
            &mut fonts,
        )
        .unwrap();
        fonts.finish(&mut doc);
        assert_eq!(stamped, 3);

        let pages = doc.get_pages();
        let cover = doc.get_page_content(pages[&1]).unwrap();
        assert!(cover.is_empty());

        let page2 = String::from_utf8_lossy(&doc.get_page_content(pages[&2]).unwrap()).into_owned();
        assert!(page2.contains("(Operator Manual) Tj"));
        assert!(page2.contains("(2) Tj"));
        assert!(!page2.contains("Setup"));

        let page3 = String::from_utf8_lossy(&doc.get_page_content(pages[&3]).unwrap()).into_owned();
        assert!(page3.contains("(1.1 Setup) Tj"));
        assert!(page3.starts_with("q\n"));

        let resources = doc
            .get_object(pages[&3])
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap();
        assert!(resources.get(b"Font").unwrap().as_dict().unwrap().has(b"MfLatin"));
    }

    #[test]
    fn embedded_fallback_draws_all_stamped_text() {
        let mut doc = Document::load_mem(&fixture_with_dests(3, &[])).unwrap();
        let label = format!("Chapter 7 \u{2014} {}", "Networking and routing ".repeat(10));
        let sections = vec![SectionInfo {
            anchor_id: "net".to_string(),
            label: label.clone(),
            level: 1,
            start_page: Some(2),
        }];
        let timeline = SectionTimeline::build(&sections, 3);
        let fallback = EmbeddedFont::embed(&mut doc, FIXTURE_FONT.to_vec()).unwrap();
        let mut fonts = StampFonts::new(LatinFont::register(&mut doc), Some(fallback));
        let style = RunningHeadStyle::default();
        let margins = Margins::default();

        let stamped =
            stamp_running_heads(&mut doc, &timeline, "Operator Manual", &style, &margins, &mut fonts).unwrap();
        assert_eq!(stamped, 2);

        // The fixture pages are 595pt wide.
        let font = fonts.fallback.as_mut().unwrap();
        let size = style.font_size;
        let content_width = 595.0 - margins.left - margins.right;
        let max_width = content_width - font.measure("3", size) - style.gutter;
        assert!(font.measure(&label, size) > max_width);
        let expected = truncate_to_width(&label, max_width, |s| font.measure(s, size)).unwrap();
        assert!(font.measure(&expected, size) <= max_width);
        assert!(expected.ends_with(ELLIPSIS));
        let expected_bytes = match font.encode(&expected) {
            Object::String(bytes, _) => bytes,
            other => panic!("unexpected operand {other:?}"),
        };

        let pages = doc.get_pages();
        let runs = text_runs(&doc, pages[&3]);
        assert_eq!(runs.len(), 3);
        for (resource, _) in &runs {
            assert_eq!(resource, FALLBACK_RESOURCE.as_bytes());
        }
        assert_eq!(runs[2].1, expected_bytes);
        for page_no in [2, 3] {
            let page = String::from_utf8_lossy(&doc.get_page_content(pages[&page_no]).unwrap()).into_owned();
            assert!(!page.contains(LATIN_RESOURCE));
        }

        fonts.finish(&mut doc);
        let reloaded = Document::load_mem(&save_to_vec(&mut doc).unwrap()).unwrap();
        let page3 = reloaded.get_object(reloaded.get_pages()[&3]).unwrap().as_dict().unwrap();
        let fonts_dict = page3.get(b"Resources").unwrap().as_dict().unwrap().get(b"Font").unwrap();
        let type0_ref = fonts_dict.as_dict().unwrap().get(FALLBACK_RESOURCE.as_bytes()).unwrap();
        let type0 = reloaded.get_object(type0_ref.as_reference().unwrap()).unwrap().as_dict().unwrap();
        assert_eq!(type0.get(b"Subtype").unwrap().as_name().unwrap(), b"Type0");
    }
}
