//! PDF painter – takes a [`LayoutConfig`] and produces PDF bytes using
//! `printpdf` (v0.8 ops-based API), then records a named destination for
//! every anchor with `lopdf`.

use std::collections::HashMap;
use std::sync::Arc;

use lopdf::{Dictionary, Document, Object};
use printpdf::{
    BuiltinFont, Color, Line, LinePoint, Mm, Op, PaintMode, PdfDocument, PdfPage, PdfSaveOptions,
    PdfWarnMsg, Point, Polygon, PolygonRing, Pt, RawImage, Rgb, TextItem, WindingOrder, XObjectId,
    XObjectTransform,
};

use crate::error::Result;
use crate::fonts::BuiltinFace;
use crate::pdfdoc::save_to_vec;

use super::layout::{LayoutBox, LayoutConfig};
use super::DecodedImage;

const PT_TO_MM: f32 = 0.352778;

/// A printpdf XObject together with the pixel dimensions of the source image.
struct ImageResource {
    xobj_id: XObjectId,
    px_width: u32,
    px_height: u32,
}

/// Paint a LayoutConfig into PDF bytes.
///
/// Images missing from `images` (not a data URI, or undecodable) are skipped.
pub fn paint_pdf(config: &LayoutConfig, images: &HashMap<String, Arc<DecodedImage>>) -> Vec<u8> {
    let page_w = Mm(config.page_width_pt * PT_TO_MM);
    let page_h = Mm(config.page_height_pt * PT_TO_MM);

    let mut doc = PdfDocument::new(&config.title);

    // ── Register the images this layout uses ───────────────────────────────
    let mut image_resources: HashMap<&str, ImageResource> = HashMap::new();
    let mut img_warnings: Vec<PdfWarnMsg> = Vec::new();
    for lbox in config.pages.iter().flat_map(|p| &p.boxes) {
        let Some(img) = &lbox.image else { continue };
        if image_resources.contains_key(img.src.as_str()) {
            continue;
        }
        let Some(decoded) = images.get(&img.src) else { continue };
        let raw = match RawImage::decode_from_bytes(&decoded.bytes, &mut img_warnings) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Skipping image — PDF encode error: {e}");
                continue;
            }
        };
        let xobj_id = doc.add_image(&raw);
        image_resources.insert(
            img.src.as_str(),
            ImageResource {
                xobj_id,
                px_width: decoded.px_width,
                px_height: decoded.px_height,
            },
        );
    }

    // ── Paint pages ───────────────────────────────────────────────────────
    let mut pages = Vec::with_capacity(config.pages.len());
    for page_layout in &config.pages {
        let mut ops = Vec::new();
        for lbox in &page_layout.boxes {
            paint_box(&mut ops, lbox, config.page_height_pt, &image_resources);
        }
        pages.push(PdfPage::new(page_w, page_h, ops));
    }
    if pages.is_empty() {
        pages.push(PdfPage::new(page_w, page_h, Vec::new()));
    }

    doc.with_pages(pages);
    doc.save(&PdfSaveOptions::default(), &mut Vec::new())
}

/// Add a `/Dests` dictionary with one `[page /XYZ left top null]`
/// destination per anchor. Keys are the ids verbatim; the first mark of a
/// repeated id wins.
pub fn add_named_destinations(pdf: &[u8], config: &LayoutConfig) -> Result<Vec<u8>> {
    let mut doc = Document::load_mem(pdf)?;
    let pages = doc.get_pages();

    let mut dests = Dictionary::new();
    for mark in &config.anchors {
        if dests.has(mark.id.as_bytes()) {
            continue;
        }
        let Some(page_id) = pages.get(&(mark.page_index as u32 + 1)) else {
            log::debug!("Anchor '{}' is on a page that was not painted", mark.id);
            continue;
        };
        dests.set(
            mark.id.as_bytes().to_vec(),
            Object::Array(vec![
                Object::Reference(*page_id),
                Object::Name(b"XYZ".to_vec()),
                Object::Real(mark.x),
                Object::Real(config.page_height_pt - mark.y),
                Object::Null,
            ]),
        );
    }
    let count = dests.len();
    let dests_id = doc.add_object(dests);
    doc.catalog_mut()?.set("Dests", Object::Reference(dests_id));
    log::debug!("Wrote {count} named destinations");

    save_to_vec(&mut doc)
}

/// Builtin-font text must stay within printable ASCII; typographic marks are
/// spelled out, anything else becomes `?`.
fn to_pdf_ascii(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ' '..='~' => out.push(c),
            '\t' | '\u{00A0}' => out.push(' '),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2026}' => out.push_str("..."),
            '\u{2022}' => out.push('*'),
            '\u{2192}' => out.push_str("->"),
            _ => out.push('?'),
        }
    }
    out
}

fn builtin_font(face: BuiltinFace) -> BuiltinFont {
    match face {
        BuiltinFace::Helvetica => BuiltinFont::Helvetica,
        BuiltinFace::HelveticaBold => BuiltinFont::HelveticaBold,
        BuiltinFace::Courier => BuiltinFont::Courier,
    }
}

fn rgb(c: [f32; 3]) -> Color {
    Color::Rgb(Rgb {
        r: c[0],
        g: c[1],
        b: c[2],
        icc_profile: None,
    })
}

fn point(x: f32, y: f32) -> LinePoint {
    LinePoint {
        p: Point { x: Pt(x), y: Pt(y) },
        bezier: false,
    }
}

/// Paint one LayoutBox into PDF ops.
fn paint_box(ops: &mut Vec<Op>, lbox: &LayoutBox, page_height: f32, images: &HashMap<&str, ImageResource>) {
    // PDF coordinate system: origin at bottom-left.
    // Our layout uses origin at top-left. Convert:
    let pdf_y = page_height - lbox.y;

    if let Some(bg) = lbox.background_color {
        let (x1, y1, x2, y2) = (lbox.x, pdf_y - lbox.height, lbox.x + lbox.width, pdf_y);
        ops.push(Op::SetFillColor { col: rgb(bg) });
        ops.push(Op::DrawPolygon {
            polygon: Polygon {
                rings: vec![PolygonRing {
                    points: vec![point(x1, y1), point(x2, y1), point(x2, y2), point(x1, y2)],
                }],
                mode: PaintMode::Fill,
                winding_order: WindingOrder::NonZero,
            },
        });
    }

    if let Some(rule) = &lbox.rule {
        let y = pdf_y - lbox.height / 2.0;
        ops.push(Op::SetOutlineColor { col: rgb(rule.color) });
        ops.push(Op::SetOutlineThickness { pt: Pt(rule.width) });
        ops.push(Op::DrawLine {
            line: Line {
                points: vec![point(lbox.x, y), point(lbox.x + lbox.width, y)],
                is_closed: false,
            },
        });
    }

    if let Some(text) = &lbox.text {
        let font = builtin_font(text.face);
        for tline in &text.lines {
            if tline.text.is_empty() {
                continue;
            }
            // Baseline ≈ top of line + ascender (approx 0.75 × font_size)
            let text_x = lbox.x + tline.x_offset;
            let text_y = pdf_y - tline.y_offset - text.font_size * 0.75;

            ops.push(Op::StartTextSection);
            ops.push(Op::SetTextCursor {
                pos: Point {
                    x: Pt(text_x),
                    y: Pt(text_y),
                },
            });
            ops.push(Op::SetFontSizeBuiltinFont {
                size: Pt(text.font_size),
                font,
            });
            ops.push(Op::SetLineHeight {
                lh: Pt(text.line_height),
            });
            ops.push(Op::SetFillColor { col: rgb(text.color) });
            ops.push(Op::WriteTextBuiltinFont {
                items: vec![TextItem::Text(to_pdf_ascii(&tline.text))],
                font,
            });
            ops.push(Op::EndTextSection);
        }
    }

    if let Some(img) = &lbox.image {
        if let Some(res) = images.get(img.src.as_str()) {
            // translate_y = bottom edge of image in PDF coordinates.
            let img_bottom_y = page_height - lbox.y - img.height;
            // At dpi=72 printpdf renders 1 px = 1 pt, so scale = desired_pt / px.
            let scale_x = img.width / res.px_width.max(1) as f32;
            let scale_y = img.height / res.px_height.max(1) as f32;
            ops.push(Op::UseXobject {
                id: res.xobj_id.clone(),
                transform: XObjectTransform {
                    translate_x: Some(Pt(lbox.x)),
                    translate_y: Some(Pt(img_bottom_y)),
                    dpi: Some(72.0),
                    scale_x: Some(scale_x),
                    scale_y: Some(scale_y),
                    rotate: None,
                },
            });
        }
    }
}
