//! Layout IR – the intermediate representation between flow layout and PDF
//! painting. This is the "frozen" structure that encodes exactly what goes on
//! each page and where every element id landed.

use serde::{Deserialize, Serialize};

use crate::fonts::BuiltinFace;

/// A complete document layout ready for painting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Document title embedded in the PDF metadata.
    pub title: String,
    /// Width of each page in PDF points (1 pt = 1/72 inch).
    pub page_width_pt: f32,
    /// Height of each page in PDF points.
    pub page_height_pt: f32,
    /// Ordered list of pages.
    pub pages: Vec<PageLayout>,
    /// Where each element id landed, in document order.
    pub anchors: Vec<AnchorMark>,
}

/// One page of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLayout {
    pub page_index: usize,
    pub boxes: Vec<LayoutBox>,
}

/// A positioned rectangle with optional content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutBox {
    /// Position relative to page top-left, in points.
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,

    pub background_color: Option<[f32; 3]>,
    /// Horizontal rule drawn through the vertical middle of the box.
    pub rule: Option<RuleStyle>,

    /// Content (mutually exclusive in practice)
    pub text: Option<TextContent>,
    pub image: Option<ImageContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStyle {
    pub width: f32,
    pub color: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    /// Pre-wrapped lines of text.
    pub lines: Vec<TextLine>,
    pub face: BuiltinFace,
    pub font_size: f32,
    pub color: [f32; 3],
    pub line_height: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    /// X offset within the layout box
    pub x_offset: f32,
    /// Y offset from the top of the text content area
    pub y_offset: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageContent {
    pub src: String,
    pub width: f32,
    pub height: f32,
}

/// Position of an element id: top-left page coordinates of the first content
/// laid out for the element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorMark {
    pub id: String,
    pub page_index: usize,
    pub x: f32,
    pub y: f32,
}

impl LayoutConfig {
    pub fn new(title: &str, page_width_pt: f32, page_height_pt: f32) -> Self {
        Self {
            title: title.to_string(),
            page_width_pt,
            page_height_pt,
            pages: Vec::new(),
            anchors: Vec::new(),
        }
    }

    /// Serialise to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Page index of the first mark for `id`.
    pub fn anchor_page(&self, id: &str) -> Option<usize> {
        self.anchors.iter().find(|a| a.id == id).map(|a| a.page_index)
    }
}

impl LayoutBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            background_color: None,
            rule: None,
            text: None,
            image: None,
        }
    }
}
