//! Configuration for a manual build.
//!
//! Every struct deserialises with `#[serde(default)]`, so a JSON config file
//! only needs the keys it wants to change.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::destinations::DestinationNaming;
use crate::error::{Error, Result};

/// Page orientation for the rendered manual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageOrientation {
    /// Portrait mode: height > width (default).
    #[default]
    Portrait,
    /// Landscape mode: width > height.
    Landscape,
}

/// Page margins in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Margins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 56.0,
            right: 50.0,
            bottom: 56.0,
            left: 50.0,
        }
    }
}

/// Print options handed to the renderer on every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    /// Page width in points (default: A4 = 595.28).
    pub page_width: f32,
    /// Page height in points (default: A4 = 841.89).
    pub page_height: f32,
    /// Swaps effective width/height when `Landscape`.
    pub orientation: PageOrientation,
    pub margins: Margins,
    /// Paint background bands (code blocks) when true.
    pub print_background: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            page_width: 595.28,
            page_height: 841.89,
            orientation: PageOrientation::Portrait,
            margins: Margins::default(),
            print_background: true,
        }
    }
}

impl PrintOptions {
    /// Effective page width after applying orientation.
    pub fn effective_width(&self) -> f32 {
        match self.orientation {
            PageOrientation::Portrait => self.page_width,
            PageOrientation::Landscape => self.page_height,
        }
    }

    /// Effective page height after applying orientation.
    pub fn effective_height(&self) -> f32 {
        match self.orientation {
            PageOrientation::Portrait => self.page_height,
            PageOrientation::Landscape => self.page_width,
        }
    }

    /// Width of the area between the left and right margins.
    pub fn content_width(&self) -> f32 {
        (self.effective_width() - self.margins.left - self.margins.right).max(0.0)
    }

    /// Height of the area between the top and bottom margins.
    pub fn content_height(&self) -> f32 {
        (self.effective_height() - self.margins.top - self.margins.bottom).max(0.0)
    }
}

/// Geometry and colors of the stamped header/footer.
///
/// Offsets are measured from the top edge (header) or bottom edge (footer) of
/// the page; horizontal extents come from the page margins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunningHeadStyle {
    pub font_size: f32,
    /// Distance from the top edge to the title baseline.
    pub header_baseline: f32,
    /// Distance from the top edge to the rule under the title.
    pub header_rule: f32,
    /// Distance from the bottom edge to the footer rule.
    pub footer_rule: f32,
    /// Distance from the bottom edge to the page number / label baseline.
    pub footer_baseline: f32,
    /// Space kept between the section label and the page number.
    pub gutter: f32,
    pub rule_width: f32,
    pub text_color: [f32; 3],
    pub rule_color: [f32; 3],
}

impl Default for RunningHeadStyle {
    fn default() -> Self {
        Self {
            font_size: 8.5,
            header_baseline: 30.0,
            header_rule: 36.0,
            footer_rule: 38.0,
            footer_baseline: 26.0,
            gutter: 16.0,
            rule_width: 0.5,
            text_color: [0.35, 0.35, 0.35],
            rule_color: [0.7, 0.7, 0.7],
        }
    }
}

/// Well-known locations of fonts covering CJK (Hangul in particular).
///
/// Collections (`.ttc`) are listed because they are common; the resolver
/// skips them since they cannot be subset as a single face.
pub const DEFAULT_FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/nanum/NanumGothic.ttf",
    "/usr/share/fonts/truetype/noto/NotoSansKR-Regular.ttf",
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/System/Library/Fonts/AppleSDGothicNeo.ttc",
    "/Library/Fonts/Arial Unicode.ttf",
    "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
    "C:\\Windows\\Fonts\\malgun.ttf",
];

/// Configuration for one manual build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualConfig {
    /// Document title, used in metadata and in every running header.
    pub title: String,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub print: PrintOptions,
    pub running_heads: RunningHeadStyle,
    /// Fallback font candidates, highest priority first.
    pub fallback_fonts: Vec<PathBuf>,
    /// Bound on the best-effort wait for images before the first render.
    pub image_wait_ms: u64,
    /// Hard timeout for a single render call.
    pub render_timeout_ms: u64,
    /// Write a document outline from the resolved sections.
    pub outline: bool,
    /// Overrides the renderer's own destination naming scheme.
    pub destination_naming: Option<DestinationNaming>,
}

impl Default for ManualConfig {
    fn default() -> Self {
        Self {
            title: "Manual".to_string(),
            author: None,
            subject: None,
            keywords: Vec::new(),
            print: PrintOptions::default(),
            running_heads: RunningHeadStyle::default(),
            fallback_fonts: DEFAULT_FALLBACK_FONTS.iter().map(PathBuf::from).collect(),
            image_wait_ms: 5_000,
            render_timeout_ms: 60_000,
            outline: true,
            destination_naming: None,
        }
    }
}

impl ManualConfig {
    /// Read a JSON config file, taking `default_title` when the file sets no
    /// `title` of its own.
    pub fn from_json_file_titled(path: &Path, default_title: &str) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_titled(&json, default_title)
    }

    /// Parse a JSON config document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_json_titled(json, &Self::default().title)
    }

    /// Like [`from_json`](Self::from_json), with `default_title` standing in
    /// for an absent `title`.
    pub fn from_json_titled(json: &str, default_title: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json).map_err(invalid_json)?;
        let has_title = value.get("title").is_some();
        let mut config: Self = serde_json::from_value(value).map_err(invalid_json)?;
        if !has_title {
            config.title = default_title.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject geometry that leaves no room for content.
    pub fn validate(&self) -> Result<()> {
        let p = &self.print;
        if p.page_width <= 0.0 || p.page_height <= 0.0 {
            return Err(Error::Config(format!(
                "page size must be positive, got {}x{}",
                p.page_width, p.page_height
            )));
        }
        if p.content_width() <= 0.0 || p.content_height() <= 0.0 {
            return Err(Error::Config("margins leave no content area".to_string()));
        }
        if self.running_heads.font_size <= 0.0 {
            return Err(Error::Config("running head font size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn image_wait(&self) -> Duration {
        Duration::from_millis(self.image_wait_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

fn invalid_json(e: serde_json::Error) -> Error {
    Error::Config(format!("invalid config JSON: {e}"))
}
