//! Built-in, in-process rendering engine.
//!
//! [`ForgeRenderer`] implements [`DocumentRenderer`] for the controlled HTML
//! subset manuals are composed from:
//!
//! 1. **Parse** – HTML file → DOM tree ([`dom`])
//! 2. **Flow** – lay text, lists, code blocks, tables and images onto pages
//!    ([`flow`]), producing the frozen IR in [`layout`]
//! 3. **Paint** – emit PDF bytes via printpdf and add one named destination
//!    per element id ([`paint`])
//!
//! Conventions understood by the queries and mutations:
//! - TOC page-number placeholders carry class `toc-page` and name their
//!   target with `data-target="id"` or `href="#id"`.
//! - Chapter containers carry class `chapter` with optional
//!   `data-chapter-num` / `data-chapter-title`; they start a new page.

pub mod dom;
pub mod flow;
pub mod layout;
pub mod paint;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use serde_json::Value;

use crate::config::PrintOptions;
use crate::destinations::DestinationNaming;
use crate::error::{Error, Result};
use crate::renderer::{
    ChapterRow, DocumentRenderer, DomMutation, DomQuery, HeadingRow, ImagesSettled, TocTargetRow,
};

use self::dom::{
    body_children, collapse_whitespace, document_title, first_descendant_id, parse_html,
    walk_elements, walk_elements_mut, DomNode, ElementNode, Tag,
};
use self::flow::{flow_document, ImageSizes};
use self::paint::{add_named_destinations, paint_pdf};

/// Class of TOC page-number placeholders.
pub const TOC_PAGE_CLASS: &str = "toc-page";
/// Class of chapter containers.
pub const CHAPTER_CLASS: &str = "chapter";

/// Raw bytes of a data-URI image and its pixel dimensions.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub px_width: u32,
    pub px_height: u32,
}

/// The in-process [`DocumentRenderer`].
pub struct ForgeRenderer {
    dom: Option<Vec<DomNode>>,
    images: HashMap<String, Arc<DecodedImage>>,
    /// Sources that failed to decode; not retried.
    failed_images: HashSet<String>,
    render_timeout: Duration,
}

impl ForgeRenderer {
    pub fn new(render_timeout: Duration) -> Self {
        Self {
            dom: None,
            images: HashMap::new(),
            failed_images: HashSet::new(),
            render_timeout,
        }
    }

    /// Load HTML from a string instead of a file.
    pub fn open_html(&mut self, html: &str) {
        self.dom = Some(parse_html(html));
        self.images.clear();
        self.failed_images.clear();
    }

    fn nodes(&self) -> Result<&[DomNode]> {
        self.dom
            .as_deref()
            .ok_or_else(|| Error::Render("no document is open".to_string()))
    }

    fn image_sources(&self) -> Vec<String> {
        let mut srcs = Vec::new();
        if let Some(nodes) = &self.dom {
            walk_elements(nodes, &mut |e| {
                if e.tag == Tag::Img {
                    if let Some(src) = e.src() {
                        srcs.push(src.to_string());
                    }
                }
            });
        }
        srcs
    }

    /// Image sources neither decoded nor known to be undecodable.
    fn pending_images(&self) -> Vec<String> {
        let mut pending = self.image_sources();
        pending.retain(|src| !self.images.contains_key(src) && !self.failed_images.contains(src));
        pending.sort_unstable();
        pending.dedup();
        pending
    }

    /// Decode pending images until `deadline`. Returns false when the
    /// deadline cut the work short.
    fn decode_images(&mut self, deadline: Option<Instant>) -> bool {
        for src in self.pending_images() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            match decode_data_uri_image(&src) {
                Ok(decoded) => {
                    self.images.insert(src, Arc::new(decoded));
                }
                Err(e) => {
                    log::warn!("Skipping image — {e}");
                    self.failed_images.insert(src);
                }
            }
        }
        true
    }

    fn remember_images(&mut self, outcome: DecodeOutcome) {
        self.images.extend(outcome.decoded);
        self.failed_images.extend(outcome.failed);
    }

    fn toc_rows(nodes: &[DomNode]) -> Vec<TocTargetRow> {
        let mut rows = Vec::new();
        walk_elements(nodes, &mut |e| {
            if let Some(target) = toc_target(e) {
                rows.push(TocTargetRow {
                    anchor_id: target.to_string(),
                });
            }
        });
        rows
    }

    fn chapter_rows(nodes: &[DomNode]) -> Vec<ChapterRow> {
        let mut rows = Vec::new();
        walk_elements(nodes, &mut |e| {
            if e.has_class(CHAPTER_CLASS) {
                rows.push(ChapterRow {
                    num: e.attr("data-chapter-num").map(str::to_string),
                    title: e.attr("data-chapter-title").unwrap_or_default().to_string(),
                    anchor_id: first_descendant_id(e).map(str::to_string),
                });
            }
        });
        rows
    }

    fn heading_rows(nodes: &[DomNode]) -> Vec<HeadingRow> {
        let mut rows = Vec::new();
        walk_elements(nodes, &mut |e| {
            if let Some(level @ (1 | 2)) = e.tag.heading_level() {
                rows.push(HeadingRow {
                    level,
                    id: e.id().map(str::to_string),
                    text: collapse_whitespace(&e.text_content()),
                });
            }
        });
        rows
    }
}

impl Default for ForgeRenderer {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// Target id of a TOC placeholder element.
fn toc_target(e: &ElementNode) -> Option<&str> {
    if !e.has_class(TOC_PAGE_CLASS) {
        return None;
    }
    e.attr("data-target")
        .or_else(|| e.attr("href").and_then(|h| h.strip_prefix('#')))
        .filter(|t| !t.is_empty())
}

impl DocumentRenderer for ForgeRenderer {
    fn destination_naming(&self) -> DestinationNaming {
        DestinationNaming::Literal
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        let html = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        self.open_html(&html);
        log::debug!("Opened '{}'", path.display());
        Ok(())
    }

    fn evaluate(&self, query: DomQuery) -> Result<Value> {
        let nodes = body_children(self.nodes()?);
        let value = match query {
            DomQuery::TocTargets => serde_json::to_value(Self::toc_rows(nodes))?,
            DomQuery::Chapters => serde_json::to_value(Self::chapter_rows(nodes))?,
            DomQuery::Sections => serde_json::to_value(Self::heading_rows(nodes))?,
        };
        Ok(value)
    }

    fn mutate(&mut self, op: &DomMutation) -> Result<usize> {
        let nodes = self
            .dom
            .as_mut()
            .ok_or_else(|| Error::Render("no document is open".to_string()))?;
        match op {
            DomMutation::FillPageNumbers(map) => {
                let mut updated = 0;
                walk_elements_mut(nodes, &mut |e| {
                    let page = toc_target(e).and_then(|target| map.get(target));
                    if let Some(page) = page {
                        e.children = vec![DomNode::Text(page.to_string())];
                        updated += 1;
                    }
                });
                Ok(updated)
            }
        }
    }

    fn wait_for_images_settled(&mut self, timeout: Duration) -> ImagesSettled {
        if self.decode_images(Instant::now().checked_add(timeout)) {
            ImagesSettled::Settled
        } else {
            ImagesSettled::TimedOut
        }
    }

    /// Images still pending are decoded on the worker, so the hard timeout
    /// bounds decoding, flow and painting together. A timed-out worker is
    /// told to stop at its next checkpoint.
    fn render(&mut self, options: &PrintOptions) -> Result<Vec<u8>> {
        let all_nodes = self.nodes()?;
        let title = document_title(all_nodes).unwrap_or_default();
        let body = body_children(all_nodes).to_vec();
        let pending = self.pending_images();
        let mut images = self.images.clone();
        let options = options.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::clone(&cancel);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut outcome = DecodeOutcome::default();
            for src in pending {
                if cancelled.load(Ordering::Relaxed) {
                    return;
                }
                match decode_data_uri_image(&src) {
                    Ok(decoded) => {
                        let decoded = Arc::new(decoded);
                        images.insert(src.clone(), Arc::clone(&decoded));
                        outcome.decoded.push((src, decoded));
                    }
                    Err(e) => {
                        log::warn!("Skipping image — {e}");
                        outcome.failed.push(src);
                    }
                }
            }
            if cancelled.load(Ordering::Relaxed) {
                return;
            }
            let sizes: ImageSizes = images
                .iter()
                .map(|(src, img)| (src.clone(), (img.px_width, img.px_height)))
                .collect();
            let layout = flow_document(&body, &title, &options, &sizes);
            if log::log_enabled!(log::Level::Trace) {
                log::trace!("Layout: {}", layout.to_json());
            }
            if cancelled.load(Ordering::Relaxed) {
                return;
            }
            let painted = paint_pdf(&layout, &images);
            let result = add_named_destinations(&painted, &layout).map_err(|e| e.to_string());
            // The receiver is gone when the render timed out.
            let _ = tx.send((result, outcome));
        });

        match rx.recv_timeout(self.render_timeout) {
            Ok((result, outcome)) => {
                self.remember_images(outcome);
                result.map_err(Error::Render)
            }
            Err(RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::Relaxed);
                Err(Error::RenderTimeout(self.render_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Render("render worker terminated unexpectedly".to_string()))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.dom = None;
        self.images.clear();
        self.failed_images.clear();
        Ok(())
    }
}

/// Images a render worker decoded, handed back to the renderer's cache.
#[derive(Default)]
struct DecodeOutcome {
    decoded: Vec<(String, Arc<DecodedImage>)>,
    failed: Vec<String>,
}

/// Parse a `data:<mime>;base64,<data>` URI and decode the image it carries.
fn decode_data_uri_image(src: &str) -> std::result::Result<DecodedImage, String> {
    let bytes = parse_data_uri(src)?;
    let img = ::image::load_from_memory(&bytes).map_err(|e| format!("decode error: {e}"))?;
    Ok(DecodedImage {
        px_width: img.width(),
        px_height: img.height(),
        bytes,
    })
}

/// Return the raw decoded bytes of a base64 data URI.
fn parse_data_uri(src: &str) -> std::result::Result<Vec<u8>, String> {
    let Some(rest) = src.strip_prefix("data:") else {
        let preview: String = src.chars().take(80).collect();
        return Err(format!(
            "image src must be a base64 data URI (e.g. `data:image/png;base64,...`), got {preview:?}"
        ));
    };
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| "invalid data URI: missing `,` separator".to_string())?;
    if !header.contains(";base64") {
        return Err("only base64-encoded data URIs are supported".to_string());
    }
    BASE64_STD
        .decode(data.trim())
        .map_err(|e| format!("base64 decode error: {e}"))
}
