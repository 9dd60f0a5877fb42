//! The seam between the pipeline and a headless rendering engine.
//!
//! A [`DocumentRenderer`] owns a live document loaded from HTML. The pipeline
//! talks to it with a handful of blocking calls: typed DOM queries answered as
//! JSON, one kind of DOM mutation, an image-settle wait and print-to-document.
//! The row structs below are the JSON contract for query results.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PrintOptions;
use crate::destinations::{DestinationNaming, PageMap};
use crate::error::Result;

/// Structured queries run against the live DOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomQuery {
    /// Every TOC page-number placeholder, in document order → `[TocTargetRow]`.
    TocTargets,
    /// Every chapter container, in document order → `[ChapterRow]`.
    Chapters,
    /// Every H1/H2 heading, in document order → `[HeadingRow]`.
    Sections,
}

/// Edits applied to the live DOM between render passes.
#[derive(Debug, Clone, PartialEq)]
pub enum DomMutation {
    /// Replace the text of each TOC placeholder whose target is in the map
    /// with the decimal page number. Other placeholders keep their content.
    FillPageNumbers(PageMap),
}

/// Outcome of the bounded wait for images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagesSettled {
    Settled,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocTargetRow {
    pub anchor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRow {
    /// Chapter number as written in the markup, if any.
    #[serde(default)]
    pub num: Option<String>,
    #[serde(default)]
    pub title: String,
    /// Id of the first element inside the chapter that has one.
    #[serde(default)]
    pub anchor_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadingRow {
    pub level: u8,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: String,
}

/// A headless engine able to lay out HTML and print it to a paginated
/// document with named destinations for element ids.
pub trait DocumentRenderer {
    /// How this engine spells destination names for element ids.
    fn destination_naming(&self) -> DestinationNaming;

    /// Load the HTML file at `path` as the live document.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Run a structured query against the live DOM.
    fn evaluate(&self, query: DomQuery) -> Result<serde_json::Value>;

    /// Apply a mutation and return the number of elements it changed.
    fn mutate(&mut self, op: &DomMutation) -> Result<usize>;

    /// Wait until images are loaded or `timeout` expires.
    fn wait_for_images_settled(&mut self, timeout: Duration) -> ImagesSettled;

    /// Print the live document.
    fn render(&mut self, options: &PrintOptions) -> Result<Vec<u8>>;

    /// Release the engine. Further calls are invalid.
    fn close(&mut self) -> Result<()>;
}

/// Owns a renderer for the duration of one job and closes it on every exit
/// path.
pub struct RendererSession<R: DocumentRenderer> {
    renderer: R,
    closed: bool,
}

impl<R: DocumentRenderer> RendererSession<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            closed: false,
        }
    }

    /// Close the renderer, surfacing any error. Dropping the session
    /// afterwards does nothing.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.renderer.close()
    }
}

impl<R: DocumentRenderer> Deref for RendererSession<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.renderer
    }
}

impl<R: DocumentRenderer> DerefMut for RendererSession<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}

impl<R: DocumentRenderer> Drop for RendererSession<R> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.renderer.close() {
            log::warn!("Failed to close renderer: {e}");
        }
    }
}
