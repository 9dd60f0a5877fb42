//! # manual-forge – paginated PDF manuals from composed HTML
//!
//! A manual is rendered several times so its table of contents can show the
//! page each entry actually lands on. The pipeline stages are:
//!
//! 1. **Catalog** – collect TOC targets, chapters and H1/H2 sections from the
//!    live DOM ([`anchors`])
//! 2. **Converge** – render twice, resolving named destinations to page
//!    numbers ([`destinations`]) and writing them into the TOC ([`pipeline`])
//! 3. **Timeline** – map each page to its current section label ([`timeline`])
//! 4. **Stamp** – running title, rules, page numbers and section labels,
//!    with an embedded fallback font for non-Latin text ([`stamp`],
//!    [`fallback`])
//! 5. **Finish** – outline and document metadata ([`outline`], [`pdfdoc`])
//!
//! Rendering goes through the [`DocumentRenderer`] trait; [`ForgeRenderer`]
//! in [`engine`] is the built-in implementation.

pub mod anchors;
pub mod config;
pub mod destinations;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod fonts;
pub mod outline;
pub mod pdfdoc;
pub mod pipeline;
pub mod renderer;
pub mod stamp;
pub mod timeline;

// Re-exports for convenience
pub use config::{ManualConfig, Margins, PageOrientation, PrintOptions, RunningHeadStyle};
pub use destinations::{resolve_destinations, DestinationNaming, PageMap};
pub use engine::ForgeRenderer;
pub use error::{Error, Result};
pub use pipeline::{build_manual, write_manual, ManualOutput};
pub use renderer::{DocumentRenderer, DomMutation, DomQuery, ImagesSettled};
