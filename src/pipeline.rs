//! Pipeline – ties together the renderer passes, destination resolution,
//! running heads and the outline into a single function call.

use std::fs;
use std::path::Path;

use lopdf::Document;

use crate::anchors::{AnchorCatalog, ChapterInfo, SectionInfo};
use crate::config::ManualConfig;
use crate::destinations::{resolve_destinations, AnchorId, DestinationNaming, PageMap};
use crate::error::{Error, Result};
use crate::fallback::resolve_fallback_font;
use crate::fonts::LatinFont;
use crate::outline::write_outline;
use crate::pdfdoc::{save_to_vec, set_metadata, Metadata};
use crate::renderer::{DocumentRenderer, DomMutation, ImagesSettled, RendererSession};
use crate::stamp::{stamp_running_heads, StampFonts};
use crate::timeline::SectionTimeline;

/// Number of render/resolve/inject cycles before the final render.
pub const PASSES: usize = 2;

const INTERMEDIATE_HTML: &str = "manual.html";

/// Everything a finished build produced.
#[derive(Debug, Clone)]
pub struct ManualOutput {
    /// Final document bytes.
    pub pdf: Vec<u8>,
    /// Page map of the last pass.
    pub page_map: PageMap,
    pub chapters: Vec<ChapterInfo>,
    pub sections: Vec<SectionInfo>,
    pub total_pages: u32,
    /// Pages that received running heads.
    pub stamped_pages: usize,
    /// PostScript name of the embedded fallback font, if any.
    pub fallback_font: Option<String>,
    pub outline_entries: usize,
}

impl ManualOutput {
    /// Chapter start pages in document order; `None` for unresolved chapters.
    pub fn chapter_pages(&self) -> Vec<Option<u32>> {
        self.chapters.iter().map(|c| c.start_page).collect()
    }
}

/// Full pipeline: composed HTML → finished manual.
///
/// The renderer is closed before this returns, on success and on error.
pub fn build_manual<R: DocumentRenderer>(
    renderer: R,
    html: &str,
    config: &ManualConfig,
) -> Result<ManualOutput> {
    config.validate()?;

    // 1. Stage the HTML where the renderer can load it
    let workdir = tempfile::tempdir().map_err(|e| Error::io(std::env::temp_dir(), e))?;
    let html_path = workdir.path().join(INTERMEDIATE_HTML);
    fs::write(&html_path, html).map_err(|e| Error::io(&html_path, e))?;

    let mut session = RendererSession::new(renderer);
    session.open(&html_path)?;
    if session.wait_for_images_settled(config.image_wait()) == ImagesSettled::TimedOut {
        log::warn!(
            "Images did not settle within {:?}; rendering anyway",
            config.image_wait()
        );
    }

    // 2. Catalog anchors from the pre-render DOM
    let mut catalog = AnchorCatalog::collect(&*session)?;
    let targets = catalog.resolution_targets();
    let naming = effective_naming(&*session, config);
    log::debug!("Resolving {} anchors with {naming:?} naming", targets.len());

    // 3. Render, resolve, inject
    let mut previous: Option<PageMap> = None;
    for pass in 1..=PASSES {
        let bytes = session.render(&config.print)?;
        let map = resolve_destinations(&bytes, &targets, naming)?;
        let updated = session.mutate(&DomMutation::FillPageNumbers(map.clone()))?;
        log::info!(
            "Pass {pass}: resolved {}/{} anchors, filled {updated} TOC entries",
            map.len(),
            targets.len()
        );
        if let Some(prev) = &previous {
            let drift = map.drift_from(prev);
            if drift > 0 {
                log::debug!("Page map changed for {drift} anchors between passes");
            }
        }
        previous = Some(map);
    }
    let page_map = previous.unwrap_or_default();
    catalog.apply_page_map(&page_map);
    log_unresolved(&catalog, &targets, &page_map);

    // 4. Final render of the corrected DOM
    let rendered = session.render(&config.print)?;
    session.close()?;
    drop(workdir);

    // 5. Running heads, outline, metadata
    let finished = finalize(&rendered, &catalog, config)?;
    Ok(ManualOutput {
        pdf: finished.pdf,
        page_map,
        chapters: catalog.chapters,
        sections: catalog.sections,
        total_pages: finished.total_pages,
        stamped_pages: finished.stamped_pages,
        fallback_font: finished.fallback_font,
        outline_entries: finished.outline_entries,
    })
}

/// Build the manual and write it to `output`, creating parent directories.
pub fn write_manual<R: DocumentRenderer>(
    renderer: R,
    html: &str,
    config: &ManualConfig,
    output: &Path,
) -> Result<ManualOutput> {
    let manual = build_manual(renderer, html, config)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fs::write(output, &manual.pdf).map_err(|e| Error::io(output, e))?;
    log::info!("Wrote {} ({} bytes)", output.display(), manual.pdf.len());
    Ok(manual)
}

struct Finished {
    pdf: Vec<u8>,
    total_pages: u32,
    stamped_pages: usize,
    fallback_font: Option<String>,
    outline_entries: usize,
}

fn finalize(rendered: &[u8], catalog: &AnchorCatalog, config: &ManualConfig) -> Result<Finished> {
    let mut doc = Document::load_mem(rendered).map_err(Error::Parse)?;
    let total_pages = doc.get_pages().len() as u32;
    let sections = catalog.resolved_sections();
    let timeline = SectionTimeline::build(&sections, total_pages);
    log::debug!(
        "Timeline: first content page {} of {total_pages}",
        timeline.first_content_page()
    );

    let latin = LatinFont::register(&mut doc);
    let fallback = resolve_fallback_font(&mut doc, &config.fallback_fonts);
    if fallback.is_none() {
        log::warn!("No fallback font available; running heads use Helvetica only");
    }
    let fallback_font = fallback.as_ref().map(|f| f.base_font().to_string());

    let mut fonts = StampFonts::new(latin, fallback);
    let stamped_pages = stamp_running_heads(
        &mut doc,
        &timeline,
        &config.title,
        &config.running_heads,
        &config.print.margins,
        &mut fonts,
    )?;
    fonts.finish(&mut doc);

    let outline_entries = if config.outline {
        write_outline(&mut doc, &sections)?
    } else {
        0
    };

    set_metadata(
        &mut doc,
        &Metadata {
            title: &config.title,
            author: config.author.as_deref(),
            subject: config.subject.as_deref(),
            keywords: &config.keywords,
        },
    );

    Ok(Finished {
        pdf: save_to_vec(&mut doc)?,
        total_pages,
        stamped_pages,
        fallback_font,
        outline_entries,
    })
}

fn log_unresolved(
    catalog: &AnchorCatalog,
    targets: &std::collections::HashSet<AnchorId>,
    map: &PageMap,
) {
    let mut missing: Vec<&str> = targets
        .iter()
        .map(String::as_str)
        .filter(|id| map.get(id).is_none())
        .collect();
    missing.sort_unstable();
    for id in &missing {
        log::debug!("Anchor '{id}' did not resolve");
    }
    let without_anchor = catalog.chapters.iter().filter(|c| c.anchor_id.is_empty()).count();
    if without_anchor > 0 {
        log::debug!("{without_anchor} chapters contain no anchor and have no start page");
    }
}

/// The naming the pipeline will use for `renderer` under `config`.
pub fn effective_naming<R: DocumentRenderer + ?Sized>(
    renderer: &R,
    config: &ManualConfig,
) -> DestinationNaming {
    config
        .destination_naming
        .unwrap_or_else(|| renderer.destination_naming())
}
