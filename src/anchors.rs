//! Anchor catalog – what the pre-render DOM says must be located in the
//! rendered document: TOC targets, chapters and H1/H2 sections.

use std::collections::HashSet;

use serde::de::DeserializeOwned;

use crate::destinations::{AnchorId, PageMap};
use crate::error::Result;
use crate::renderer::{ChapterRow, DocumentRenderer, DomQuery, HeadingRow, TocTargetRow};

/// A TOC entry waiting for its page number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocTarget {
    pub anchor_id: AnchorId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterInfo {
    pub num: String,
    pub title: String,
    /// Empty when the chapter element contains no element with an id; such a
    /// chapter never gets a start page.
    pub anchor_id: AnchorId,
    pub start_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub anchor_id: AnchorId,
    /// Text shown in the running footer while this section is current.
    pub label: String,
    /// 1 for H1, 2 for H2.
    pub level: u8,
    pub start_page: Option<u32>,
}

/// Footer label for a heading.
///
/// An H1 written as `"<N>. <text>"` becomes `"Chapter N — text"`; every other
/// heading is used verbatim.
pub fn section_label(level: u8, text: &str) -> String {
    let text = text.trim();
    if level == 1 {
        if let Some((num, rest)) = split_numbered(text) {
            return format!("Chapter {num} \u{2014} {rest}");
        }
    }
    text.to_string()
}

/// `"3. Deployment"` → `("3", "Deployment")`.
fn split_numbered(text: &str) -> Option<(&str, &str)> {
    let digits = text.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 {
        return None;
    }
    let (num, rest) = text.split_at(digits);
    let rest = rest.strip_prefix('.')?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    if rest.is_empty() {
        return None;
    }
    Some((num, rest))
}

/// Everything the pipeline needs to know about anchors, gathered once from
/// the pre-render DOM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorCatalog {
    pub toc_targets: Vec<TocTarget>,
    pub chapters: Vec<ChapterInfo>,
    pub sections: Vec<SectionInfo>,
}

impl AnchorCatalog {
    /// Query the live DOM of `renderer`.
    pub fn collect<R: DocumentRenderer + ?Sized>(renderer: &R) -> Result<Self> {
        let toc_rows: Vec<TocTargetRow> = query(renderer, DomQuery::TocTargets)?;
        let chapter_rows: Vec<ChapterRow> = query(renderer, DomQuery::Chapters)?;
        let heading_rows: Vec<HeadingRow> = query(renderer, DomQuery::Sections)?;

        let toc_targets = toc_rows
            .into_iter()
            .filter(|row| !row.anchor_id.is_empty())
            .map(|row| TocTarget {
                anchor_id: row.anchor_id,
            })
            .collect();

        let chapters = chapter_rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let num = row
                    .num
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| (i + 1).to_string());
                let anchor_id = row.anchor_id.unwrap_or_default();
                if anchor_id.is_empty() {
                    log::debug!("Chapter {num} has no internal anchor; its start page stays unknown");
                }
                ChapterInfo {
                    num,
                    title: row.title.trim().to_string(),
                    anchor_id,
                    start_page: None,
                }
            })
            .collect();

        let sections = heading_rows
            .into_iter()
            .filter_map(|row| {
                if !matches!(row.level, 1 | 2) {
                    return None;
                }
                let id = row.id.filter(|id| !id.is_empty())?;
                if row.text.trim().is_empty() {
                    return None;
                }
                Some(SectionInfo {
                    label: section_label(row.level, &row.text),
                    anchor_id: id,
                    level: row.level,
                    start_page: None,
                })
            })
            .collect();

        let catalog = Self {
            toc_targets,
            chapters,
            sections,
        };
        log::info!(
            "Anchor catalog: {} TOC targets, {} chapters, {} sections",
            catalog.toc_targets.len(),
            catalog.chapters.len(),
            catalog.sections.len()
        );
        Ok(catalog)
    }

    /// TOC targets plus every non-empty chapter and section anchor.
    pub fn resolution_targets(&self) -> HashSet<AnchorId> {
        self.toc_targets
            .iter()
            .map(|t| t.anchor_id.clone())
            .chain(self.chapters.iter().map(|c| c.anchor_id.clone()))
            .chain(self.sections.iter().map(|s| s.anchor_id.clone()))
            .filter(|id| !id.is_empty())
            .collect()
    }

    /// Assign start pages from `map`, clearing any earlier assignment.
    pub fn apply_page_map(&mut self, map: &PageMap) {
        for chapter in &mut self.chapters {
            chapter.start_page = if chapter.anchor_id.is_empty() {
                None
            } else {
                map.get(&chapter.anchor_id)
            };
        }
        for section in &mut self.sections {
            section.start_page = map.get(&section.anchor_id);
        }
    }

    /// Sections whose start page is known, in scan order.
    pub fn resolved_sections(&self) -> Vec<SectionInfo> {
        self.sections
            .iter()
            .filter(|s| s.start_page.is_some())
            .cloned()
            .collect()
    }
}

fn query<R: DocumentRenderer + ?Sized, T: DeserializeOwned>(
    renderer: &R,
    query: DomQuery,
) -> Result<Vec<T>> {
    let value = renderer.evaluate(query)?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::PrintOptions;
    use crate::destinations::DestinationNaming;
    use crate::renderer::{DomMutation, ImagesSettled};

    struct CannedDom {
        toc: serde_json::Value,
        chapters: serde_json::Value,
        headings: serde_json::Value,
    }

    impl DocumentRenderer for CannedDom {
        fn destination_naming(&self) -> DestinationNaming {
            DestinationNaming::Literal
        }
        fn open(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
        fn evaluate(&self, query: DomQuery) -> Result<serde_json::Value> {
            Ok(match query {
                DomQuery::TocTargets => self.toc.clone(),
                DomQuery::Chapters => self.chapters.clone(),
                DomQuery::Sections => self.headings.clone(),
            })
        }
        fn mutate(&mut self, _op: &DomMutation) -> Result<usize> {
            Ok(0)
        }
        fn wait_for_images_settled(&mut self, _timeout: Duration) -> ImagesSettled {
            ImagesSettled::Settled
        }
        fn render(&mut self, _options: &PrintOptions) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn sample() -> CannedDom {
        CannedDom {
            toc: json!([{"anchorId": "intro"}, {"anchorId": ""}, {"anchorId": "setup"}]),
            chapters: json!([
                {"num": "1", "title": "Intro", "anchorId": "intro"},
                {"title": "Appendix"},
            ]),
            headings: json!([
                {"level": 1, "id": "intro", "text": "1. Intro"},
                {"level": 2, "id": "setup", "text": "1.1 Setup"},
                {"level": 2, "text": "No id"},
                {"level": 1, "id": "blank", "text": "   "},
            ]),
        }
    }

    #[test]
    fn numbered_h1_becomes_chapter_label() {
        assert_eq!(section_label(1, "3. Deployment"), "Chapter 3 \u{2014} Deployment");
        assert_eq!(section_label(2, "3.2 Networking"), "3.2 Networking");
        assert_eq!(section_label(1, "Appendix"), "Appendix");
        assert_eq!(section_label(1, "3.2 Networking"), "3.2 Networking");
        assert_eq!(section_label(1, "12.  Wide  "), "Chapter 12 \u{2014} Wide");
    }

    #[test]
    fn collect_skips_incomplete_rows() {
        let catalog = AnchorCatalog::collect(&sample()).unwrap();
        let toc: Vec<&str> = catalog.toc_targets.iter().map(|t| t.anchor_id.as_str()).collect();
        assert_eq!(toc, vec!["intro", "setup"]);
        assert_eq!(catalog.sections.len(), 2);
        assert_eq!(catalog.sections[0].label, "Chapter 1 \u{2014} Intro");
        assert_eq!(catalog.sections[1].label, "1.1 Setup");
    }

    #[test]
    fn chapter_without_anchor_never_resolves() {
        let mut catalog = AnchorCatalog::collect(&sample()).unwrap();
        let appendix = &catalog.chapters[1];
        assert_eq!(appendix.num, "2");
        assert!(appendix.anchor_id.is_empty());

        let mut map = PageMap::new();
        map.insert("intro", 3);
        map.insert("", 9);
        catalog.apply_page_map(&map);
        assert_eq!(catalog.chapters[0].start_page, Some(3));
        assert_eq!(catalog.chapters[1].start_page, None);
        assert_eq!(catalog.sections[1].start_page, None);
        assert_eq!(catalog.resolved_sections().len(), 1);
    }

    #[test]
    fn resolution_targets_exclude_empty_anchor() {
        let catalog = AnchorCatalog::collect(&sample()).unwrap();
        let targets = catalog.resolution_targets();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains("intro"));
        assert!(targets.contains("setup"));
    }

    #[test]
    fn malformed_rows_are_an_error() {
        let dom = CannedDom {
            toc: json!({"not": "an array"}),
            chapters: json!([]),
            headings: json!([]),
        };
        assert!(AnchorCatalog::collect(&dom).is_err());
    }
}
