//! Section timeline – which section label is current on each page.

use crate::anchors::SectionInfo;

/// Per-page footer labels, built once after the final pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTimeline {
    /// Index `page - 1`.
    labels: Vec<Option<String>>,
    first_content_page: u32,
}

impl SectionTimeline {
    /// Build the timeline for a document of `total_pages` pages.
    ///
    /// Unresolved sections are ignored. Sections starting on the same page
    /// keep scan order, so the later one is current on that page.
    pub fn build(sections: &[SectionInfo], total_pages: u32) -> Self {
        let mut resolved: Vec<(u32, &str)> = sections
            .iter()
            .filter_map(|s| s.start_page.map(|p| (p, s.label.as_str())))
            .collect();
        // Stable: equal start pages stay in scan order.
        resolved.sort_by_key(|(page, _)| *page);

        let first_content_page = resolved
            .first()
            .map(|(page, _)| *page)
            .unwrap_or(total_pages + 1);

        let mut labels = Vec::with_capacity(total_pages as usize);
        let mut current: Option<&str> = None;
        let mut next = resolved.iter().peekable();
        for page in 1..=total_pages {
            while let Some((_, label)) = next.next_if(|(start, _)| *start <= page) {
                current = Some(*label);
            }
            labels.push(current.map(str::to_string));
        }

        log::debug!(
            "Section timeline: {} resolved sections, first content page {}",
            resolved.len(),
            first_content_page
        );
        Self {
            labels,
            first_content_page,
        }
    }

    /// Label current on `page` (1-based), if any.
    pub fn label_for(&self, page: u32) -> Option<&str> {
        let index = page.checked_sub(1)? as usize;
        self.labels.get(index)?.as_deref()
    }

    /// Smallest resolved start page, or `total_pages + 1` when none resolved.
    pub fn first_content_page(&self) -> u32 {
        self.first_content_page
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn section(id: &str, label: &str, start: Option<u32>) -> SectionInfo {
        SectionInfo {
            anchor_id: id.to_string(),
            label: label.to_string(),
            level: 1,
            start_page: start,
        }
    }

    #[test]
    fn ties_resolve_to_later_entry() {
        let sections = vec![
            section("a", "Chapter 1 \u{2014} Intro", Some(3)),
            section("b", "1.1 Setup", Some(3)),
            section("c", "Chapter 2 \u{2014} Next", Some(7)),
        ];
        let timeline = SectionTimeline::build(&sections, 9);
        assert_eq!(timeline.first_content_page(), 3);
        assert_eq!(timeline.label_for(1), None);
        assert_eq!(timeline.label_for(2), None);
        for page in 3..=6 {
            assert_eq!(timeline.label_for(page), Some("1.1 Setup"));
        }
        for page in 7..=9 {
            assert_eq!(timeline.label_for(page), Some("Chapter 2 \u{2014} Next"));
        }
        assert_eq!(timeline.label_for(0), None);
        assert_eq!(timeline.label_for(10), None);
    }

    #[test]
    fn no_resolved_sections() {
        let timeline = SectionTimeline::build(&[section("a", "A", None)], 4);
        assert_eq!(timeline.first_content_page(), 5);
        assert!((1..=4).all(|p| timeline.label_for(p).is_none()));
    }

    #[test]
    fn out_of_order_scan_is_sorted_by_page() {
        let sections = vec![section("late", "Late", Some(5)), section("early", "Early", Some(2))];
        let timeline = SectionTimeline::build(&sections, 6);
        assert_eq!(timeline.label_for(4), Some("Early"));
        assert_eq!(timeline.label_for(5), Some("Late"));
    }

    proptest! {
        #[test]
        fn label_is_last_started_section(
            starts in proptest::collection::vec(proptest::option::of(1u32..20), 0..12),
            total in 1u32..25,
        ) {
            let sections: Vec<SectionInfo> = starts
                .iter()
                .enumerate()
                .map(|(i, s)| section(&format!("s{i}"), &format!("L{i}"), *s))
                .collect();
            let timeline = SectionTimeline::build(&sections, total);

            for page in 1..=total {
                let mut expected: Option<(u32, usize)> = None;
                for (i, s) in starts.iter().enumerate() {
                    if let Some(start) = s {
                        if *start <= page && expected.map_or(true, |(best, _)| *start >= best) {
                            expected = Some((*start, i));
                        }
                    }
                }
                let expected_label = expected.map(|(_, i)| format!("L{i}"));
                prop_assert_eq!(timeline.label_for(page).map(str::to_string), expected_label);
            }

            let min_start = starts.iter().flatten().min().copied().unwrap_or(total + 1);
            prop_assert_eq!(timeline.first_content_page(), min_start);
        }
    }
}
