//! Document outline (bookmarks) built from the resolved sections.

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::anchors::SectionInfo;
use crate::error::Result;
use crate::pdfdoc::text_string;

struct OutlineEntry {
    object_id: ObjectId,
    page_ref: ObjectId,
    title: String,
}

/// Replace the catalog's `/Outlines` with one flat entry per resolved
/// section, in page order. Returns the number of entries written.
pub fn write_outline(doc: &mut Document, sections: &[SectionInfo]) -> Result<usize> {
    let pages = doc.get_pages();

    let mut resolved: Vec<&SectionInfo> = sections.iter().filter(|s| s.start_page.is_some()).collect();
    resolved.sort_by_key(|s| s.start_page);

    let mut entries = Vec::with_capacity(resolved.len());
    for section in resolved {
        let Some(page) = section.start_page else { continue };
        let Some(page_ref) = pages.get(&page).copied() else {
            log::debug!("Outline: section '{}' points past the last page ({page})", section.anchor_id);
            continue;
        };
        entries.push(OutlineEntry {
            object_id: doc.new_object_id(),
            page_ref,
            title: section.label.clone(),
        });
    }
    if entries.is_empty() {
        return Ok(0);
    }

    let outlines_id = doc.new_object_id();
    for (index, entry) in entries.iter().enumerate() {
        let mut dictionary = Dictionary::new();
        dictionary.set("Title", text_string(&entry.title));
        dictionary.set(
            "Dest",
            Object::Array(vec![
                Object::Reference(entry.page_ref),
                Object::Name(b"Fit".to_vec()),
            ]),
        );
        dictionary.set("Parent", Object::Reference(outlines_id));
        if index > 0 {
            dictionary.set("Prev", Object::Reference(entries[index - 1].object_id));
        }
        if let Some(next) = entries.get(index + 1) {
            dictionary.set("Next", Object::Reference(next.object_id));
        }
        doc.objects.insert(entry.object_id, Object::Dictionary(dictionary));
    }

    let mut root = Dictionary::new();
    root.set("Type", Object::Name(b"Outlines".to_vec()));
    root.set("Count", Object::Integer(entries.len() as i64));
    if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
        root.set("First", Object::Reference(first.object_id));
        root.set("Last", Object::Reference(last.object_id));
    }
    doc.objects.insert(outlines_id, Object::Dictionary(root));

    let catalog = doc.catalog_mut()?;
    catalog.set("Outlines", Object::Reference(outlines_id));
    catalog.set("PageMode", Object::Name(b"UseOutlines".to_vec()));

    log::debug!("Outline: {} entries", entries.len());
    Ok(entries.len())
}
