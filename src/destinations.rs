//! Destination resolver – recovers `anchor id → page number` from a rendered
//! document by walking its named destinations.
//!
//! The renderer writes one named destination per element id. Reading them
//! back from the object graph is the only reliable way to learn where layout
//! placed each anchor.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use lopdf::{Dictionary, Document, Object, ObjectId};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque string naming a content location (HTML id / destination key).
pub type AnchorId = String;

/// Name trees deeper than this are treated as malformed.
const MAX_NAME_TREE_DEPTH: usize = 32;

/// How an engine spells destination keys in its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationNaming {
    /// Keys are the element ids verbatim.
    Literal,
    /// Keys carry `#XX` / `%XX` escapes nested `layers` deep, optionally
    /// behind a leading `/` delimiter.
    HexPercentEscaped { layers: usize },
}

impl DestinationNaming {
    /// Chromium's print pipeline percent-encodes the fragment and the name
    /// escaping adds a second layer on top.
    pub const CHROMIUM: Self = DestinationNaming::HexPercentEscaped { layers: 2 };

    /// Turn a raw destination key into the anchor id it names.
    pub fn normalize(&self, raw: &[u8]) -> String {
        let key = String::from_utf8_lossy(raw);
        match *self {
            DestinationNaming::Literal => key.into_owned(),
            DestinationNaming::HexPercentEscaped { layers } => {
                let mut name = key.strip_prefix('/').unwrap_or(&key).to_string();
                for _ in 0..layers {
                    match decode_escape_layer(&name) {
                        Some(decoded) => name = decoded,
                        None => break,
                    }
                }
                name
            }
        }
    }
}

/// Rewrite `#XX` escapes as `%XX`, then percent-decode. `None` when the
/// decoded bytes are not UTF-8.
fn decode_escape_layer(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut rewritten = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            rewritten.push('%');
            i += 1;
            continue;
        }
        let ch = input[i..].chars().next()?;
        rewritten.push(ch);
        i += ch.len_utf8();
    }
    percent_decode_str(&rewritten)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

/// Anchor id → 1-based page number, as resolved from one rendered document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageMap(BTreeMap<AnchorId, u32>);

impl PageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, anchor: &str) -> Option<u32> {
        self.0.get(anchor).copied()
    }

    /// Record a mapping; the first mapping for an anchor wins.
    pub fn insert(&mut self, anchor: impl Into<AnchorId>, page: u32) -> bool {
        match self.0.entry(anchor.into()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(page);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the anchors in `anchors`.
    pub fn restricted_to<'a>(&self, anchors: impl IntoIterator<Item = &'a str>) -> PageMap {
        let mut out = PageMap::new();
        for anchor in anchors {
            if let Some(page) = self.get(anchor) {
                out.insert(anchor, page);
            }
        }
        out
    }

    /// Anchors whose page differs between `self` and `other` (including
    /// anchors present in only one of the two).
    pub fn drift_from(&self, other: &PageMap) -> usize {
        let keys: BTreeSet<&AnchorId> = self.0.keys().chain(other.0.keys()).collect();
        keys.into_iter()
            .filter(|k| self.0.get(*k) != other.0.get(*k))
            .count()
    }
}

/// Parse rendered bytes and resolve the named destinations listed in
/// `targets`.
pub fn resolve_destinations(
    pdf_bytes: &[u8],
    targets: &HashSet<AnchorId>,
    naming: DestinationNaming,
) -> Result<PageMap> {
    let doc = Document::load_mem(pdf_bytes).map_err(Error::Parse)?;
    Ok(resolve_in_document(&doc, targets, naming))
}

/// Resolve destinations on an already loaded document. Never fails: anything
/// that cannot be followed is skipped.
pub fn resolve_in_document(
    doc: &Document,
    targets: &HashSet<AnchorId>,
    naming: DestinationNaming,
) -> PageMap {
    let mut map = PageMap::new();

    let page_index: HashMap<ObjectId, u32> = doc
        .get_pages()
        .into_iter()
        .map(|(number, id)| (id, number))
        .collect();

    let Some(catalog) = root_catalog(doc) else {
        log::warn!("Rendered document has no root catalog; no anchors resolved");
        return map;
    };

    let mut entries: Vec<(Vec<u8>, &Object)> = Vec::new();

    if let Some(dests) = catalog.get(b"Dests").ok().and_then(|o| as_dict(doc, o)) {
        for (key, value) in dests.iter() {
            entries.push((key.clone(), value));
        }
    }

    if let Some(tree) = catalog
        .get(b"Names")
        .ok()
        .and_then(|o| as_dict(doc, o))
        .and_then(|names| names.get(b"Dests").ok())
        .and_then(|o| as_dict(doc, o))
    {
        collect_name_tree(doc, tree, 0, &mut HashSet::new(), &mut entries);
    }

    if entries.is_empty() {
        log::debug!("No named destinations in rendered document");
        return map;
    }

    for (raw_key, value) in entries {
        let anchor = naming.normalize(&raw_key);
        if !targets.contains(&anchor) {
            continue;
        }
        match destination_page(doc, value, &page_index) {
            Some(page) => {
                if map.insert(anchor.as_str(), page) {
                    log::debug!("Anchor '{anchor}' → page {page}");
                }
            }
            None => log::debug!("Anchor '{anchor}' has an unresolvable destination"),
        }
    }

    map
}

fn root_catalog(doc: &Document) -> Option<&Dictionary> {
    let root = doc.trailer.get(b"Root").ok()?;
    as_dict(doc, root)
}

/// Follow an indirect reference (if any) and view the target as a dictionary.
fn as_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match deref(doc, obj)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

fn deref<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    doc.dereference(obj).ok().map(|(_, target)| target)
}

/// Collect `(key, value)` leaves of a name tree.
fn collect_name_tree<'a>(
    doc: &'a Document,
    node: &'a Dictionary,
    depth: usize,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<(Vec<u8>, &'a Object)>,
) {
    if depth > MAX_NAME_TREE_DEPTH {
        log::warn!("Destination name tree deeper than {MAX_NAME_TREE_DEPTH}; truncated");
        return;
    }

    if let Some(Object::Array(pairs)) = node.get(b"Names").ok().and_then(|o| deref(doc, o)) {
        for pair in pairs.chunks(2) {
            if let [key, value] = pair {
                if let Some(Object::String(bytes, _)) = deref(doc, key) {
                    out.push((text_string_bytes(bytes), value));
                }
            }
        }
    }

    if let Some(Object::Array(kids)) = node.get(b"Kids").ok().and_then(|o| deref(doc, o)) {
        for kid in kids {
            if let Object::Reference(id) = kid {
                if !visited.insert(*id) {
                    continue;
                }
            }
            if let Some(child) = as_dict(doc, kid) {
                collect_name_tree(doc, child, depth + 1, visited, out);
            }
        }
    }
}

/// Name-tree keys are text strings: UTF-16BE with a BOM, or byte strings.
fn text_string_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units).into_bytes()
    } else {
        bytes.to_vec()
    }
}

/// Page number of an explicit destination (`[page …]` or `<< /D [page …] >>`).
fn destination_page(
    doc: &Document,
    value: &Object,
    page_index: &HashMap<ObjectId, u32>,
) -> Option<u32> {
    let array = match deref(doc, value)? {
        Object::Array(array) => array,
        Object::Dictionary(dict) => match deref(doc, dict.get(b"D").ok()?)? {
            Object::Array(array) => array,
            _ => return None,
        },
        _ => return None,
    };
    match array.first()? {
        Object::Reference(page_id) => page_index.get(page_id).copied(),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{Stream, StringFormat};

    /// Build a document with `pages` empty pages and the given destinations.
    /// Each destination is `(key, 1-based page)`; keys go into `/Dests`.
    pub(crate) fn fixture_with_dests(pages: usize, dests: &[(&[u8], u32)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for _ in 0..pages {
            let content_id = doc.add_object(Stream::new(Dictionary::new(), b"".to_vec()));
            let mut page = Dictionary::new();
            page.set("Type", Object::Name(b"Page".to_vec()));
            page.set("Parent", Object::Reference(pages_id));
            page.set("Contents", Object::Reference(content_id));
            page.set(
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ]),
            );
            kids.push(Object::Reference(doc.add_object(page)));
        }
        let mut dest_dict = Dictionary::new();
        for (key, page) in dests {
            let page_ref = kids[(*page - 1) as usize].clone();
            dest_dict.set(
                key.to_vec(),
                Object::Array(vec![
                    page_ref,
                    Object::Name(b"XYZ".to_vec()),
                    Object::Integer(0),
                    Object::Integer(700),
                    Object::Null,
                ]),
            );
        }
        let mut pages_dict = Dictionary::new();
        pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
        pages_dict.set("Count", Object::Integer(pages as i64));
        pages_dict.set("Kids", Object::Array(kids));
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

        let dests_id = doc.add_object(dest_dict);
        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        catalog.set("Dests", Object::Reference(dests_id));
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn targets(ids: &[&str]) -> HashSet<AnchorId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn chromium_key_decodes_hangul() {
        let naming = DestinationNaming::CHROMIUM;
        assert_eq!(naming.normalize(b"%EB%AA%A9"), "목");
        assert_eq!(naming.normalize(b"/#25EB#25AA#25A9"), "목");
        assert_eq!(naming.normalize(b"/intro"), "intro");
    }

    #[test]
    fn invalid_utf8_keeps_partial_decode() {
        let naming = DestinationNaming::CHROMIUM;
        // The second layer would produce a lone 0xFF byte.
        assert_eq!(naming.normalize(b"a%25FF"), "a%FF");
    }

    #[test]
    fn literal_naming_is_verbatim() {
        assert_eq!(DestinationNaming::Literal.normalize(b"/a%20b"), "/a%20b");
    }

    #[test]
    fn resolves_requested_anchors_only() {
        let bytes = fixture_with_dests(4, &[(b"intro", 2), (b"setup", 3), (b"other", 4)]);
        let map = resolve_destinations(
            &bytes,
            &targets(&["intro", "setup", "missing"]),
            DestinationNaming::Literal,
        )
        .unwrap();
        assert_eq!(map.get("intro"), Some(2));
        assert_eq!(map.get("setup"), Some(3));
        assert_eq!(map.get("other"), None);
        assert_eq!(map.get("missing"), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn chromium_escaped_key_resolves() {
        let bytes = fixture_with_dests(3, &[(b"%EB%AA%A9", 3)]);
        let map = resolve_destinations(&bytes, &targets(&["목"]), DestinationNaming::CHROMIUM)
            .unwrap();
        assert_eq!(map.get("목"), Some(3));
    }

    #[test]
    fn resolution_is_idempotent() {
        let bytes = fixture_with_dests(5, &[(b"a", 1), (b"b", 5), (b"c", 3)]);
        let t = targets(&["a", "b", "c"]);
        let first = resolve_destinations(&bytes, &t, DestinationNaming::Literal).unwrap();
        let second = resolve_destinations(&bytes, &t, DestinationNaming::Literal).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.drift_from(&second), 0);
    }

    #[test]
    fn missing_dests_yields_empty_map() {
        let bytes = fixture_with_dests(2, &[]);
        let map = resolve_destinations(&bytes, &targets(&["a"]), DestinationNaming::Literal)
            .unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn garbage_bytes_are_a_parse_error() {
        let err = resolve_destinations(b"not a pdf", &targets(&["a"]), DestinationNaming::Literal)
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn name_tree_destinations_resolve() {
        let bytes = fixture_with_dests(3, &[]);
        let mut doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        let page2 = pages[&2];

        let dest = Object::Array(vec![Object::Reference(page2), Object::Name(b"Fit".to_vec())]);
        let mut wrapped = Dictionary::new();
        wrapped.set("D", dest);
        let mut leaf = Dictionary::new();
        leaf.set(
            "Names",
            Object::Array(vec![
                Object::String(b"tree-anchor".to_vec(), StringFormat::Literal),
                Object::Dictionary(wrapped),
            ]),
        );
        let leaf_id = doc.add_object(leaf);
        let mut root = Dictionary::new();
        root.set("Kids", Object::Array(vec![Object::Reference(leaf_id)]));
        let mut names = Dictionary::new();
        names.set("Dests", Object::Dictionary(root));

        let catalog_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
        if let Ok(Object::Dictionary(catalog)) = doc.get_object_mut(catalog_id) {
            catalog.set("Names", Object::Dictionary(names));
        }

        let map = resolve_in_document(&doc, &targets(&["tree-anchor"]), DestinationNaming::Literal);
        assert_eq!(map.get("tree-anchor"), Some(2));
    }

    #[test]
    fn page_map_first_insert_wins_and_drift_counts() {
        let mut a = PageMap::new();
        assert!(a.insert("x", 2));
        assert!(!a.insert("x", 9));
        assert_eq!(a.get("x"), Some(2));
        let mut b = PageMap::new();
        b.insert("x", 3);
        b.insert("y", 1);
        assert_eq!(a.drift_from(&b), 2);
    }
}
