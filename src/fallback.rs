//! Font fallback resolver – finds and embeds a TrueType font covering
//! scripts the Latin font cannot show.
//!
//! The embedded font is a Type0 composite font (`Identity-H`) with a
//! `CIDFontType2` descendant. Text is shaped with `rustybuzz` so codes in the
//! content stream are glyph ids; the font program is subset with `subsetter`
//! once every stamped string is known (see [`EmbeddedFont::finish`]).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use thiserror::Error;

use crate::fonts::FontHandle;

/// Resource name of the fallback font inside page resource dictionaries.
pub const FALLBACK_RESOURCE: &str = "MfFallback";

/// Tag prefixed to the PostScript name of a subset font.
const SUBSET_TAG: &str = "MFRGSB";

/// Why a candidate font could not be embedded.
#[derive(Debug, Error)]
pub enum FontError {
    #[error("cannot read font: {0}")]
    Io(#[from] io::Error),
    #[error("font collections cannot be subset as a single face")]
    Collection,
    #[error("font data is not a parseable TrueType/OpenType face")]
    Parse,
    #[error("font license forbids embedding")]
    Restricted,
    #[error("unsupported outlines: {0}")]
    Unsupported(&'static str),
}

/// Walk `candidates` in priority order and embed the first usable font.
///
/// `None` is an expected outcome: the caller then stamps with the Latin font
/// only.
pub fn resolve_fallback_font(doc: &mut Document, candidates: &[PathBuf]) -> Option<EmbeddedFont> {
    for path in candidates {
        if !path.is_file() {
            log::debug!("Fallback font '{}' not present", path.display());
            continue;
        }
        if is_collection_path(path) {
            log::debug!("Skipping font collection '{}'", path.display());
            continue;
        }
        match load_candidate(path).and_then(|data| EmbeddedFont::embed(doc, data)) {
            Ok(font) => {
                log::info!("Using fallback font '{}' ({})", path.display(), font.base_font());
                return Some(font);
            }
            Err(FontError::Collection) => {
                log::debug!("Skipping font collection '{}'", path.display());
            }
            Err(e) => log::warn!("Cannot embed fallback font '{}': {e}", path.display()),
        }
    }
    log::info!("No fallback font available; running heads use the Latin font only");
    None
}

fn is_collection_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ttc") || e.eq_ignore_ascii_case("otc"))
}

fn load_candidate(path: &Path) -> Result<Vec<u8>, FontError> {
    let data = fs::read(path)?;
    if data.starts_with(b"ttcf") {
        return Err(FontError::Collection);
    }
    Ok(data)
}

/// One glyph actually drawn with the font.
#[derive(Debug, Clone)]
struct UsedGlyph {
    /// Advance in 1000 units/em.
    width: f32,
    /// Text the glyph stands for (empty for the tail of a multi-glyph cluster).
    text: String,
}

/// Object ids reserved when the font is registered.
#[derive(Debug, Clone, Copy)]
struct FontObjects {
    type0: ObjectId,
    cid_font: ObjectId,
    descriptor: ObjectId,
    font_file: ObjectId,
    to_unicode: ObjectId,
}

/// A TrueType font registered in the document, subset on [`finish`](Self::finish).
pub struct EmbeddedFont {
    data: Vec<u8>,
    base_font: String,
    units_per_em: f32,
    ascent: f32,
    descent: f32,
    cap_height: f32,
    bbox: [f32; 4],
    objects: FontObjects,
    remapper: subsetter::GlyphRemapper,
    /// Original glyph id for every remapped id, indexed by the new id.
    new_to_old: Vec<u16>,
    used: BTreeMap<u16, UsedGlyph>,
}

impl EmbeddedFont {
    /// Validate `data` and register the font dictionary in `doc`.
    ///
    /// Nothing is added to the document when validation fails.
    pub fn embed(doc: &mut Document, data: Vec<u8>) -> Result<Self, FontError> {
        if data.starts_with(b"ttcf") {
            return Err(FontError::Collection);
        }
        let face = ttf_parser::Face::parse(&data, 0).map_err(|_| FontError::Parse)?;
        if face.permissions() == Some(ttf_parser::Permissions::Restricted) {
            return Err(FontError::Restricted);
        }
        if face.tables().glyf.is_none() {
            return Err(FontError::Unsupported("no glyf table (CFF-flavoured OpenType)"));
        }
        if rustybuzz::Face::from_slice(&data, 0).is_none() {
            return Err(FontError::Parse);
        }

        let units_per_em = face.units_per_em() as f32;
        let scale = 1000.0 / units_per_em;
        let bb = face.global_bounding_box();
        let base_font = postscript_name(&face);
        let ascent = face.ascender() as f32 * scale;
        let descent = face.descender() as f32 * scale;
        let cap_height = face.capital_height().map(|h| h as f32 * scale).unwrap_or(700.0);
        let bbox = [
            bb.x_min as f32 * scale,
            bb.y_min as f32 * scale,
            bb.x_max as f32 * scale,
            bb.y_max as f32 * scale,
        ];
        drop(face);

        let objects = FontObjects {
            type0: doc.new_object_id(),
            cid_font: doc.new_object_id(),
            descriptor: doc.new_object_id(),
            font_file: doc.new_object_id(),
            to_unicode: doc.new_object_id(),
        };
        let base_font = format!("{SUBSET_TAG}+{base_font}");

        let mut type0 = Dictionary::new();
        type0.set("Type", Object::Name(b"Font".to_vec()));
        type0.set("Subtype", Object::Name(b"Type0".to_vec()));
        type0.set("BaseFont", Object::Name(base_font.clone().into_bytes()));
        type0.set("Encoding", Object::Name(b"Identity-H".to_vec()));
        type0.set(
            "DescendantFonts",
            Object::Array(vec![Object::Reference(objects.cid_font)]),
        );
        type0.set("ToUnicode", Object::Reference(objects.to_unicode));
        doc.objects.insert(objects.type0, Object::Dictionary(type0));

        let mut remapper = subsetter::GlyphRemapper::new();
        // .notdef keeps id 0 in the subset.
        remapper.remap(0);

        Ok(Self {
            data,
            base_font,
            units_per_em,
            ascent,
            descent,
            cap_height,
            bbox,
            objects,
            remapper,
            new_to_old: vec![0],
            used: BTreeMap::new(),
        })
    }

    /// PostScript name written to the font dictionaries.
    pub fn base_font(&self) -> &str {
        &self.base_font
    }

    /// Shape `text` and return `(glyph id, cluster byte offset)` pairs.
    fn shape(&self, text: &str) -> Vec<(u16, usize)> {
        let Some(face) = rustybuzz::Face::from_slice(&self.data, 0) else {
            return Vec::new();
        };
        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        buffer.guess_segment_properties();
        let output = rustybuzz::shape(&face, &[], buffer);
        output
            .glyph_infos()
            .iter()
            .map(|info| (info.glyph_id as u16, info.cluster as usize))
            .collect()
    }

    /// Advance of an original glyph id in 1000 units/em.
    fn advance_1000(face: &ttf_parser::Face<'_>, gid: u16, units_per_em: f32) -> f32 {
        face.glyph_hor_advance(ttf_parser::GlyphId(gid))
            .map(|adv| adv as f32 * 1000.0 / units_per_em)
            .unwrap_or(0.0)
    }

    /// Write the subset font program, descriptor, CID font and `ToUnicode`
    /// map into the ids reserved by [`embed`](Self::embed).
    pub fn finish(self, doc: &mut Document) {
        let (program, cid_to_gid) = match subsetter::subset(&self.data, 0, &self.remapper) {
            Ok(subset) => (subset, None),
            Err(e) => {
                log::warn!("Subsetting {} failed ({e:?}); embedding the full font", self.base_font);
                (self.data.clone(), Some(cid_to_gid_map(&self.new_to_old)))
            }
        };
        log::debug!(
            "Embedding {} with {} glyphs ({} bytes)",
            self.base_font,
            self.used.len(),
            program.len()
        );

        let mut file_dict = Dictionary::new();
        file_dict.set("Length1", Object::Integer(program.len() as i64));
        let mut file_stream = Stream::new(file_dict, program);
        // Compression is best effort; an uncompressed stream is still valid.
        let _ = file_stream.compress();
        doc.objects.insert(self.objects.font_file, Object::Stream(file_stream));

        let mut descriptor = Dictionary::new();
        descriptor.set("Type", Object::Name(b"FontDescriptor".to_vec()));
        descriptor.set("FontName", Object::Name(self.base_font.clone().into_bytes()));
        descriptor.set("Flags", Object::Integer(4));
        descriptor.set(
            "FontBBox",
            Object::Array(self.bbox.iter().map(|v| Object::Real(*v)).collect()),
        );
        descriptor.set("ItalicAngle", Object::Integer(0));
        descriptor.set("Ascent", Object::Real(self.ascent));
        descriptor.set("Descent", Object::Real(self.descent));
        descriptor.set("CapHeight", Object::Real(self.cap_height));
        descriptor.set("StemV", Object::Integer(80));
        descriptor.set("FontFile2", Object::Reference(self.objects.font_file));
        doc.objects.insert(self.objects.descriptor, Object::Dictionary(descriptor));

        let mut system_info = Dictionary::new();
        system_info.set("Registry", Object::string_literal("Adobe"));
        system_info.set("Ordering", Object::string_literal("Identity"));
        system_info.set("Supplement", Object::Integer(0));

        let mut widths = Vec::with_capacity(self.used.len() * 2);
        for (gid, glyph) in &self.used {
            widths.push(Object::Integer(*gid as i64));
            widths.push(Object::Array(vec![Object::Real(glyph.width)]));
        }

        let mut cid_font = Dictionary::new();
        cid_font.set("Type", Object::Name(b"Font".to_vec()));
        cid_font.set("Subtype", Object::Name(b"CIDFontType2".to_vec()));
        cid_font.set("BaseFont", Object::Name(self.base_font.clone().into_bytes()));
        cid_font.set("CIDSystemInfo", Object::Dictionary(system_info));
        cid_font.set("FontDescriptor", Object::Reference(self.objects.descriptor));
        cid_font.set("DW", Object::Integer(1000));
        cid_font.set("W", Object::Array(widths));
        match cid_to_gid {
            Some(map) => {
                let map_id = doc.add_object(Stream::new(Dictionary::new(), map));
                cid_font.set("CIDToGIDMap", Object::Reference(map_id));
            }
            None => cid_font.set("CIDToGIDMap", Object::Name(b"Identity".to_vec())),
        }
        doc.objects.insert(self.objects.cid_font, Object::Dictionary(cid_font));

        let cmap = to_unicode_cmap(&self.used);
        doc.objects.insert(
            self.objects.to_unicode,
            Object::Stream(Stream::new(Dictionary::new(), cmap.into_bytes())),
        );
    }
}

impl FontHandle for EmbeddedFont {
    fn resource_name(&self) -> &str {
        FALLBACK_RESOURCE
    }

    fn object_id(&self) -> ObjectId {
        self.objects.type0
    }

    fn measure(&self, text: &str, font_size: f32) -> f32 {
        let Ok(face) = ttf_parser::Face::parse(&self.data, 0) else {
            return 0.0;
        };
        let units: f32 = self
            .shape(text)
            .into_iter()
            .map(|(gid, _)| Self::advance_1000(&face, gid, self.units_per_em))
            .sum();
        units * font_size / 1000.0
    }

    fn encode(&mut self, text: &str) -> Object {
        let glyphs = self.shape(text);
        let Ok(face) = ttf_parser::Face::parse(&self.data, 0) else {
            return Object::String(Vec::new(), StringFormat::Hexadecimal);
        };

        let mut starts: Vec<usize> = glyphs.iter().map(|(_, c)| *c).collect();
        starts.sort_unstable();
        starts.dedup();

        let mut bytes = Vec::with_capacity(glyphs.len() * 2);
        let mut last_cluster = None;
        for (gid, cluster) in glyphs {
            let new_gid = self.remapper.remap(gid);
            if new_gid as usize == self.new_to_old.len() {
                self.new_to_old.push(gid);
            }
            bytes.extend_from_slice(&new_gid.to_be_bytes());

            let cluster_text = if last_cluster == Some(cluster) {
                String::new()
            } else {
                let end = starts
                    .iter()
                    .copied()
                    .find(|s| *s > cluster)
                    .unwrap_or(text.len());
                text.get(cluster..end).unwrap_or_default().to_string()
            };
            last_cluster = Some(cluster);

            let width = Self::advance_1000(&face, gid, self.units_per_em);
            let entry = self.used.entry(new_gid).or_insert(UsedGlyph {
                width,
                text: String::new(),
            });
            if entry.text.is_empty() {
                entry.text = cluster_text;
            }
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// PostScript name from the `name` table, restricted to PDF-safe characters.
fn postscript_name(face: &ttf_parser::Face<'_>) -> String {
    let raw = face
        .names()
        .into_iter()
        .filter(|n| n.name_id == ttf_parser::name_id::POST_SCRIPT_NAME)
        .find_map(|n| n.to_string())
        .unwrap_or_default();
    let name: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if name.is_empty() {
        "FallbackFont".to_string()
    } else {
        name
    }
}

/// Two bytes per CID, big-endian original glyph id.
fn cid_to_gid_map(new_to_old: &[u16]) -> Vec<u8> {
    new_to_old.iter().flat_map(|gid| gid.to_be_bytes()).collect()
}

fn to_unicode_cmap(used: &BTreeMap<u16, UsedGlyph>) -> String {
    let entries: Vec<(u16, &str)> = used
        .iter()
        .filter(|(_, g)| !g.text.is_empty())
        .map(|(gid, g)| (*gid, g.text.as_str()))
        .collect();

    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    // bfchar sections hold at most 100 entries each.
    for chunk in entries.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for (gid, text) in chunk {
            let utf16: String = text
                .encode_utf16()
                .map(|unit| format!("{unit:04X}"))
                .collect();
            let _ = writeln!(cmap, "<{gid:04X}> <{utf16}>");
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Public-domain Tuffy, committed under `tests/fixtures/fonts`.
    pub(crate) const FIXTURE_FONT: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fonts/Tuffy.ttf"));

    pub(crate) fn fixture_font_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fonts/Tuffy.ttf")
    }

    #[test]
    fn absent_candidates_yield_none() {
        let mut doc = Document::with_version("1.7");
        let before = doc.objects.len();
        let font = resolve_fallback_font(
            &mut doc,
            &[PathBuf::from("/nonexistent/a.ttf"), PathBuf::from("/nonexistent/b.ttf")],
        );
        assert!(font.is_none());
        assert_eq!(doc.objects.len(), before);
    }

    #[test]
    fn collections_and_garbage_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let by_ext = dir.path().join("cjk.ttc");
        fs::write(&by_ext, b"whatever").unwrap();
        let by_magic = dir.path().join("disguised.ttf");
        fs::write(&by_magic, b"ttcf\x00\x01\x00\x00\x00\x00\x00\x02").unwrap();
        let garbage = dir.path().join("broken.ttf");
        fs::write(&garbage, b"definitely not a font").unwrap();

        let mut doc = Document::with_version("1.7");
        let font = resolve_fallback_font(&mut doc, &[by_ext, by_magic, garbage]);
        assert!(font.is_none());
        assert!(doc.objects.is_empty());
    }

    #[test]
    fn embed_rejects_collection_bytes() {
        let mut doc = Document::with_version("1.7");
        let err = EmbeddedFont::embed(&mut doc, b"ttcf\x00\x01\x00\x00".to_vec())
            .err()
            .unwrap();
        assert!(matches!(err, FontError::Collection));
    }

    #[test]
    fn first_usable_candidate_wins() {
        let mut doc = Document::with_version("1.7");
        let candidates = [
            PathBuf::from("/nonexistent/x.ttf"),
            fixture_font_path(),
            PathBuf::from("/nonexistent/y.ttf"),
        ];
        let font = resolve_fallback_font(&mut doc, &candidates).unwrap();
        assert!(font.base_font().starts_with("MFRGSB+"));
    }

    #[test]
    fn encode_measure_and_finish() {
        let mut doc = Document::with_version("1.7");
        let mut font = EmbeddedFont::embed(&mut doc, FIXTURE_FONT.to_vec()).unwrap();

        let width = font.measure("Setup", 10.0);
        assert!(width > 0.0);
        assert!(font.measure("Setup guide", 10.0) > width);

        let operand = font.encode("Setup");
        match operand {
            Object::String(bytes, StringFormat::Hexadecimal) => assert_eq!(bytes.len(), 10),
            other => panic!("unexpected operand {other:?}"),
        }

        let type0 = font.object_id();
        font.finish(&mut doc);
        let dict = doc.get_object(type0).unwrap().as_dict().unwrap();
        let descendants = dict.get(b"DescendantFonts").unwrap().as_array().unwrap();
        let cid_id = descendants[0].as_reference().unwrap();
        assert!(doc.get_object(cid_id).is_ok());
    }

    #[test]
    fn to_unicode_lists_used_glyphs() {
        let mut used = BTreeMap::new();
        used.insert(3, UsedGlyph { width: 500.0, text: "목".to_string() });
        used.insert(4, UsedGlyph { width: 500.0, text: String::new() });
        let cmap = to_unicode_cmap(&used);
        assert!(cmap.contains("1 beginbfchar"));
        assert!(cmap.contains("<0003> <BAA9>"));
        assert!(!cmap.contains("<0004>"));
    }
}
