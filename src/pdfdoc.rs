//! Small helpers over the `lopdf` object model used while finalizing the
//! rendered document.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::{Error, Result};

/// Parent chains longer than this are treated as malformed.
const MAX_INHERIT_DEPTH: usize = 16;

/// Used when a page has no readable `/MediaBox` anywhere up its tree.
const LETTER_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Document information written to the trailer's `/Info` dictionary.
#[derive(Debug, Clone, Default)]
pub struct Metadata<'a> {
    pub title: &'a str,
    pub author: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub keywords: &'a [String],
}

/// Encode `text` as a PDF text string: a literal for ASCII, UTF-16BE with a
/// byte-order mark otherwise.
pub fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Decode a PDF text string (UTF-16BE with BOM, else PDFDocEncoding treated
/// as Latin-1).
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|b| *b as char).collect()
}

pub(crate) fn as_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Look up `key` on a page, walking `/Parent` links for inheritable entries.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = current.get(key) {
            return doc.dereference(value).ok().map(|(_, obj)| obj);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
    None
}

/// The page's media box, inherited from the page tree if needed.
pub fn page_media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let Some(Object::Array(arr)) = inherited(doc, page_id, b"MediaBox") else {
        return LETTER_MEDIA_BOX;
    };
    let values: Vec<f32> = arr
        .iter()
        .filter_map(|o| doc.dereference(o).ok().and_then(|(_, v)| as_number(v)))
        .collect();
    match values.as_slice() {
        [x0, y0, x1, y1] => [x0.min(*x1), y0.min(*y1), x0.max(*x1), y0.max(*y1)],
        _ => LETTER_MEDIA_BOX,
    }
}

/// Give the page its own `/Resources` dictionary containing `fonts`
/// (resource name → font object), keeping every inherited resource.
pub fn add_page_fonts(doc: &mut Document, page_id: ObjectId, fonts: &[(&str, ObjectId)]) -> Result<()> {
    let mut resources = match inherited(doc, page_id, b"Resources") {
        Some(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };
    let mut font_dict = match resources.get(b"Font") {
        Ok(obj) => match doc.dereference(obj) {
            Ok((_, Object::Dictionary(dict))) => dict.clone(),
            _ => Dictionary::new(),
        },
        Err(_) => Dictionary::new(),
    };
    for (name, id) in fonts {
        font_dict.set(name.as_bytes().to_vec(), Object::Reference(*id));
    }
    resources.set("Font", Object::Dictionary(font_dict));

    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page.set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Append `stamp` to the page, isolating the existing content in `q … Q`.
pub fn append_isolated_content(doc: &mut Document, page_id: ObjectId, stamp: Vec<u8>) -> Result<()> {
    let existing: Vec<Object> = {
        let page = doc.get_object(page_id)?.as_dict()?;
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => vec![Object::Reference(*id)],
            Ok(Object::Array(arr)) => arr.clone(),
            _ => Vec::new(),
        }
    };

    let mut contents = Vec::with_capacity(existing.len() + 2);
    if existing.is_empty() {
        let stamp_id = doc.add_object(Stream::new(Dictionary::new(), stamp));
        contents.push(Object::Reference(stamp_id));
    } else {
        let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let mut tail = b"\nQ\n".to_vec();
        tail.extend_from_slice(&stamp);
        let stamp_id = doc.add_object(Stream::new(Dictionary::new(), tail));
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
        contents.push(Object::Reference(stamp_id));
    }

    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page.set("Contents", Object::Array(contents));
    Ok(())
}

/// Replace the trailer's `/Info` dictionary.
pub fn set_metadata(doc: &mut Document, meta: &Metadata<'_>) {
    let mut info = Dictionary::new();
    info.set("Title", text_string(meta.title));
    if let Some(author) = meta.author {
        info.set("Author", text_string(author));
    }
    if let Some(subject) = meta.subject {
        info.set("Subject", text_string(subject));
    }
    if !meta.keywords.is_empty() {
        info.set("Keywords", text_string(&meta.keywords.join(", ")));
    }
    let creator = concat!("manual-forge ", env!("CARGO_PKG_VERSION"));
    info.set("Creator", text_string(creator));
    info.set("Producer", text_string(creator));
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", Object::Reference(info_id));
}

/// Serialise the document.
pub fn save_to_vec(doc: &mut Document) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| Error::Pdf(e.into()))?;
    Ok(buffer)
}
