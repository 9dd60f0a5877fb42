//! Fonts and text measurement.
//!
//! Two kinds of font take part in a manual build:
//!
//! - the **Latin** font: the standard Helvetica face with WinAnsi encoding.
//!   It is always available and measured with its AFM advance widths.
//! - an optional **fallback** font embedded from a TrueType file for scripts
//!   Helvetica cannot show (see [`crate::fallback`]).
//!
//! Both implement [`FontHandle`], the seam the header/footer compositor draws
//! through.

use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use serde::{Deserialize, Serialize};

/// Resource name of the Latin font inside page resource dictionaries.
pub const LATIN_RESOURCE: &str = "MfLatin";

/// Marker appended to truncated labels.
pub const ELLIPSIS: &str = "\u{2026}";

/// Builtin faces used by the rendering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinFace {
    Helvetica,
    HelveticaBold,
    Courier,
}

/// Helvetica advance widths (1000 units/em) for ASCII 32..=126.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

/// Helvetica advance width of one WinAnsi byte.
fn helvetica_width(byte: u8) -> u16 {
    match byte {
        32..=126 => HELVETICA_ASCII[(byte - 32) as usize],
        0x85 | 0x97 | 0x89 => 1000, // ellipsis, em-dash, per-mille
        0x91 | 0x92 | 0x82 => 222,
        0x93 | 0x94 | 0x84 => 333,
        0x95 => 350,
        0xA0 => 278,
        _ => 556,
    }
}

impl BuiltinFace {
    /// Width of `text` in points at `font_size`, after WinAnsi encoding.
    pub fn measure(self, text: &str, font_size: f32) -> f32 {
        let units: f32 = to_winansi(text)
            .into_iter()
            .map(|b| match self {
                BuiltinFace::Helvetica => helvetica_width(b) as f32,
                // Close enough for line breaking; bold runs ~6 % wider.
                BuiltinFace::HelveticaBold => helvetica_width(b) as f32 * 1.06,
                BuiltinFace::Courier => 600.0,
            })
            .sum();
        units * font_size / 1000.0
    }
}

/// Encode text as WinAnsi (Windows-1252) bytes; unmappable chars become `?`.
pub fn to_winansi(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| match c as u32 {
            0x0020..=0x007E => c as u8,
            0x00A0..=0x00FF => c as u8,
            0x20AC => 0x80,
            0x201A => 0x82,
            0x0192 => 0x83,
            0x201E => 0x84,
            0x2026 => 0x85,
            0x2020 => 0x86,
            0x2021 => 0x87,
            0x2030 => 0x89,
            0x0160 => 0x8A,
            0x2039 => 0x8B,
            0x0152 => 0x8C,
            0x2018 => 0x91,
            0x2019 => 0x92,
            0x201C => 0x93,
            0x201D => 0x94,
            0x2022 => 0x95,
            0x2013 => 0x96,
            0x2014 => 0x97,
            0x2122 => 0x99,
            0x0161 => 0x9A,
            0x203A => 0x9B,
            0x0153 => 0x9C,
            0x0178 => 0x9F,
            0x0009 | 0x000A | 0x000D => b' ',
            _ => b'?',
        })
        .collect()
}

/// A font registered in the document being finalized.
pub trait FontHandle {
    /// Name under which pages refer to the font in `/Resources /Font`.
    fn resource_name(&self) -> &str;

    /// Indirect object of the font dictionary.
    fn object_id(&self) -> ObjectId;

    /// Advance width of `text` in points at `font_size`.
    fn measure(&self, text: &str, font_size: f32) -> f32;

    /// Encode `text` as the string operand of a `Tj` operator, recording any
    /// glyphs the font has to carry.
    fn encode(&mut self, text: &str) -> Object;
}

/// The standard Helvetica face, referenced (not embedded).
#[derive(Debug, Clone)]
pub struct LatinFont {
    id: ObjectId,
}

impl LatinFont {
    /// Add the Helvetica font dictionary to `doc`.
    pub fn register(doc: &mut Document) -> Self {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"Font".to_vec()));
        dict.set("Subtype", Object::Name(b"Type1".to_vec()));
        dict.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
        dict.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
        Self {
            id: doc.add_object(dict),
        }
    }
}

impl FontHandle for LatinFont {
    fn resource_name(&self) -> &str {
        LATIN_RESOURCE
    }

    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn measure(&self, text: &str, font_size: f32) -> f32 {
        BuiltinFace::Helvetica.measure(text, font_size)
    }

    fn encode(&mut self, text: &str) -> Object {
        Object::String(to_winansi(text), StringFormat::Literal)
    }
}

/// Word-wrap text to fit within `max_width` points. Returns a vec of lines.
///
/// Words wider than a whole line are broken at character boundaries.
pub fn wrap_text(text: &str, face: BuiltinFace, font_size: f32, max_width: f32) -> Vec<String> {
    if max_width <= 0.0 || text.is_empty() {
        return vec![text.to_string()];
    }

    let mut lines: Vec<String> = Vec::new();
    // Split on existing newlines first
    for paragraph in text.split('\n') {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut current_line = String::new();
        for word in &words {
            let candidate = if current_line.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current_line, word)
            };
            if face.measure(&candidate, font_size) <= max_width {
                current_line = candidate;
                continue;
            }
            if !current_line.is_empty() {
                lines.push(std::mem::take(&mut current_line));
            }
            if face.measure(word, font_size) <= max_width {
                current_line = word.to_string();
                continue;
            }
            for ch in word.chars() {
                current_line.push(ch);
                if face.measure(&current_line, font_size) > max_width && current_line.chars().count() > 1 {
                    current_line.pop();
                    lines.push(std::mem::take(&mut current_line));
                    current_line.push(ch);
                }
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
