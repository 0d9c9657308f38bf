//! Character encodings a connection can switch between.
//!
//! Decoding is lossy: bytes that are invalid in the selected charset become
//! U+FFFD. Encoding replaces characters the charset cannot represent with
//! `?`.

use std::fmt;

/// Code points for Windows-1252 bytes 0x80..=0x9F.
const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

const REPLACEMENT_BYTE: u8 = b'?';

/// A negotiable character encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    UsAscii,
    Latin1,
    Windows1252,
}

impl Charset {
    /// Looks up a charset by its MIME label (case-insensitive).
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches('"').to_ascii_lowercase();
        match label.as_str() {
            "utf-8" | "utf8" => Some(Charset::Utf8),
            "us-ascii" | "ascii" => Some(Charset::UsAscii),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Some(Charset::Latin1),
            "windows-1252" | "cp1252" => Some(Charset::Windows1252),
            _ => None,
        }
    }

    /// Canonical MIME name.
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::UsAscii => "US-ASCII",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Windows1252 => "windows-1252",
        }
    }

    /// Decodes raw line bytes into text.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::UsAscii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                .collect(),
            Charset::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Charset::Windows1252 => bytes
                .iter()
                .map(|&b| match b {
                    0x80..=0x9F => WINDOWS_1252_HIGH[(b - 0x80) as usize],
                    _ => b as char,
                })
                .collect(),
        }
    }

    /// Encodes one character into `dst` and returns the encoded bytes.
    pub fn encode_char<'a>(&self, ch: char, dst: &'a mut [u8; 4]) -> &'a [u8] {
        if *self == Charset::Utf8 {
            let len = ch.encode_utf8(dst).len();
            return &dst[..len];
        }
        let byte = match self {
            Charset::UsAscii if ch.is_ascii() => ch as u8,
            Charset::Latin1 if (ch as u32) <= 0xFF => ch as u8,
            Charset::Windows1252 => windows_1252_byte(ch),
            _ => REPLACEMENT_BYTE,
        };
        dst[0] = byte;
        &dst[..1]
    }

    /// Number of bytes `text` occupies on the wire in this charset.
    pub fn encoded_len(&self, text: &str) -> usize {
        match self {
            Charset::Utf8 => text.len(),
            _ => text.chars().count(),
        }
    }
}

fn windows_1252_byte(ch: char) -> u8 {
    let cp = ch as u32;
    if cp < 0x80 || (0xA0..=0xFF).contains(&cp) {
        return cp as u8;
    }
    WINDOWS_1252_HIGH
        .iter()
        .position(|&c| c == ch)
        .map(|i| 0x80 + i as u8)
        .unwrap_or(REPLACEMENT_BYTE)
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(charset: Charset, text: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut scratch = [0u8; 4];
        for ch in text.chars() {
            out.extend_from_slice(charset.encode_char(ch, &mut scratch));
        }
        out
    }

    #[test]
    fn test_from_label() {
        assert_eq!(Charset::from_label("UTF-8"), Some(Charset::Utf8));
        assert_eq!(Charset::from_label("\"iso-8859-1\""), Some(Charset::Latin1));
        assert_eq!(Charset::from_label("CP1252"), Some(Charset::Windows1252));
        assert_eq!(Charset::from_label("koi8-r"), None);
    }

    #[test]
    fn test_latin1_decode() {
        assert_eq!(Charset::Latin1.decode(&[b'C', b'a', b'f', 0xE9]), "Café");
    }

    #[test]
    fn test_windows_1252_decode_high_range() {
        assert_eq!(Charset::Windows1252.decode(&[0x80, 0x93, b'x', 0x94]), "€“x”");
    }

    #[test]
    fn test_utf8_decode_is_lossy() {
        assert_eq!(Charset::Utf8.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_encode_replaces_unrepresentable() {
        assert_eq!(encode(Charset::UsAscii, "né"), b"n?");
        assert_eq!(encode(Charset::Latin1, "né€"), vec![b'n', 0xE9, b'?']);
        assert_eq!(encode(Charset::Windows1252, "€"), vec![0x80]);
        assert_eq!(encode(Charset::Utf8, "é"), "é".as_bytes());
    }

    #[test]
    fn test_encoded_len_counts_wire_bytes() {
        assert_eq!(Charset::Utf8.encoded_len("né"), 3);
        assert_eq!(Charset::Latin1.encoded_len("né"), 2);
        assert_eq!(Charset::UsAscii.encoded_len("né"), 2);
        assert_eq!(Charset::Latin1.encoded_len(""), 0);
    }
}
