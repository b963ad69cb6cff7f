use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use miette::{miette, IntoDiagnostic, LabeledSpan, Result, Severity};

use crate::symbol::Span;

/// On-disk representation of a program image.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImageFormat {
    /// Raw bytes, `.lbc`
    Binary,
    /// Two hex digits per byte, `.hex`
    HexText,
}

impl ImageFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "lbc" | "bin" => Some(ImageFormat::Binary),
            "hex" => Some(ImageFormat::HexText),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Binary => "lbc",
            ImageFormat::HexText => "hex",
        }
    }
}

/// Read a program image in the given format.
pub fn load(path: &Path, format: ImageFormat) -> Result<Vec<u8>> {
    match format {
        ImageFormat::Binary => fs::read(path).into_diagnostic(),
        ImageFormat::HexText => parse_hex(&fs::read_to_string(path).into_diagnostic()?),
    }
}

/// Parse hex text. Bytes are digit pairs, optionally separated by whitespace. A blank line
/// ends the image.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut offs = 0;
    for line in text.split_inclusive('\n') {
        let start = offs;
        offs += line.len();
        if line.trim().is_empty() {
            if bytes.is_empty() {
                continue;
            }
            break;
        }
        for (word_offs, word) in split_words(line) {
            let span = Span::new(start + word_offs, word.len());
            if word.len() % 2 != 0 {
                return Err(miette!(
                    severity = Severity::Error,
                    code = "load::hex_odd",
                    help = "every byte is written as exactly two hex digits",
                    labels = vec![LabeledSpan::at(span, "odd number of digits")],
                    "Malformed hex image",
                )
                .with_source_code(text.to_owned()));
            }
            for pair in word.as_bytes().chunks_exact(2) {
                let byte = std::str::from_utf8(pair)
                    .ok()
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| {
                        miette!(
                            severity = Severity::Error,
                            code = "load::hex_digit",
                            help = "only 0-9, a-f and A-F are allowed",
                            labels = vec![LabeledSpan::at(span, "invalid hex digit")],
                            "Malformed hex image",
                        )
                        .with_source_code(text.to_owned())
                    })?;
                bytes.push(byte);
            }
        }
    }
    Ok(bytes)
}

/// Whitespace separated words with their byte offset in `line`.
fn split_words(line: &str) -> impl Iterator<Item = (usize, &str)> {
    line.split(char::is_whitespace)
        .scan(0, |offs, word| {
            let at = *offs;
            *offs += word.len() + 1;
            Some((at, word))
        })
        .filter(|(_, word)| !word.is_empty())
}

/// One byte per line, lowercase.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        let _ = writeln!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_byte_per_line() {
        assert_eq!(parse_hex("02\n00\n05\nfe\n").unwrap(), [0x02, 0x00, 0x05, 0xfe]);
        assert_eq!(to_hex(&[0x02, 0xfe]), "02\nfe\n");
    }

    #[test]
    fn contiguous_pairs() {
        assert_eq!(parse_hex("0200050010\n").unwrap(), [0x02, 0x00, 0x05, 0x00, 0x10]);
        assert_eq!(parse_hex("02 00\tFE").unwrap(), [0x02, 0x00, 0xfe]);
    }

    #[test]
    fn blank_line_ends_image() {
        assert_eq!(parse_hex("\n01\n\n02\n").unwrap(), [0x01]);
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_digits() {
        assert!(parse_hex("0g\n").is_err());
        assert!(parse_hex("012\n").is_err());
    }

    #[test]
    fn to_hex_parses_back() {
        let image: Vec<u8> = (0..=255).collect();
        assert_eq!(parse_hex(&to_hex(&image)).unwrap(), image);
    }

    #[test]
    fn formats_by_extension() {
        assert_eq!(
            ImageFormat::from_path(Path::new("a.lbc")),
            Some(ImageFormat::Binary)
        );
        assert_eq!(
            ImageFormat::from_path(Path::new("dir/a.hex")),
            Some(ImageFormat::HexText)
        );
        assert_eq!(ImageFormat::from_path(Path::new("a.lasm")), None);
        assert_eq!(ImageFormat::from_path(Path::new("noext")), None);
    }
}
