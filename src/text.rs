//! Text decoding with encoding and line-ending detection

use anyhow::{bail, Result};
use glob::Pattern;

use crate::config::SosConfig;
use crate::storage::{compile_globs, matches_any};

/// Detected text encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// UTF-8 with a byte order mark
    Utf8Bom,
    Utf16Le,
    Utf16Be,
    /// Fallback for bytes that are not valid UTF-8
    Latin1,
}

/// Line ending style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eol {
    Lf,
    CrLf,
    Cr,
}

impl Eol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Eol::Lf => "\n",
            Eol::CrLf => "\r\n",
            Eol::Cr => "\r",
        }
    }
}

/// A decoded text file split into lines.
///
/// Content ending with a line break yields a trailing empty line, so joining
/// `lines` with `eol` reproduces the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFile {
    pub encoding: Encoding,
    /// Dominant line ending, `None` for single-line content
    pub eol: Option<Eol>,
    pub lines: Vec<String>,
    /// More than one line ending style was found
    pub mixed_eol: bool,
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

fn decode_utf16(bytes: &[u8], little_endian: bool) -> Result<String> {
    if bytes.len() % 2 != 0 {
        bail!("odd byte count for UTF-16 content");
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    Ok(String::from_utf16(&units)?)
}

/// Detect the encoding and decode `bytes` to a string
pub fn decode_text(bytes: &[u8]) -> Result<(Encoding, String)> {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return Ok((Encoding::Utf8Bom, String::from_utf8(rest.to_vec())?));
    }
    if let Some(rest) = bytes.strip_prefix(UTF16LE_BOM) {
        return Ok((Encoding::Utf16Le, decode_utf16(rest, true)?));
    }
    if let Some(rest) = bytes.strip_prefix(UTF16BE_BOM) {
        return Ok((Encoding::Utf16Be, decode_utf16(rest, false)?));
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok((Encoding::Utf8, text.to_string())),
        Err(_) => Ok((Encoding::Latin1, bytes.iter().map(|&b| b as char).collect())),
    }
}

/// Encode `text` back into `encoding`, failing for characters Latin-1 cannot hold
pub fn encode_text(text: &str, encoding: Encoding) -> Result<Vec<u8>> {
    Ok(match encoding {
        Encoding::Utf8 => text.as_bytes().to_vec(),
        Encoding::Utf8Bom => [UTF8_BOM, text.as_bytes()].concat(),
        Encoding::Utf16Le => UTF16LE_BOM
            .iter()
            .copied()
            .chain(text.encode_utf16().flat_map(u16::to_le_bytes))
            .collect(),
        Encoding::Utf16Be => UTF16BE_BOM
            .iter()
            .copied()
            .chain(text.encode_utf16().flat_map(u16::to_be_bytes))
            .collect(),
        Encoding::Latin1 => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| anyhow::anyhow!("text cannot be represented in Latin-1"))?,
    })
}

/// Count line endings and pick the dominant style; CRLF wins whenever present
pub fn detect_eol(text: &str) -> (Option<Eol>, bool) {
    let bytes = text.as_bytes();
    let (mut lf, mut crlf, mut cr) = (0usize, 0usize, 0usize);
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                crlf += 1;
                i += 1;
            }
            b'\r' => cr += 1,
            b'\n' => lf += 1,
            _ => {}
        }
        i += 1;
    }
    let kinds = [lf, crlf, cr].iter().filter(|&&n| n > 0).count();
    let eol = if crlf > 0 {
        Some(Eol::CrLf)
    } else if lf == 0 && cr == 0 {
        None
    } else if lf >= cr {
        Some(Eol::Lf)
    } else {
        Some(Eol::Cr)
    };
    (eol, kinds > 1)
}

/// Split on any line ending style
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                lines.push(std::mem::take(&mut current));
            }
            '\n' => lines.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    lines.push(current);
    lines
}

impl TextFile {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (encoding, text) = decode_text(bytes)?;
        let (eol, mixed_eol) = detect_eol(&text);
        Ok(TextFile {
            encoding,
            eol,
            lines: split_lines(&text),
            mixed_eol,
        })
    }

    /// Join `lines` with `eol` and encode them like this file
    pub fn encode_lines(&self, lines: &[String], eol: Eol) -> Result<Vec<u8>> {
        encode_text(&lines.join(eol.as_str()), self.encoding)
    }
}

/// Text/binary classification from the configured globs
pub struct FileKinds {
    texttype: Vec<Pattern>,
    bintype: Vec<Pattern>,
}

impl FileKinds {
    pub fn from_config(config: &SosConfig) -> Result<Self> {
        Ok(Self {
            texttype: compile_globs(&config.texttype)?,
            bintype: compile_globs(&config.bintype)?,
        })
    }

    /// Binary if listed in `bintype`; text if listed in `texttype`; else
    /// binary only when the content holds a NUL byte
    pub fn is_text(&self, name: &str, content: &[u8]) -> bool {
        if matches_any(&self.bintype, name) {
            return false;
        }
        if matches_any(&self.texttype, name) {
            return true;
        }
        // UTF-16 text carries NUL bytes by construction
        if content.starts_with(UTF16LE_BOM) || content.starts_with(UTF16BE_BOM) {
            return true;
        }
        !content.contains(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keeps_trailing_empty_line() {
        assert_eq!(split_lines("a\nb\n"), vec!["a", "b", ""]);
        assert_eq!(split_lines("a\r\nb"), vec!["a", "b"]);
        assert_eq!(split_lines("a\rb\r\n\nc"), vec!["a", "b", "", "c"]);
        assert_eq!(split_lines(""), vec![""]);
    }

    #[test]
    fn test_detect_eol() {
        assert_eq!(detect_eol("a\nb\n"), (Some(Eol::Lf), false));
        assert_eq!(detect_eol("a\r\nb\n"), (Some(Eol::CrLf), true));
        assert_eq!(detect_eol("a\rb\rc\nd"), (Some(Eol::Cr), true));
        assert_eq!(detect_eol("single"), (None, false));
    }

    #[test]
    fn test_decode_encodings() -> Result<()> {
        let utf16: Vec<u8> = [0xFF, 0xFE, b'h', 0, b'i', 0, b'\n', 0].to_vec();
        let file = TextFile::decode(&utf16)?;
        assert_eq!(file.encoding, Encoding::Utf16Le);
        assert_eq!(file.lines, vec!["hi", ""]);
        assert_eq!(file.encode_lines(&file.lines, Eol::Lf)?, utf16);

        let latin1 = [b"caf".as_slice(), &[0xE9, b'\n']].concat();
        let file = TextFile::decode(&latin1)?;
        assert_eq!(file.encoding, Encoding::Latin1);
        assert_eq!(file.lines[0], "café");
        assert_eq!(file.encode_lines(&file.lines, Eol::Lf)?, latin1);

        let bom = [UTF8_BOM, "x\r\ny".as_bytes()].concat();
        let file = TextFile::decode(&bom)?;
        assert_eq!(file.encoding, Encoding::Utf8Bom);
        assert_eq!(file.eol, Some(Eol::CrLf));
        assert_eq!(file.encode_lines(&file.lines, Eol::CrLf)?, bom);
        Ok(())
    }

    #[test]
    fn test_broken_utf16_fails() {
        assert!(TextFile::decode(&[0xFF, 0xFE, b'a']).is_err());
    }

    #[test]
    fn test_file_kinds() -> Result<()> {
        let config = SosConfig {
            bintype: vec!["*.dat".into()],
            ..SosConfig::default()
        };
        let kinds = FileKinds::from_config(&config)?;
        assert!(kinds.is_text("readme.md", b"a\0b"));
        assert!(!kinds.is_text("blob.dat", b"plain"));
        assert!(kinds.is_text("main.rs", b"fn main() {}"));
        assert!(!kinds.is_text("image.png", &[0x89, b'P', 0, 0]));
        Ok(())
    }
}
