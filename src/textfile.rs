// Copyright 2021 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Loading and saving text files without disturbing their encoding.
//!
//! Windows-centric source trees are full of files in assorted encodings:
//! UTF-8 with and without a byte-order mark, UTF-16 in either byte order, and
//! legacy single-byte code pages. We decode on the way in, remember what we
//! saw, and use the same encoding on the way out. Nothing is written unless
//! the bytes actually change.

use std::{
    fmt,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::errors::{PrepError, Result};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

/// The encodings we can detect and reproduce.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextEncoding {
    /// Pure 7-bit ASCII, no byte-order mark.
    Ascii,

    /// UTF-8, with or without a leading byte-order mark.
    Utf8 { bom: bool },

    /// UTF-16, little-endian, with a byte-order mark.
    Utf16Le,

    /// UTF-16, big-endian, with a byte-order mark.
    Utf16Be,

    /// Some single-byte code page. We treat it as ISO-8859-1, which at least
    /// round-trips every byte unchanged.
    Latin1,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TextEncoding::Ascii => f.write_str("ASCII"),
            TextEncoding::Utf8 { bom: false } => f.write_str("UTF-8"),
            TextEncoding::Utf8 { bom: true } => f.write_str("UTF-8 with BOM"),
            TextEncoding::Utf16Le => f.write_str("UTF-16LE"),
            TextEncoding::Utf16Be => f.write_str("UTF-16BE"),
            TextEncoding::Latin1 => f.write_str("single-byte (Latin-1)"),
        }
    }
}

impl TextEncoding {
    /// Guess the encoding of some bytes and decode them.
    pub fn decode(data: &[u8]) -> (TextEncoding, String) {
        if let Some(rest) = data.strip_prefix(UTF8_BOM) {
            return (
                TextEncoding::Utf8 { bom: true },
                String::from_utf8_lossy(rest).into_owned(),
            );
        }

        if let Some(rest) = data.strip_prefix(UTF16LE_BOM) {
            let units: Vec<u16> = rest
                .chunks(2)
                .map(|c| u16::from_le_bytes([c[0], *c.get(1).unwrap_or(&0)]))
                .collect();
            return (TextEncoding::Utf16Le, String::from_utf16_lossy(&units));
        }

        if let Some(rest) = data.strip_prefix(UTF16BE_BOM) {
            let units: Vec<u16> = rest
                .chunks(2)
                .map(|c| u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)]))
                .collect();
            return (TextEncoding::Utf16Be, String::from_utf16_lossy(&units));
        }

        if data.is_ascii() {
            // Can't fail, but there's no need to panic if it somehow did.
            return (TextEncoding::Ascii, String::from_utf8_lossy(data).into_owned());
        }

        match std::str::from_utf8(data) {
            Ok(s) => (TextEncoding::Utf8 { bom: false }, s.to_owned()),
            Err(_) => (
                TextEncoding::Latin1,
                data.iter().map(|b| char::from(*b)).collect(),
            ),
        }
    }

    /// Encode text in this encoding.
    ///
    /// Characters that the encoding can't represent become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),

            TextEncoding::Utf8 { bom } => {
                let mut buf = Vec::with_capacity(text.len() + 3);
                if bom {
                    buf.extend_from_slice(UTF8_BOM);
                }
                buf.extend_from_slice(text.as_bytes());
                buf
            }

            TextEncoding::Utf16Le => {
                let mut buf = UTF16LE_BOM.to_vec();
                for u in text.encode_utf16() {
                    buf.extend_from_slice(&u.to_le_bytes());
                }
                buf
            }

            TextEncoding::Utf16Be => {
                let mut buf = UTF16BE_BOM.to_vec();
                for u in text.encode_utf16() {
                    buf.extend_from_slice(&u.to_be_bytes());
                }
                buf
            }

            TextEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    let n = c as u32;
                    if n <= 0xFF {
                        n as u8
                    } else {
                        b'?'
                    }
                })
                .collect(),
        }
    }

    /// The encoding to use when saving `text` into a file that was originally
    /// in this encoding.
    ///
    /// A file that happened to be pure ASCII is really just UTF-8 without a
    /// BOM for our purposes, so if new content has non-ASCII characters, it
    /// gets upgraded rather than mangled.
    pub fn preserving(self, text: &str) -> TextEncoding {
        if self == TextEncoding::Ascii && !text.is_ascii() {
            TextEncoding::Utf8 { bom: false }
        } else {
            self
        }
    }
}

/// A text file loaded into memory.
#[derive(Clone, Debug)]
pub struct TextFile {
    path: PathBuf,
    raw: Vec<u8>,
    text: String,
    encoding: TextEncoding,
}

impl TextFile {
    /// Load a file and detect its encoding.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TextFile> {
        let path = path.as_ref().to_owned();
        let raw = fs::read(&path).map_err(|e| PrepError::io(&path, e))?;
        let (encoding, text) = TextEncoding::decode(&raw);

        Ok(TextFile {
            path,
            raw,
            text,
            encoding,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Save new content in the file's original encoding.
    ///
    /// Returns whether the file was actually rewritten.
    pub fn save(&self, new_text: &str) -> Result<bool> {
        self.save_as(new_text, self.encoding.preserving(new_text))
    }

    /// Save new content in a specific encoding.
    ///
    /// Returns whether the file was actually rewritten. If the encoded bytes
    /// are identical to what we loaded, the file is left alone.
    pub fn save_as(&self, new_text: &str, encoding: TextEncoding) -> Result<bool> {
        let data = encoding.encode(new_text);

        if data == self.raw {
            return Ok(false);
        }

        write_atomically(&self.path, &data)?;
        Ok(true)
    }
}

/// Replace a file's contents with some bytes, atomically.
pub fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let af = atomicwrites::AtomicFile::new(path, atomicwrites::OverwriteBehavior::AllowOverwrite);

    match af.write(|f| f.write_all(data)) {
        Ok(()) => Ok(()),
        Err(atomicwrites::Error::Internal(e)) | Err(atomicwrites::Error::User(e)) => {
            Err(PrepError::io(path, e).into())
        }
    }
}

/// Write a file in the given encoding, unless it already exists with exactly
/// that content.
///
/// Returns whether anything was written.
pub fn write_if_changed(path: &Path, text: &str, encoding: TextEncoding) -> Result<bool> {
    let data = encoding.encode(text);

    match fs::read(path) {
        Ok(existing) if existing == data => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(PrepError::io(path, e).into()),
    }

    write_atomically(path, &data)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_encodings() {
        assert_eq!(TextEncoding::decode(b"abc").0, TextEncoding::Ascii);
        assert_eq!(
            TextEncoding::decode("h\u{e9}".as_bytes()),
            (TextEncoding::Utf8 { bom: false }, "h\u{e9}".to_owned())
        );
        assert_eq!(
            TextEncoding::decode(b"\xEF\xBB\xBFhi"),
            (TextEncoding::Utf8 { bom: true }, "hi".to_owned())
        );
        assert_eq!(
            TextEncoding::decode(b"\xFF\xFEh\x00i\x00"),
            (TextEncoding::Utf16Le, "hi".to_owned())
        );
        assert_eq!(
            TextEncoding::decode(b"\xFE\xFF\x00h\x00i"),
            (TextEncoding::Utf16Be, "hi".to_owned())
        );
        assert_eq!(
            TextEncoding::decode(b"caf\xE9"),
            (TextEncoding::Latin1, "caf\u{e9}".to_owned())
        );
    }

    #[test]
    fn round_trips_each_encoding() {
        let samples: &[&[u8]] = &[
            b"plain",
            "h\u{e9}llo".as_bytes(),
            b"\xEF\xBB\xBFbom",
            b"\xFF\xFEh\x00\xE9\x00",
            b"\xFE\xFF\x00h\x00\xE9",
            b"caf\xE9",
        ];

        for s in samples {
            let (enc, text) = TextEncoding::decode(s);
            assert_eq!(&enc.encode(&text)[..], *s, "round trip through {}", enc);
        }
    }

    #[test]
    fn ascii_is_lossy_but_preserving_upgrades() {
        assert_eq!(TextEncoding::Ascii.encode("caf\u{e9}"), b"caf?".to_vec());
        assert_eq!(
            TextEncoding::Ascii.preserving("caf\u{e9}"),
            TextEncoding::Utf8 { bom: false }
        );
        assert_eq!(TextEncoding::Ascii.preserving("cafe"), TextEncoding::Ascii);
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.txt");
        fs::write(&p, b"\xEF\xBB\xBFsame").unwrap();

        let tf = TextFile::load(&p).unwrap();
        assert_eq!(tf.text(), "same");
        assert!(!tf.save("same").unwrap());
        assert!(tf.save("different").unwrap());
        assert_eq!(fs::read(&p).unwrap(), b"\xEF\xBB\xBFdifferent".to_vec());
    }

    #[test]
    fn missing_file_is_io_error() {
        let e = TextFile::load("/nonexistent/buildstamp/x.rc").unwrap_err();
        assert!(matches!(e.downcast_ref::<PrepError>(), Some(PrepError::Io { .. })));
    }
}
