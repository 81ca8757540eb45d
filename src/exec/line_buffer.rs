// src/exec/line_buffer.rs

//! Incremental byte-to-line decoder for child process output.
//!
//! Bytes arrive in arbitrary chunks; complete lines are decoded and handed out
//! exactly once. `\n` and `\r` are both line terminators and runs of them are
//! collapsed, so empty lines are never produced.

use std::borrow::Cow;
use std::str::FromStr;

use encoding_rs::Encoding;

/// Text encoding of a child's output stream, fixed when the buffer is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// UTF-16 little endian, as emitted by some Windows tools.
    Utf16,
    /// The "ANSI" (GUI) code page.
    Ansi,
    /// The "OEM" (console) code page.
    Oem,
    /// Try UTF-8, fall back to the ANSI code page for invalid lines.
    Unknown,
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(TextEncoding::Utf8),
            "utf16" | "utf-16" | "utf-16le" => Ok(TextEncoding::Utf16),
            "ansi" => Ok(TextEncoding::Ansi),
            "oem" => Ok(TextEncoding::Oem),
            "unknown" => Ok(TextEncoding::Unknown),
            other => Err(format!(
                "unknown encoding '{other}' (expected utf8, utf16, ansi, oem or unknown)"
            )),
        }
    }
}

/// Legacy code pages used for [`TextEncoding::Ansi`] and [`TextEncoding::Oem`].
#[derive(Debug, Clone, Copy)]
pub struct Codepages {
    pub ansi: &'static Encoding,
    pub oem: &'static Encoding,
}

impl Default for Codepages {
    fn default() -> Self {
        Self {
            ansi: encoding_rs::WINDOWS_1252,
            oem: encoding_rs::WINDOWS_1252,
        }
    }
}

impl Codepages {
    /// Resolve code pages from labels such as `"windows-1252"` or `"ibm866"`.
    pub fn from_labels(ansi: &str, oem: &str) -> Option<Self> {
        Some(Self {
            ansi: Encoding::for_label(ansi.trim().as_bytes())?,
            oem: Encoding::for_label(oem.trim().as_bytes())?,
        })
    }
}

/// Append-only byte accumulator with a cursor at the last consumed offset.
#[derive(Debug)]
pub struct LineBuffer {
    bytes: Vec<u8>,
    cursor: usize,
    encoding: TextEncoding,
    codepages: Codepages,
}

impl LineBuffer {
    pub fn new(encoding: TextEncoding) -> Self {
        Self::with_codepages(encoding, Codepages::default())
    }

    pub fn with_codepages(encoding: TextEncoding, codepages: Codepages) -> Self {
        Self {
            bytes: Vec::new(),
            cursor: 0,
            encoding,
            codepages,
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Copy raw bytes into the buffer.
    pub fn append(&mut self, data: &[u8]) {
        if self.cursor > 0 {
            // Consumed bytes are never looked at again.
            self.bytes.drain(..self.cursor);
            self.cursor = 0;
        }
        self.bytes.extend_from_slice(data);
    }

    /// Number of bytes not yet emitted as part of a line.
    pub fn pending(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    /// Lazily yield every complete line currently in the buffer.
    ///
    /// With `finished == true` the trailing bytes after the last terminator
    /// are emitted as a final line; otherwise they stay buffered until more
    /// data arrives. Dropping the iterator early keeps the remaining lines for
    /// the next call.
    pub fn next_lines(&mut self, finished: bool) -> Lines<'_> {
        Lines {
            buffer: self,
            finished,
            exhausted: false,
        }
    }

    fn unit(&self) -> usize {
        match self.encoding {
            TextEncoding::Utf16 => 2,
            _ => 1,
        }
    }

    fn is_newline_at(&self, offset: usize) -> bool {
        match self.encoding {
            TextEncoding::Utf16 => {
                let unit = u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]]);
                unit == 0x0a || unit == 0x0d
            }
            _ => matches!(self.bytes[offset], b'\n' | b'\r'),
        }
    }

    fn find_newline(&self, from: usize) -> Option<usize> {
        let unit = self.unit();
        let mut offset = from;
        while offset + unit <= self.bytes.len() {
            if self.is_newline_at(offset) {
                return Some(offset);
            }
            offset += unit;
        }
        None
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let text: Cow<'_, str> = match self.encoding {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes),
            TextEncoding::Utf16 => encoding_rs::UTF_16LE.decode_without_bom_handling(bytes).0,
            TextEncoding::Ansi => self.codepages.ansi.decode_without_bom_handling(bytes).0,
            TextEncoding::Oem => self.codepages.oem.decode_without_bom_handling(bytes).0,
            TextEncoding::Unknown => match std::str::from_utf8(bytes) {
                Ok(s) => Cow::Borrowed(s),
                Err(_) => self.codepages.ansi.decode_without_bom_handling(bytes).0,
            },
        };
        text.into_owned()
    }
}

/// Iterator returned by [`LineBuffer::next_lines`].
pub struct Lines<'a> {
    buffer: &'a mut LineBuffer,
    finished: bool,
    exhausted: bool,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.exhausted {
            return None;
        }

        let unit = self.buffer.unit();
        loop {
            let len = self.buffer.bytes.len();
            let mut start = self.buffer.cursor;
            while start + unit <= len && self.buffer.is_newline_at(start) {
                start += unit;
            }
            self.buffer.cursor = start;

            match self.buffer.find_newline(start) {
                Some(end) => {
                    let line = self.buffer.decode(&self.buffer.bytes[start..end]);
                    self.buffer.cursor = end + unit;
                    if !line.is_empty() {
                        return Some(line);
                    }
                }
                None => {
                    self.exhausted = true;
                    if !self.finished {
                        return None;
                    }
                    // A dangling half code unit can never be decoded.
                    let end = len - (len - start) % unit;
                    let line = self.buffer.decode(&self.buffer.bytes[start..end]);
                    self.buffer.cursor = len;
                    return (!line.is_empty()).then_some(line);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(buffer: &mut LineBuffer, finished: bool) -> Vec<String> {
        buffer.next_lines(finished).collect()
    }

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn holds_back_partial_line_until_finished() {
        let mut buffer = LineBuffer::new(TextEncoding::Utf8);
        buffer.append(b"line1\nline2\npart");
        assert_eq!(collect(&mut buffer, false), vec!["line1", "line2"]);
        assert_eq!(buffer.pending(), 4);

        buffer.append(b"ial");
        assert!(collect(&mut buffer, false).is_empty());
        assert_eq!(collect(&mut buffer, true), vec!["partial"]);
        assert_eq!(buffer.pending(), 0);
        assert!(collect(&mut buffer, true).is_empty());
    }

    #[test]
    fn collapses_mixed_terminators() {
        let mut buffer = LineBuffer::new(TextEncoding::Utf8);
        buffer.append(b"\r\n\r\na\r\n\n\rb\r\r\n");
        assert_eq!(collect(&mut buffer, true), vec!["a", "b"]);
    }

    #[test]
    fn only_newlines_yield_nothing() {
        let mut buffer = LineBuffer::new(TextEncoding::Utf8);
        buffer.append(b"\n\r\n\n");
        assert!(collect(&mut buffer, true).is_empty());
    }

    #[test]
    fn early_drop_keeps_remaining_lines() {
        let mut buffer = LineBuffer::new(TextEncoding::Utf8);
        buffer.append(b"a\nb\nc\n");
        assert_eq!(buffer.next_lines(false).next().as_deref(), Some("a"));
        assert_eq!(collect(&mut buffer, false), vec!["b", "c"]);
    }

    #[test]
    fn utf8_sequence_split_across_chunks() {
        let bytes = "héllo\n".as_bytes();
        let mut buffer = LineBuffer::new(TextEncoding::Utf8);
        buffer.append(&bytes[..2]);
        assert!(collect(&mut buffer, false).is_empty());
        buffer.append(&bytes[2..]);
        assert_eq!(collect(&mut buffer, false), vec!["héllo"]);
    }

    #[test]
    fn utf16_ignores_dangling_byte_until_more_data() {
        let bytes = utf16("ab\ncd");
        let mut buffer = LineBuffer::new(TextEncoding::Utf16);
        buffer.append(&bytes[..7]);
        assert_eq!(collect(&mut buffer, false), vec!["ab"]);
        buffer.append(&bytes[7..]);
        assert_eq!(collect(&mut buffer, true), vec!["cd"]);
    }

    #[test]
    fn utf16_newline_needs_whole_code_unit() {
        // U+0A0D is a single code unit whose bytes look like "\r\n".
        let mut bytes = utf16("\u{0a0d}x");
        bytes.extend(utf16("\n"));
        let mut buffer = LineBuffer::new(TextEncoding::Utf16);
        buffer.append(&bytes);
        assert_eq!(collect(&mut buffer, false), vec!["\u{0a0d}x"]);
    }

    #[test]
    fn ansi_and_unknown_use_codepage() {
        let mut buffer = LineBuffer::new(TextEncoding::Ansi);
        buffer.append(b"caf\xe9\n");
        assert_eq!(collect(&mut buffer, false), vec!["café"]);

        let mut buffer = LineBuffer::new(TextEncoding::Unknown);
        buffer.append("naïve\n".as_bytes());
        buffer.append(b"na\xefve\n");
        assert_eq!(collect(&mut buffer, false), vec!["naïve", "naïve"]);
    }

    #[test]
    fn codepage_labels_resolve() {
        let pages = Codepages::from_labels("windows-1251", "ibm866").unwrap();
        assert_eq!(pages.ansi.name(), "windows-1251");
        assert_eq!(pages.oem.name(), "IBM866");
        assert!(Codepages::from_labels("nope", "ibm866").is_none());
    }
}
