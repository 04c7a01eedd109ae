//! Delimiter and encoding detection for text formats.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Candidate delimiters in tie-break order (ties resolve to the earliest).
const DELIMITERS: [char; 4] = [',', '\t', ';', '|'];

/// How many lines the delimiter sniffer inspects.
const SNIFF_LINES: usize = 10;

/// Detected text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// UTF-8 with a byte-order mark to skip
    Utf8Sig,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    /// Windows-1252 fallback (Latin-1 superset); always decodes, so treat
    /// with low confidence.
    Latin1,
}

impl Encoding {
    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf8Sig => "utf-8-sig",
            Encoding::Utf16Le => "utf-16-le",
            Encoding::Utf16Be => "utf-16-be",
            Encoding::Utf32Le => "utf-32-le",
            Encoding::Utf32Be => "utf-32-be",
            Encoding::Latin1 => "latin-1",
        }
    }

    /// True when the detection could have silently accepted malformed data.
    pub fn low_confidence(&self) -> bool {
        matches!(self, Encoding::Latin1)
    }
}

/// Detect encoding: BOM first, then strict UTF-8 over a sample, then the
/// Latin-1 fallback (which always succeeds).
pub fn detect_encoding(bytes: &[u8]) -> Encoding {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Encoding::Utf8Sig;
    }
    if bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) {
        return Encoding::Utf32Le;
    }
    if bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
        return Encoding::Utf32Be;
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return Encoding::Utf16Le;
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return Encoding::Utf16Be;
    }
    let sample = &bytes[..bytes.len().min(8192)];
    if utf8_prefix_valid(sample) {
        return Encoding::Utf8;
    }
    Encoding::Latin1
}

/// Validate a sample as UTF-8, tolerating a multi-byte sequence cut off at
/// the sample boundary.
fn utf8_prefix_valid(sample: &[u8]) -> bool {
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && e.valid_up_to() + 4 > sample.len(),
    }
}

/// Decode bytes to text per the detected encoding. Latin-1 and the UTF-16
/// variants decode lossily (the fallback is what makes CSV reads total).
pub fn decode_text(bytes: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Encoding::Utf8Sig => String::from_utf8_lossy(&bytes[3.min(bytes.len())..]).into_owned(),
        Encoding::Utf16Le => {
            let (text, _, _) = encoding_rs::UTF_16LE.decode(bytes);
            strip_bom(text.into_owned())
        }
        Encoding::Utf16Be => {
            let (text, _, _) = encoding_rs::UTF_16BE.decode(bytes);
            strip_bom(text.into_owned())
        }
        // encoding_rs has no UTF-32 decoder; decode manually.
        Encoding::Utf32Le => decode_utf32(bytes, true),
        Encoding::Utf32Be => decode_utf32(bytes, false),
        Encoding::Latin1 => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

/// Strict decode used by validation: reports the first undecodable offset
/// instead of substituting replacement characters.
pub fn decode_text_strict(bytes: &[u8], encoding: Encoding) -> Result<String, usize> {
    match encoding {
        Encoding::Utf8 | Encoding::Utf8Sig => {
            let start = if encoding == Encoding::Utf8Sig { 3 } else { 0 };
            let body = &bytes[start.min(bytes.len())..];
            std::str::from_utf8(body)
                .map(|s| s.to_string())
                .map_err(|e| start + e.valid_up_to())
        }
        other => Ok(decode_text(bytes, other)),
    }
}

fn strip_bom(mut text: String) -> String {
    if text.starts_with('\u{feff}') {
        text.remove(0);
    }
    text
}

fn decode_utf32(bytes: &[u8], little_endian: bool) -> String {
    let mut out = String::new();
    for chunk in bytes.chunks_exact(4).skip(1) {
        let code = if little_endian {
            u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        } else {
            u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        };
        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
    }
    out
}

/// Detect the delimiter by counting candidate occurrences across the first
/// few lines; the highest count wins, ties resolve to the comma.
pub fn detect_delimiter(text: &str) -> char {
    let mut counts = [0usize; DELIMITERS.len()];
    for line in text.lines().take(SNIFF_LINES) {
        for (i, d) in DELIMITERS.iter().enumerate() {
            counts[i] += line.matches(*d).count();
        }
    }
    let max = counts.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return ',';
    }
    for (i, count) in counts.iter().enumerate() {
        if *count == max {
            return DELIMITERS[i];
        }
    }
    ','
}

/// Read up to `limit` bytes from the head of a file.
pub fn read_head(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; limit];
    let mut read = 0;
    loop {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
        if read == buf.len() {
            break;
        }
    }
    buf.truncate(read);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_delimiter_comma_default() {
        assert_eq!(detect_delimiter("plainline\nanother"), ',');
    }

    #[test]
    fn test_detect_delimiter_tab() {
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
    }

    #[test]
    fn test_detect_delimiter_tie_prefers_comma() {
        // One comma and one semicolon per line: earliest candidate wins.
        assert_eq!(detect_delimiter("a,b;c\n1,2;3"), ',');
    }

    #[test]
    fn test_detect_delimiter_pipe() {
        assert_eq!(detect_delimiter("x|y|z\n1|2|3"), '|');
    }

    #[test]
    fn test_detect_encoding_boms() {
        assert_eq!(detect_encoding(b"\xEF\xBB\xBFa,b"), Encoding::Utf8Sig);
        assert_eq!(detect_encoding(b"\xFF\xFEa\x00"), Encoding::Utf16Le);
        assert_eq!(detect_encoding(b"\xFE\xFF\x00a"), Encoding::Utf16Be);
        assert_eq!(
            detect_encoding(b"\xFF\xFE\x00\x00a\x00\x00\x00"),
            Encoding::Utf32Le
        );
    }

    #[test]
    fn test_detect_encoding_utf8_then_latin1() {
        assert_eq!(detect_encoding("héllo,wörld".as_bytes()), Encoding::Utf8);
        // 0xE9 alone is not valid UTF-8: falls back to Latin-1.
        assert_eq!(detect_encoding(b"caf\xE9,x"), Encoding::Latin1);
    }

    #[test]
    fn test_decode_latin1() {
        let text = decode_text(b"caf\xE9", Encoding::Latin1);
        assert_eq!(text, "café");
    }

    #[test]
    fn test_decode_utf16le_roundtrip() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "a,b".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_text(&bytes, Encoding::Utf16Le), "a,b");
    }

    #[test]
    fn test_strict_decode_reports_offset() {
        let err = decode_text_strict(b"ok\xFFrest", Encoding::Utf8).unwrap_err();
        assert_eq!(err, 2);
    }
}
