//! Incremental yEnc stream decoder
//!
//! yEnc is the standard encoding for binary data on Usenet. The decoder here
//! is fed line-by-line as the article body arrives from the NNTP connection,
//! so decoded bytes can be written to disk (or seeked into the shared output
//! file in direct-write mode) without buffering the whole article.
//!
//! # Format
//!
//! ```text
//! =ybegin part=1 line=128 size=123456 name=filename.ext
//! =ypart begin=1 end=64000
//! <encoded binary data>
//! =yend size=64000 part=1 pcrc32=ABCD1234
//! ```
//!
//! Encoding rules: each byte is `(byte + 42) % 256`; the escape character is
//! `=` and escaped bytes are stored as `=` followed by `(encoded + 64) % 256`.
//! A running CRC-32 (polynomial 0xEDB88320, init 0xFFFFFFFF, final XOR
//! 0xFFFFFFFF) over the decoded bytes is compared against the trailer's
//! `pcrc32`.
//!
//! Dot-unstuffing is the NNTP layer's job; the decoder never sees stuffed
//! dots.

use crc32fast::Hasher;

/// Terminal outcome of decoding one article body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// Body complete and CRC (when announced) matched
    Finished,
    /// Body complete but the calculated CRC differs from `pcrc32`
    CrcError {
        /// CRC announced in the `=yend` trailer
        expected: u32,
        /// CRC calculated over the emitted bytes
        calculated: u32,
    },
    /// Stream ended before the `=yend` trailer (or the part is short)
    ArticleIncomplete,
    /// The stream never looked like yEnc
    InvalidData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for `=ybegin`
    AwaitingHeader,
    /// `=ybegin part=N` seen, waiting for `=ypart`
    AwaitingPartHeader,
    /// Decoding body lines
    Body,
    /// `=yend` seen, nothing more expected
    Trailer,
}

/// Incremental yEnc decoder.
///
/// Feed raw body lines (without their line terminator) to [`feed_line`],
/// collect emitted bytes, and call [`finish`] after the terminating dot line.
///
/// [`feed_line`]: YencDecoder::feed_line
/// [`finish`]: YencDecoder::finish
#[derive(Debug)]
pub struct YencDecoder {
    state: State,
    filename: Option<String>,
    file_size: u64,
    part_number: Option<u32>,
    part_begin: Option<u64>,
    part_end: Option<u64>,
    trailer_size: Option<u64>,
    expected_crc: Option<u32>,
    hasher: Hasher,
    emitted: u64,
    // escape can sit at the end of a line; carry it into the next one
    pending_escape: bool,
}

impl Default for YencDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl YencDecoder {
    /// Create a decoder awaiting the `=ybegin` header.
    pub fn new() -> Self {
        Self {
            state: State::AwaitingHeader,
            filename: None,
            file_size: 0,
            part_number: None,
            part_begin: None,
            part_end: None,
            trailer_size: None,
            expected_crc: None,
            hasher: Hasher::new(),
            emitted: 0,
            pending_escape: false,
        }
    }

    /// Filename announced by the `=ybegin` header, once seen.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Total file size announced by the `=ybegin` header.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Part number announced by the `=ybegin` header.
    pub fn part_number(&self) -> Option<u32> {
        self.part_number
    }

    /// Zero-based output offset for direct-write mode (`=ypart begin` is
    /// 1-based). Single-part articles write at offset 0.
    pub fn write_offset(&self) -> u64 {
        self.part_begin.map(|b| b.saturating_sub(1)).unwrap_or(0)
    }

    /// Number of decoded bytes emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Whether the `=yend` trailer has been seen.
    pub fn saw_trailer(&self) -> bool {
        self.state == State::Trailer
    }

    /// Feed one body line (without terminator); decoded bytes are appended to
    /// `out`. Header and trailer lines emit nothing.
    pub fn feed_line(&mut self, line: &[u8], out: &mut Vec<u8>) {
        match self.state {
            State::AwaitingHeader => {
                if line.starts_with(b"=ybegin ") {
                    self.parse_ybegin(line);
                    self.state = if self.part_number.is_some() {
                        State::AwaitingPartHeader
                    } else {
                        State::Body
                    };
                }
                // anything before =ybegin (headers, empty lines) is skipped
            }
            State::AwaitingPartHeader => {
                if line.starts_with(b"=ypart ") {
                    self.parse_ypart(line);
                    self.state = State::Body;
                } else if line.starts_with(b"=yend ") {
                    // malformed: part announced but no =ypart; accept anyway
                    self.parse_yend(line);
                    self.state = State::Trailer;
                } else {
                    // tolerate a missing =ypart and treat the line as body
                    self.state = State::Body;
                    self.decode_body_line(line, out);
                }
            }
            State::Body => {
                if line.starts_with(b"=yend ") {
                    self.parse_yend(line);
                    self.state = State::Trailer;
                } else {
                    self.decode_body_line(line, out);
                }
            }
            State::Trailer => {
                // data after =yend is ignored
            }
        }
    }

    /// Finalize after the article body ended and report the outcome.
    pub fn finish(self) -> DecodeResult {
        if self.state == State::AwaitingHeader {
            return DecodeResult::InvalidData;
        }
        if self.state != State::Trailer {
            return DecodeResult::ArticleIncomplete;
        }
        if let (Some(begin), Some(end)) = (self.part_begin, self.part_end) {
            let expected_len = end.saturating_sub(begin) + 1;
            if self.emitted != expected_len {
                return DecodeResult::ArticleIncomplete;
            }
        } else if let Some(size) = self.trailer_size
            && self.emitted != size
        {
            return DecodeResult::ArticleIncomplete;
        }
        let calculated = self.hasher.finalize();
        match self.expected_crc {
            Some(expected) if expected != calculated => DecodeResult::CrcError {
                expected,
                calculated,
            },
            _ => DecodeResult::Finished,
        }
    }

    fn decode_body_line(&mut self, line: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        for &byte in line {
            if self.pending_escape {
                out.push(byte.wrapping_sub(64).wrapping_sub(42));
                self.pending_escape = false;
            } else {
                match byte {
                    b'=' => self.pending_escape = true,
                    // whitespace and stray terminators are dropped
                    b'\r' | b'\n' => {}
                    _ => out.push(byte.wrapping_sub(42)),
                }
            }
        }
        let emitted = &out[start..];
        self.hasher.update(emitted);
        self.emitted += emitted.len() as u64;
    }

    fn parse_ybegin(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        // name= is last and may contain spaces; split it off first
        if let Some(pos) = text.find("name=") {
            let name = text[pos + 5..].trim_end();
            if !name.is_empty() {
                self.filename = Some(name.to_string());
            }
        }
        for token in text.split_whitespace().skip(1) {
            if let Some((key, value)) = token.split_once('=') {
                match key {
                    "size" => self.file_size = value.parse().unwrap_or(0),
                    "part" => self.part_number = value.parse().ok(),
                    _ => {}
                }
            }
        }
    }

    fn parse_ypart(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        for token in text.split_whitespace().skip(1) {
            if let Some((key, value)) = token.split_once('=') {
                match key {
                    "begin" => self.part_begin = value.parse().ok(),
                    "end" => self.part_end = value.parse().ok(),
                    _ => {}
                }
            }
        }
    }

    fn parse_yend(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        for token in text.split_whitespace().skip(1) {
            if let Some((key, value)) = token.split_once('=') {
                match key {
                    "size" => self.trailer_size = value.parse().ok(),
                    "pcrc32" | "crc32" => {
                        // pcrc32 wins if both appear; crc32 covers single-part posts
                        let parsed = u32::from_str_radix(value.trim(), 16).ok();
                        if key == "pcrc32" || self.expected_crc.is_none() {
                            self.expected_crc = parsed;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Encode `data` as one yEnc article body (used by tests and mock servers).
/// Lines are raw bytes: yEnc output is not valid UTF-8 in general.
///
/// `part` and `begin` describe the slice's position within a `total_size`
/// file; pass `None` for single-part posts.
pub fn encode(
    data: &[u8],
    filename: &str,
    total_size: u64,
    part: Option<(u32, u64)>,
    line_length: usize,
) -> Vec<Vec<u8>> {
    let mut lines: Vec<Vec<u8>> = Vec::new();
    match part {
        Some((number, begin)) => {
            lines.push(
                format!(
                    "=ybegin part={} line={} size={} name={}",
                    number, line_length, total_size, filename
                )
                .into_bytes(),
            );
            lines.push(
                format!("=ypart begin={} end={}", begin, begin + data.len() as u64 - 1)
                    .into_bytes(),
            );
        }
        None => {
            lines.push(
                format!(
                    "=ybegin line={} size={} name={}",
                    line_length, total_size, filename
                )
                .into_bytes(),
            );
        }
    }

    let mut current = Vec::with_capacity(line_length + 2);
    for &byte in data {
        let encoded = byte.wrapping_add(42);
        // NUL, LF, CR, '=' and a leading '.'/TAB/space would be fragile on the wire
        let needs_escape = matches!(encoded, 0x00 | 0x0A | 0x0D | 0x3D)
            || (current.is_empty() && matches!(encoded, b'.' | b'\t' | b' '));
        if needs_escape {
            current.push(b'=');
            current.push(encoded.wrapping_add(64));
        } else {
            current.push(encoded);
        }
        if current.len() >= line_length {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    let crc = crc32fast::hash(data);
    match part {
        Some((number, _)) => lines.push(
            format!(
                "=yend size={} part={} pcrc32={:08x}",
                data.len(),
                number,
                crc
            )
            .into_bytes(),
        ),
        None => lines.push(format!("=yend size={} crc32={:08x}", data.len(), crc).into_bytes()),
    }
    lines
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn decode_lines(lines: &[Vec<u8>]) -> (Vec<u8>, DecodeResult, YencMeta) {
        let mut decoder = YencDecoder::new();
        let mut out = Vec::new();
        for line in lines {
            decoder.feed_line(line, &mut out);
        }
        let meta = YencMeta {
            filename: decoder.filename().map(|s| s.to_string()),
            offset: decoder.write_offset(),
            file_size: decoder.file_size(),
        };
        (out, decoder.finish(), meta)
    }

    struct YencMeta {
        filename: Option<String>,
        offset: u64,
        file_size: u64,
    }

    #[test]
    fn single_part_round_trip_finishes_with_matching_crc() {
        let payload = b"The quick brown fox jumps over the lazy dog".to_vec();
        let lines = encode(&payload, "fox.txt", payload.len() as u64, None, 128);
        let (decoded, result, meta) = decode_lines(&lines);

        assert_eq!(decoded, payload, "decoded bytes must equal the input");
        assert_eq!(result, DecodeResult::Finished);
        assert_eq!(meta.filename.as_deref(), Some("fox.txt"));
        assert_eq!(meta.offset, 0, "single-part articles write at offset 0");
    }

    #[test]
    fn multi_part_reports_one_based_begin_as_zero_based_offset() {
        let payload: Vec<u8> = (0..200u16).map(|v| (v % 251) as u8).collect();
        let lines = encode(&payload, "big.bin", 10_000, Some((3, 501)), 128);
        let (decoded, result, meta) = decode_lines(&lines);

        assert_eq!(decoded, payload);
        assert_eq!(result, DecodeResult::Finished);
        assert_eq!(meta.offset, 500, "=ypart begin=501 means byte offset 500");
        assert_eq!(meta.file_size, 10_000);
    }

    #[test]
    fn every_byte_value_survives_the_round_trip() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let lines = encode(&payload, "all.bin", 256, None, 64);
        let (decoded, result, _) = decode_lines(&lines);
        assert_eq!(decoded, payload, "all 256 byte values must round-trip");
        assert_eq!(result, DecodeResult::Finished);
    }

    #[test]
    fn corrupting_one_byte_yields_crc_error() {
        let payload = b"integrity matters".to_vec();
        let mut lines = encode(&payload, "c.bin", payload.len() as u64, None, 128);
        // flip a safe character in the first body line
        let mut mutated = lines[1].clone();
        for b in mutated.iter_mut() {
            if *b != b'=' && *b != b'.' {
                *b = b.wrapping_add(1);
                if *b == b'=' || *b == b'\r' || *b == b'\n' {
                    *b = b.wrapping_add(1);
                }
                break;
            }
        }
        lines[1] = mutated;

        let (_, result, _) = decode_lines(&lines);
        match result {
            DecodeResult::CrcError { expected, calculated } => {
                assert_ne!(expected, calculated);
            }
            other => panic!("expected CrcError, got {other:?}"),
        }
    }

    #[test]
    fn missing_trailer_is_article_incomplete() {
        let payload = b"cut off".to_vec();
        let mut lines = encode(&payload, "x.bin", payload.len() as u64, None, 128);
        lines.pop(); // drop =yend
        let (_, result, _) = decode_lines(&lines);
        assert_eq!(result, DecodeResult::ArticleIncomplete);
    }

    #[test]
    fn short_part_is_article_incomplete() {
        // trailer claims more bytes than the body carries
        let lines: Vec<Vec<u8>> = vec![
            b"=ybegin part=1 line=128 size=1000 name=s.bin".to_vec(),
            b"=ypart begin=1 end=100".to_vec(),
            vec![b'A'; 50],
            b"=yend size=100 part=1 pcrc32=00000000".to_vec(),
        ];
        let (_, result, _) = decode_lines(&lines);
        assert_eq!(result, DecodeResult::ArticleIncomplete);
    }

    #[test]
    fn non_yenc_stream_is_invalid_data() {
        let lines: Vec<Vec<u8>> = vec![
            b"this is just text".to_vec(),
            b"no yenc markers anywhere".to_vec(),
        ];
        let (out, result, _) = decode_lines(&lines);
        assert!(out.is_empty(), "nothing should be emitted before =ybegin");
        assert_eq!(result, DecodeResult::InvalidData);
    }

    #[test]
    fn escape_at_line_end_carries_into_next_line() {
        // '=' as the very last byte of a line escapes the first byte of the next
        let mut decoder = YencDecoder::new();
        let mut out = Vec::new();
        decoder.feed_line(b"=ybegin line=128 size=2 name=e.bin", &mut out);
        decoder.feed_line(b"r=", &mut out);
        // 't' - 64 - 42 = 10 (newline byte)
        decoder.feed_line(b"t", &mut out);
        decoder.feed_line(b"=yend size=2 crc32=ffffffff", &mut out);
        assert_eq!(out, vec![b'r'.wrapping_sub(42), 10]);
    }

    #[test]
    fn filename_with_spaces_is_kept_whole() {
        let payload = b"x".to_vec();
        let lines = encode(&payload, "my file name.bin", 1, None, 128);
        let (_, _, meta) = decode_lines(&lines);
        assert_eq!(meta.filename.as_deref(), Some("my file name.bin"));
    }

    #[test]
    fn crc_polynomial_matches_reference_value() {
        // "123456789" is the canonical CRC-32 test vector
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF43926);
    }
}
