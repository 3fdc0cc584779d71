//! Line framing for the peer protocol
//!
//! [`SectionCodec`] splits a byte stream on `\n`, classifies each line as a
//! section header or text, and encodes [`Directive`]s back into blocks.
//! Decoding never fails on content: invalid UTF-8 is replaced, over-long lines
//! are discarded up to the next newline, and a partial line at EOF is dropped.

use super::{Directive, Line};
use bytes::{Buf, BufMut, BytesMut};
use regex::Regex;
use std::io;
use std::sync::OnceLock;
use tokio_util::codec::{Decoder, Encoder};

/// Longest accepted line, in bytes, unless configured otherwise
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\*{5}\[[ \t]+(.*?)[ \t]+\]\*{5}$").expect("header pattern is valid")
    })
}

/// Format a header line, including the trailing newline
pub fn header(name: &str) -> String {
    format!("*****[ {} ]*****\n", name)
}

/// Classify one line (without its terminating newline)
pub fn classify(raw: &[u8]) -> Line {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end();

    match header_pattern().captures(text) {
        Some(caps) => Line::Header(caps[1].to_string()),
        None => Line::Text(text.to_string()),
    }
}

/// Streaming codec for the peer protocol
#[derive(Debug, Clone)]
pub struct SectionCodec {
    max_line_length: usize,
    /// Bytes already scanned for a newline
    next_index: usize,
    /// Dropping the remainder of an over-long line
    discarding: bool,
}

impl SectionCodec {
    /// Create a codec with the default line limit
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom line limit
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            max_line_length: max_line_length.max(1),
            next_index: 0,
            discarding: false,
        }
    }

    /// Configured line limit
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Default for SectionCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SectionCodec {
    type Item = Line;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        loop {
            let read_to = buf.len().min(self.max_line_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    return Ok(Some(classify(&line[..end])));
                }
                (false, None) if buf.len() > self.max_line_length => {
                    tracing::warn!(
                        limit = self.max_line_length,
                        "Discarding over-long protocol line"
                    );
                    self.discarding = true;
                    self.next_index = 0;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None => {
                // An unterminated trailing line is never processed
                buf.clear();
                self.next_index = 0;
                self.discarding = false;
                Ok(None)
            }
        }
    }
}

impl Encoder<Directive> for SectionCodec {
    type Error = io::Error;

    fn encode(&mut self, directive: Directive, dst: &mut BytesMut) -> Result<(), io::Error> {
        let (name, payload) = match &directive {
            Directive::RequestIdentity => ("ID", None),
            Directive::Query(query) => ("QUERY", Some(query.as_str())),
            Directive::Update(update) => ("UPDATE", Some(update.as_str())),
        };

        dst.put_slice(header(name).as_bytes());
        if let Some(payload) = payload {
            dst.put_slice(payload.trim_end_matches(['\r', '\n']).as_bytes());
            dst.put_u8(b'\n');
        }
        dst.put_slice(header("END").as_bytes());
        Ok(())
    }
}
