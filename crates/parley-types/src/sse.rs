//! Event-stream framing.
//!
//! The streaming response body is a sequence of frames:
//!
//! ```text
//! data: {"content":"Hel"}\n\n
//! data: {"content":"lo"}\n\n
//! data: [DONE]\n\n
//! ```
//!
//! [`LineDecoder`] turns arbitrary read chunks back into complete lines and
//! [`StreamLine::classify`] maps one line to what it carries.

use crate::chat::ContentChunk;

/// Terminal payload marking the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Field prefix of a data line.
pub const DATA_PREFIX: &str = "data:";

/// Media type of a streaming response.
pub const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Encode one content frame, including the blank-line terminator.
pub fn encode_content_frame(chunk: &ContentChunk) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(chunk)?))
}

/// The literal sentinel frame.
pub fn encode_done_frame() -> String {
    format!("data: {DONE_SENTINEL}\n\n")
}

/// What a single decoded line carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// A `{content}` payload.
    Content(String),
    /// The terminal sentinel.
    Done,
    /// A `data:` line whose payload is not a `{content}` object.
    Malformed(String),
    /// Anything else: blank separators, comments, other fields.
    Ignored,
}

impl StreamLine {
    /// Classify one line (without its terminator).
    pub fn classify(line: &str) -> Self {
        let Some(payload) = data_payload(line) else {
            return StreamLine::Ignored;
        };
        if payload == DONE_SENTINEL {
            return StreamLine::Done;
        }
        match serde_json::from_str::<ContentChunk>(payload) {
            Ok(chunk) => StreamLine::Content(chunk.content),
            Err(_) => StreamLine::Malformed(payload.to_owned()),
        }
    }
}

/// Strip the `data:` field name and at most one following space.
pub fn data_payload(line: &str) -> Option<&str> {
    let value = line.strip_prefix(DATA_PREFIX)?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

/// Incremental byte → line decoder.
///
/// Bytes are held until a `\n` arrives, so a line split across reads (or a
/// multi-byte character split across reads) is decoded only once complete.
/// Invalid UTF-8 is replaced rather than rejected.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Return the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_suffix('\r').unwrap_or(&text).to_owned()
}
