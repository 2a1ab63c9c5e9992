//! Server-sent-event frame decoding.
//!
//! [`SseDecoder`] turns arbitrary byte chunks from the transport into
//! complete lines and classifies them. Chunks may split anywhere, including
//! inside a multi-byte UTF-8 sequence; bytes are buffered until a newline
//! arrives, so decoding never depends on how the network fragmented the
//! stream.

use serde_json::Value;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One classified line of an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Payload of a `data:` line, without the prefix.
    Data(String),
    /// The `data: [DONE]` terminator.
    Done,
    /// Any other non-empty line (comments, keep-alives, `event:`/`id:` fields).
    Other(String),
}

/// Incremental line splitter for an SSE byte stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every frame completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(frame) = classify(&line[..line.len() - 1]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        classify(&rest)
    }
}

fn classify(raw: &[u8]) -> Option<SseFrame> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }

    match line.strip_prefix(DATA_PREFIX) {
        Some(payload) => {
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            if payload.trim() == DONE_SENTINEL {
                Some(SseFrame::Done)
            } else {
                Some(SseFrame::Data(payload.to_string()))
            }
        }
        None => Some(SseFrame::Other(line.to_string())),
    }
}

/// The incremental content fragment carried by a `data:` payload.
///
/// Returns `None` for payloads that are not JSON or carry no
/// `choices[0].delta.content`; such frames are skipped.
pub fn delta_content(payload: &str) -> Option<String> {
    let json: Value = serde_json::from_str(payload).ok()?;
    json.pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}
