//! SSE framing for the relay output: encoding outbound events and an incremental decoder
//! for consumers reading the stream from arbitrarily split network reads.

use axum::body::Bytes;
use serde::{Deserialize, Serialize};

/// Terminator payload sent after the final chunk.
pub const DONE_MARKER: &str = "[DONE]";

/// Payload of one `data:` event: a content delta and whether the model finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayChunk {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

/// One server-sent event on the relay stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// `data: {"text":…,"done":…}`
    Chunk(RelayChunk),
    /// `data: [DONE]`
    Done,
    /// `data: {"error":…}`; only emitted by relays that report failures in-band.
    Error(String),
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    error: String,
}

impl SseEvent {
    pub fn chunk(text: impl Into<String>, done: bool) -> Self {
        SseEvent::Chunk(RelayChunk {
            text: text.into(),
            done,
        })
    }

    /// Wire form: `data: <payload>\n\n`.
    pub fn encode(&self) -> Bytes {
        let payload = match self {
            SseEvent::Chunk(chunk) => serde_json::to_string(chunk)
                .unwrap_or_else(|_| r#"{"text":"","done":false}"#.to_string()),
            SseEvent::Done => DONE_MARKER.to_string(),
            SseEvent::Error(message) => serde_json::to_string(&ErrorPayload {
                error: message.clone(),
            })
            .unwrap_or_else(|_| r#"{"error":"relay error"}"#.to_string()),
        };
        Bytes::from(format!("data: {}\n\n", payload))
    }
}

/// Incremental SSE parser: buffers bytes, splits on the blank line that ends an event, and
/// keeps the unterminated remainder for the next read. A `data:` line split across reads is
/// reassembled before parsing.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read; returns every event completed by it, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        // CR only appears in framing; JSON payloads escape it.
        self.buffer.extend(bytes.iter().copied().filter(|&b| b != b'\r'));
        let mut events = Vec::new();
        while let Some(i) = find_event_end(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..i).collect();
            self.buffer.drain(..2);
            if let Some(event) = parse_event(&block) {
                events.push(event);
            }
        }
        events
    }

    /// End of stream: parse whatever is left as a final, unterminated event.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let block = std::mem::take(&mut self.buffer);
        if block.iter().all(|b| b.is_ascii_whitespace()) {
            return Vec::new();
        }
        parse_event(&block).into_iter().collect()
    }
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_event(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    let mut data: Vec<&str> = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    let payload = payload.trim();
    if payload == DONE_MARKER {
        return Some(SseEvent::Done);
    }
    if let Ok(err) = serde_json::from_str::<ErrorPayload>(payload) {
        return Some(SseEvent::Error(err.error));
    }
    match serde_json::from_str::<RelayChunk>(payload) {
        Ok(chunk) => Some(SseEvent::Chunk(chunk)),
        Err(e) => {
            log::warn!("dropping malformed sse payload ({}): {}", e, payload);
            None
        }
    }
}
