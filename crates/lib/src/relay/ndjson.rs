//! Upstream NDJSON framing: line splitting over arbitrary read boundaries, defensive chunk
//! parsing, and re-framing of upstream chunks as relay SSE events.

use serde::Deserialize;

use super::sse::SseEvent;
use super::RelayError;

/// One parsed upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamChunk {
    /// `{message:{content}, done:false}`
    Delta { content: String },
    /// `{message:{content}?, done:true}`
    Final { content: String },
    /// `{error: "..."}`, sent by Ollama when generation fails after the response started.
    Error(String),
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: String,
}

impl UpstreamChunk {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let raw: RawChunk = serde_json::from_str(line)?;
        if let Some(error) = raw.error {
            return Ok(UpstreamChunk::Error(error));
        }
        let content = raw.message.map(|m| m.content).unwrap_or_default();
        Ok(if raw.done {
            UpstreamChunk::Final { content }
        } else {
            UpstreamChunk::Delta { content }
        })
    }
}

/// Byte buffer that yields complete `\n`-terminated lines and keeps the remainder.
/// Lines are only decoded once complete, so a UTF-8 sequence split across reads stays intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator, or None if no newline is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let i = self.buffer.iter().position(|&b| b == b'\n')?;
        let line_bytes: Vec<u8> = self.buffer.drain(..i).collect();
        self.buffer.drain(..1);
        Some(String::from_utf8_lossy(&line_bytes).into_owned())
    }

    /// Whatever is left after the last newline (used when the body ends without one).
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Converts upstream body reads into relay SSE events.
///
/// After the final chunk or an in-band error has been seen, the reframer is finished and
/// ignores further input. Events completed before an error in the same read are still
/// returned; the error is then available from [`Reframer::take_error`].
#[derive(Debug, Default)]
pub struct Reframer {
    lines: LineBuffer,
    finished: bool,
    error: Option<RelayError>,
}

impl Reframer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The upstream's in-band error, if one ended the stream. Yields it once.
    pub fn take_error(&mut self) -> Option<RelayError> {
        self.error.take()
    }

    /// Feed one upstream read. Returns the events it completed, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.lines.extend(bytes);
        while let Some(line) = self.lines.next_line() {
            self.reframe_line(&line, &mut events);
            if self.finished {
                break;
            }
        }
        events
    }

    /// Upstream body ended: flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        if let Some(line) = self.lines.take_remainder() {
            self.reframe_line(&line, &mut events);
        }
        events
    }

    fn reframe_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match UpstreamChunk::parse(line) {
            Ok(UpstreamChunk::Delta { content }) => out.push(SseEvent::chunk(content, false)),
            Ok(UpstreamChunk::Final { content }) => {
                out.push(SseEvent::chunk(content, true));
                out.push(SseEvent::Done);
                self.finished = true;
            }
            Ok(UpstreamChunk::Error(message)) => {
                self.error = Some(RelayError::UpstreamStream(message));
                self.finished = true;
            }
            Err(e) => {
                log::warn!("dropping malformed upstream chunk ({}): {}", e, line);
            }
        }
    }
}
