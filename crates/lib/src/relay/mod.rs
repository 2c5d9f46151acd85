//! Streaming chat relay: forwards a conversation to the model service and re-emits the
//! incrementally generated reply as a server-sent-event stream.
//!
//! The bridge is usable in-process ([`OllamaBridge`]), served over HTTP ([`run_relay`]),
//! or consumed remotely ([`RelayClient`]); all three speak the same SSE framing.

mod bridge;
mod client;
mod ndjson;
mod protocol;
mod server;
mod sse;

pub use bridge::{relay_stream, ChatTransport, OllamaBridge, RelayError, SseStream};
pub use client::RelayClient;
pub use ndjson::{LineBuffer, Reframer, UpstreamChunk};
pub use protocol::{ChatRelayRequest, StatusResponse};
pub use server::{router, run_relay, RelayState};
pub use sse::{RelayChunk, SseDecoder, SseEvent, DONE_MARKER};
