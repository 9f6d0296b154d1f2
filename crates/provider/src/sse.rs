//! Incremental decoder for chat-completion Server-Sent Events.
//!
//! Chunks may split lines (and UTF-8 sequences) anywhere; the decoder keeps
//! the unfinished tail of the byte buffer until the next chunk or the end of
//! the stream. Lines that are not `data:` events, the `[DONE]` sentinel, and
//! payloads that do not match the event schema are skipped.

use std::collections::BTreeMap;

use anyhow::Result;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;

use crate::types::{FunctionCall, StreamReply};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionDelta>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    content: String,
    function_name: Option<String>,
    function_arguments: String,
    tool_names: BTreeMap<u32, String>,
    tool_arguments: BTreeMap<u32, String>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.feed(chunk, &mut |_| {});
    }

    /// Content accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    fn feed(&mut self, chunk: &[u8], on_delta: &mut dyn FnMut(&str)) {
        // The held-back tail never contains a newline, so only new bytes are scanned.
        let mut buffer = std::mem::take(&mut self.buffer);
        let mut search_from = buffer.len();
        buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(pos) = buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + pos;
            self.process_line(&buffer[start..end], on_delta);
            start = end + 1;
            search_from = start;
        }

        buffer.drain(..start);
        self.buffer = buffer;
    }

    fn process_line(&mut self, raw: &[u8], on_delta: &mut dyn FnMut(&str)) {
        let line = String::from_utf8_lossy(raw);
        let Some(payload) = line.trim().strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == DONE_SENTINEL {
            return;
        }

        let event: ChunkEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed stream event");
                return;
            }
        };

        if let Some(delta) = event.choices.into_iter().next().and_then(|c| c.delta) {
            self.apply(delta, on_delta);
        }
    }

    fn apply(&mut self, delta: Delta, on_delta: &mut dyn FnMut(&str)) {
        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
            self.content.push_str(&text);
            on_delta(&text);
        }

        if let Some(call) = delta.function_call {
            if let Some(name) = call.name {
                self.function_name = Some(name);
            }
            if let Some(args) = call.arguments {
                self.function_arguments.push_str(&args);
            }
        }

        for call in delta.tool_calls.unwrap_or_default() {
            let Some(function) = call.function else {
                continue;
            };
            if let Some(name) = function.name {
                self.tool_names.entry(call.index).or_default().push_str(&name);
            }
            if let Some(args) = function.arguments {
                self.tool_arguments
                    .entry(call.index)
                    .or_default()
                    .push_str(&args);
            }
        }
    }

    pub fn finish(self) -> StreamReply {
        self.finish_with(&mut |_| {})
    }

    fn finish_with(mut self, on_delta: &mut dyn FnMut(&str)) -> StreamReply {
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            self.process_line(&tail, on_delta);
        }

        let function_call = match self.function_name.filter(|n| !n.is_empty()) {
            Some(name) => Some(FunctionCall {
                name,
                arguments: self.function_arguments,
            }),
            None => {
                // Only one call is acted on per reply: the lowest index seen.
                let lowest = self
                    .tool_names
                    .keys()
                    .chain(self.tool_arguments.keys())
                    .min()
                    .copied();
                lowest.and_then(|index| {
                    let name = self.tool_names.remove(&index).filter(|n| !n.is_empty())?;
                    if self.tool_names.len() + self.tool_arguments.len() > 1 {
                        tracing::debug!(index, "Multiple tool calls streamed, using the first");
                    }
                    Some(FunctionCall {
                        name,
                        arguments: self.tool_arguments.remove(&index).unwrap_or_default(),
                    })
                })
            }
        };

        StreamReply {
            content: self.content,
            function_call,
        }
    }
}

/// Decodes a whole response body into a [`StreamReply`].
pub async fn decode_stream<S, B>(stream: S) -> Result<StreamReply>
where
    S: Stream<Item = Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    decode_stream_with(stream, |_| {}).await
}

/// Like [`decode_stream`], calling `on_delta` with each content fragment as it
/// arrives. Transport errors are returned as-is.
pub async fn decode_stream_with<S, B, F>(mut stream: S, mut on_delta: F) -> Result<StreamReply>
where
    S: Stream<Item = Result<B>> + Unpin,
    B: AsRef<[u8]>,
    F: FnMut(&str),
{
    let mut decoder = StreamDecoder::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        decoder.feed(chunk.as_ref(), &mut on_delta);
    }
    Ok(decoder.finish_with(&mut on_delta))
}
