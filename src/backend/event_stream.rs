//! Incremental event-stream parsing.
//!
//! Response bodies arrive as arbitrary byte chunks. [`LineBuffer`] turns them
//! into complete lines; [`parse_event_line`] applies the line rules:
//!
//! 1. strip a `data:` / `event:` prefix
//! 2. skip blank lines; report the `[DONE]` terminator
//! 3. skip comments, heartbeats and status lines (anything not starting with `{`)
//! 4. parse the rest as one JSON object; malformed lines are reported, not fatal
//!
//! [`interpret_chunk`] then pulls text, the finish signal and usage out of a
//! parsed chunk.

use crate::types::Usage;
use serde_json::Value;

/// Accumulates raw bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line completed by them.
    ///
    /// Lines are split on `\n`; a trailing `\r` is dropped. Multi-byte UTF-8
    /// sequences split across chunks are reassembled before decoding.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flush whatever is left once the body ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Outcome of parsing one line.
#[derive(Debug, Clone, PartialEq)]
pub enum EventLine {
    /// Blank, comment or non-JSON status line.
    Skip,
    /// The `[DONE]` terminator.
    Done,
    /// Looked like JSON but failed to parse.
    Malformed(String),
    /// One parsed JSON object.
    Json(Value),
}

/// Apply the line rules to one raw line.
pub fn parse_event_line(raw: &str) -> EventLine {
    let mut line = raw.trim();
    for prefix in ["data:", "event:"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            line = rest.trim();
            break;
        }
    }

    if line == "[DONE]" {
        return EventLine::Done;
    }
    if line.is_empty() {
        return EventLine::Skip;
    }
    // Comments (`: OPENROUTER PROCESSING`) and status lines are never JSON.
    if !line.starts_with('{') {
        return EventLine::Skip;
    }

    match serde_json::from_str::<Value>(line) {
        Ok(value) => EventLine::Json(value),
        Err(e) => EventLine::Malformed(format!("{}: {}", e, line)),
    }
}

/// What one parsed chunk contributes to the response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkView {
    /// Non-empty `choices[0].delta.content`.
    pub text: Option<String>,
    /// `choices[0].finish_reason` was non-null.
    pub finished: bool,
    pub usage: Option<Usage>,
}

/// Extract text, completion signal and usage from a parsed chunk.
pub fn interpret_chunk(chunk: &Value) -> ChunkView {
    let choice = chunk.get("choices").and_then(|c| c.get(0));

    let text = choice
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let finished = choice
        .and_then(|c| c.get("finish_reason"))
        .is_some_and(|r| !r.is_null());

    let usage = chunk
        .get("usage")
        .filter(|u| u.is_object())
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());

    ChunkView { text, finished, usage }
}
