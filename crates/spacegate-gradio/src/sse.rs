//! Minimal Server-Sent Events decoding for the upstream client.
//!
//! Events are fields separated by newlines and terminated by a blank line:
//!
//! ```text
//! event: message
//! data: {"jsonrpc": "2.0", ...}
//!
//! ```
//!
//! Only the fields the upstream MCP flow uses are kept: `event` and `data`
//! (multiline `data:` lines are joined with `\n`; comments are ignored).

/// A decoded SSE event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// Event type; upstream uses `endpoint` and `message`.
    pub event: Option<String>,
    /// Joined event data.
    pub data: String,
}

/// Incremental SSE decoder fed from a byte stream.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning any events completed by them.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(s) => self.buffer.push_str(s),
            // Chunk boundaries can split UTF-8 sequences; a lossy push would
            // corrupt JSON payloads, so whole invalid chunks are skipped.
            Err(_) => return Vec::new(),
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.flush() {
                    events.push(event);
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event = Some(rest.trim_start().to_string());
            }
            // ids, retry hints, and comments are irrelevant to the proxy.
        }
        events
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}
