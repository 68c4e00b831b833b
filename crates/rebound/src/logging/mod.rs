//! Observability helpers built on `tracing`.
//!
//! LLM payloads (conversations, compaction summaries, request bodies) are far
//! too long for a single log line. [`log_chunked`] splits them into bounded
//! lines and emits each one as its own event tagged with `label`, `part` and
//! `parts`, so log viewers never truncate or wrap them mid-record.
//!
//! [`capture`] provides a `tracing_subscriber` layer that buffers events for
//! hosts that want to show them in their own UI.

pub mod capture;

pub use capture::{CaptureLayer, LogBuffer, LogLevel, LogLine};

use tracing::{Level, debug, error, info, trace, warn};

/// Split `text` into lines of at most `width` characters.
///
/// Existing line breaks are kept; lines longer than `width` are cut into
/// consecutive chunks. Empty lines are dropped. A `width` of zero is treated
/// as one.
pub fn chunk_lines(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.trim_end().chars().collect();
        for chunk in chars.chunks(width) {
            out.push(chunk.iter().collect());
        }
    }
    out
}

/// Emit `text` at `level` as one event per chunk of at most `width`
/// characters. Returns the number of events emitted.
pub fn log_chunked(level: Level, label: &str, text: &str, width: usize) -> usize {
    let chunks = chunk_lines(text, width);
    let parts = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        let part = i + 1;
        match level {
            Level::ERROR => error!(label, part, parts, "{chunk}"),
            Level::WARN => warn!(label, part, parts, "{chunk}"),
            Level::INFO => info!(label, part, parts, "{chunk}"),
            Level::DEBUG => debug!(label, part, parts, "{chunk}"),
            _ => trace!(label, part, parts, "{chunk}"),
        }
    }
    parts
}
