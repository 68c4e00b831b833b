//! Deterministic conversation compaction.
//!
//! Collapses the older part of a conversation into one synthetic `user`
//! message so a retry sends fewer input tokens. No LLM call is involved: each
//! older message becomes one role-tagged line, and lines are accumulated
//! until the character budget would be exceeded. The most recent
//! `retain_last_n` messages are always kept verbatim, and a leading system
//! prompt is held aside and put back in front.
//!
//! Output shape: `[system?] [summary] [tail...]`, so at most
//! `retain_last_n + 2` messages.

use crate::{Message, MessageRole};
use serde::Deserialize;

/// Maximum characters kept from any single summarized message.
pub const MAX_LINE_CHARS: usize = 220;

/// Default header line of the synthetic summary message.
pub const DEFAULT_LEGEND_HEADER: &str =
    "Summary of earlier conversation (U=user, A=assistant, T=tool, O=other):";

/// Configuration for [`compact`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompactorConfig {
    /// Most recent messages that are never summarized.
    pub retain_last_n: usize,
    /// Maximum characters of summary lines (separators included, header
    /// excluded).
    pub summary_char_budget: usize,
    /// Literal text placed on the first line of the summary message.
    pub legend_header: String,
    /// Whether a leading system message is carried into the output. Set to
    /// `false` for endpoints that reject system messages.
    pub keep_system_message: bool,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            retain_last_n: 6,
            summary_char_budget: 4000,
            legend_header: DEFAULT_LEGEND_HEADER.to_string(),
            keep_system_message: true,
        }
    }
}

/// One-letter tag used to prefix a summarized line.
fn role_tag(role: &MessageRole) -> char {
    match role {
        MessageRole::User => 'U',
        MessageRole::Assistant => 'A',
        MessageRole::Tool => 'T',
        _ => 'O',
    }
}

/// Flatten, whitespace-collapse and cap a message as one summary line.
/// Returns `None` for messages with no text.
fn summary_line(message: &Message) -> Option<String> {
    let text = message.text();
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    let capped: String = collapsed.chars().take(MAX_LINE_CHARS).collect();
    Some(format!("{}: {capped}", role_tag(&message.role)))
}

/// Compact `messages` into `[system?] [summary] [last retain_last_n]`.
///
/// Returns `None` when there is nothing to summarize: the conversation is
/// already short enough, or none of the older messages carry any text (or the
/// budget cannot fit a single line). Callers treat `None` as "unchanged".
pub fn compact(messages: &[Message], config: &CompactorConfig) -> Option<Vec<Message>> {
    if messages.len() <= config.retain_last_n.saturating_add(1) {
        return None;
    }

    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == MessageRole::System => (Some(first), rest),
        _ => (None, messages),
    };

    let split = rest.len().saturating_sub(config.retain_last_n);
    let (head, tail) = rest.split_at(split);
    if head.is_empty() {
        return None;
    }

    let mut lines: Vec<String> = Vec::new();
    let mut used = 0usize;
    for line in head.iter().filter_map(summary_line) {
        let separator = usize::from(!lines.is_empty());
        let cost = line.chars().count() + separator;
        if used + cost > config.summary_char_budget {
            break;
        }
        used += cost;
        lines.push(line);
    }
    if lines.is_empty() {
        return None;
    }

    let summary = Message::user(format!("{}\n{}", config.legend_header, lines.join("\n")));

    let mut out = Vec::with_capacity(tail.len() + 2);
    if let Some(system) = system
        && config.keep_system_message
    {
        out.push(system.clone());
    }
    out.push(summary);
    out.extend_from_slice(tail);
    Some(out)
}
