//! Synthetic status messages narrating controller decisions.
//!
//! Status messages are assistant-role messages whose `finish_reason` carries
//! one of four literal tags. Consumers that filter on these tags depend on the
//! exact strings, so they must never change.

use crate::{Message, MessageRole};

pub const TAG_ATTEMPT_EXTENDED: &str = "Extending_MAX_TOKEN_RETRIES";
pub const TAG_CONVERSATION_COMPACTED: &str = "CONVERSATION_COMPACTED";
pub const TAG_BUDGET_EXPANDED: &str = "RETRYING_MAX_TOKENS_EXPANSION";
pub const TAG_EXPANSION_BLOCKED: &str = "MAX_TOKEN_EXPANSION_BLOCKED";

/// Which controller decision a status message reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// The last allowed attempt was still truncated; one more was granted.
    AttemptExtended,
    /// Older messages were collapsed into one summary message.
    ConversationCompacted,
    /// The output-token budget grew and another attempt follows.
    BudgetExpanded,
    /// The budget is already at its ceiling; the run stops.
    ExpansionBlocked,
}

impl StatusKind {
    pub const ALL: [StatusKind; 4] = [
        StatusKind::AttemptExtended,
        StatusKind::ConversationCompacted,
        StatusKind::BudgetExpanded,
        StatusKind::ExpansionBlocked,
    ];

    /// The literal completion-reason tag.
    pub const fn tag(self) -> &'static str {
        match self {
            StatusKind::AttemptExtended => TAG_ATTEMPT_EXTENDED,
            StatusKind::ConversationCompacted => TAG_CONVERSATION_COMPACTED,
            StatusKind::BudgetExpanded => TAG_BUDGET_EXPANDED,
            StatusKind::ExpansionBlocked => TAG_EXPANSION_BLOCKED,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Build the status message for this decision.
    pub fn message(self, text: impl Into<String>) -> Message {
        Message::assistant_text(text.into()).with_finish_reason(self.tag())
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl Message {
    /// The [`StatusKind`] of a controller status message, `None` for
    /// anything else.
    pub fn status_kind(&self) -> Option<StatusKind> {
        if self.role != MessageRole::Assistant {
            return None;
        }
        self.finish_reason.as_deref().and_then(StatusKind::from_tag)
    }
}
