//! Per-run state and the end-of-attempt decision.
//!
//! Everything that evolves during a run (working messages, attempt counter,
//! attempt ceiling, token ceiling, current budget) lives in one [`RunState`]
//! owned by that run. Concurrent runs never share it.

use super::config::ResilienceConfig;
use super::status::StatusKind;
use crate::context::compact;
use crate::logging::log_chunked;
use crate::{CompletionOptions, Message};
use tracing::{Level, debug, info, warn};

/// Width of the lines a compaction summary is logged with.
const SUMMARY_LOG_WIDTH: usize = 160;

/// What the controller does after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Retry,
    Stop,
}

/// Outcome of [`RunState::decide`]: status messages to surface (already
/// filtered by the diagnostics setting) and the next step.
#[derive(Debug)]
pub struct Decision {
    pub status: Vec<Message>,
    pub next: Next,
}

impl Decision {
    fn stop(status: Vec<Message>) -> Self {
        Self {
            status,
            next: Next::Stop,
        }
    }

    fn retry(status: Vec<Message>) -> Self {
        Self {
            status,
            next: Next::Retry,
        }
    }
}

/// Mutable state of a single controller run.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Conversation sent on the next attempt.
    pub messages: Vec<Message>,
    /// 1-based number of the current attempt (0 before the first).
    pub attempt: u32,
    /// Live attempt ceiling. Only ever grows.
    pub attempt_ceiling: u32,
    /// Live token ceiling; derived on first use when not configured.
    pub token_ceiling: Option<u32>,
    /// Current output-token budget (the caller's until an expansion).
    pub max_tokens: Option<u32>,
    pub compacted: bool,
    pub expanded: bool,
}

impl RunState {
    pub fn new(
        messages: Vec<Message>,
        options: &CompletionOptions,
        config: &ResilienceConfig,
    ) -> Self {
        if config.attempts_limit == 0 {
            warn!("attempts_limit of 0 treated as 1");
        }
        Self {
            messages,
            attempt: 0,
            attempt_ceiling: config.attempts_limit.max(1),
            token_ceiling: config.token_ceiling,
            max_tokens: options.max_tokens,
            compacted: false,
            expanded: false,
        }
    }

    /// Advance to the next attempt and return its number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Options for the current attempt: the caller's, with `max_tokens`
    /// replaced by the expanded budget (clamped to the ceiling) once an
    /// expansion has happened.
    pub fn attempt_options(&self, options: &CompletionOptions) -> CompletionOptions {
        let mut opts = options.clone();
        if self.expanded {
            opts.max_tokens = match (self.max_tokens, self.token_ceiling) {
                (Some(budget), Some(ceiling)) => Some(budget.min(ceiling)),
                (budget, _) => budget,
            };
        }
        opts
    }

    /// Decide what follows the attempt that just ended.
    ///
    /// Retries only when auto-expansion is on, the attempt was truncated, an
    /// attempt remains, and the budget can still grow. Compaction is tried
    /// before the first expansion and happens at most once per run.
    pub fn decide(&mut self, truncated: bool, config: &ResilienceConfig) -> Decision {
        let diagnostics = config.emit_diagnostic_status_messages;
        let mut status = Vec::new();

        if !(config.auto_expand_enabled && truncated) {
            return Decision::stop(status);
        }

        if self.attempt >= self.attempt_ceiling && config.allow_attempt_extension {
            self.attempt_ceiling += 1;
            info!(
                "Attempt {} still truncated; extending attempt limit to {}",
                self.attempt, self.attempt_ceiling
            );
            if diagnostics {
                status.push(StatusKind::AttemptExtended.message(format!(
                    "Response still truncated after {} attempt(s); allowing one more (limit now {}).",
                    self.attempt, self.attempt_ceiling
                )));
            }
        }

        if self.attempt >= self.attempt_ceiling {
            info!(
                "Attempt limit {} reached with truncated output; stopping",
                self.attempt_ceiling
            );
            return Decision::stop(status);
        }

        if !self.compacted
            && let Some(compacted) = compact(&self.messages, &config.compactor_config())
        {
            info!(
                "Compacted conversation from {} to {} messages",
                self.messages.len(),
                compacted.len()
            );
            let summary = compacted
                .iter()
                .map(Message::text)
                .find(|text| text.starts_with(&config.legend_header));
            if let Some(summary) = summary {
                log_chunked(Level::DEBUG, "compaction", &summary, SUMMARY_LOG_WIDTH);
            }
            if diagnostics {
                status.push(StatusKind::ConversationCompacted.message(format!(
                    "Conversation compacted from {} to {} messages before retrying.",
                    self.messages.len(),
                    compacted.len()
                )));
            }
            self.messages = compacted;
            self.compacted = true;
        }

        let Some(current) = self.max_tokens.or(config.baseline_max_tokens) else {
            warn!("Output truncated but no max_tokens or baseline to expand from");
            if diagnostics {
                status.push(StatusKind::ExpansionBlocked.message(
                    "Response truncated and no output-token budget is known; cannot expand.",
                ));
            }
            return Decision::stop(status);
        };

        let ceiling = *self.token_ceiling.get_or_insert(current.saturating_mul(4));
        let candidate = current.saturating_mul(2).min(ceiling);

        if candidate > current {
            self.max_tokens = Some(candidate);
            self.expanded = true;
            let next_attempt = self.attempt + 1;
            info!(
                "Expanding max_tokens {current} -> {candidate} (ceiling {ceiling}); attempt {next_attempt}/{}",
                self.attempt_ceiling
            );
            if diagnostics {
                status.push(StatusKind::BudgetExpanded.message(format!(
                    "Response truncated at {current} tokens; retrying with max_tokens={candidate} (attempt {next_attempt} of {}).",
                    self.attempt_ceiling
                )));
            }
            Decision::retry(status)
        } else {
            warn!("max_tokens already at ceiling {ceiling}; cannot expand further");
            if diagnostics {
                status.push(StatusKind::ExpansionBlocked.message(format!(
                    "Response truncated at the {ceiling}-token ceiling; not retrying."
                )));
            }
            debug!("Stopping after attempt {}", self.attempt);
            Decision::stop(status)
        }
    }
}
