//! Configuration for a controller run.
//!
//! [`ResilienceConfig`] is supplied per call to [`run`](super::run); nothing
//! here is global. Use the builder methods for common settings or struct
//! update syntax for the rest:
//!
//! ```ignore
//! let config = ResilienceConfig::default()
//!     .with_baseline_max_tokens(1024)
//!     .with_token_ceiling(8192)
//!     .with_attempts_limit(4)
//!     .with_diagnostics(true);
//!
//! let config = ResilienceConfig {
//!     retain_last_n: 2,
//!     allow_attempt_extension: true,
//!     ..ResilienceConfig::default()
//! };
//! ```
//!
//! The struct also deserializes (every field optional) so host applications
//! can embed it in their own configuration files.

use crate::context::{CompactorConfig, DEFAULT_LEGEND_HEADER};
use serde::Deserialize;

/// Per-run resilience settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Whether a truncated response triggers a retry with a larger
    /// output-token budget. When `false`, truncation is only observed and
    /// every message is forwarded.
    pub auto_expand_enabled: bool,
    /// Output-token budget to expand from when the caller's options carry
    /// no `max_tokens`.
    pub baseline_max_tokens: Option<u32>,
    /// Maximum number of attempts. Values below 1 are treated as 1.
    pub attempts_limit: u32,
    /// Hard upper bound for the expanded budget. When unset, the first
    /// expansion derives it as four times the budget being expanded.
    pub token_ceiling: Option<u32>,
    /// Most recent messages compaction never touches.
    pub retain_last_n: usize,
    /// Character budget of the compaction summary body.
    pub summary_char_budget: usize,
    /// First line of the compaction summary message.
    pub legend_header: String,
    /// Grant one extra attempt when the last allowed attempt is still
    /// truncated.
    pub allow_attempt_extension: bool,
    /// Surface synthetic status messages (compaction, expansion, extension,
    /// blocked) to the consumer.
    pub emit_diagnostic_status_messages: bool,
    /// Whether the target endpoint accepts system messages. When `false`,
    /// compaction drops a leading system message instead of carrying it.
    pub supports_system_message: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            auto_expand_enabled: true,
            baseline_max_tokens: None,
            attempts_limit: 3,
            token_ceiling: None,
            retain_last_n: 6,
            summary_char_budget: 4000,
            legend_header: DEFAULT_LEGEND_HEADER.to_string(),
            allow_attempt_extension: false,
            emit_diagnostic_status_messages: false,
            supports_system_message: true,
        }
    }
}

impl ResilienceConfig {
    /// A config that never retries: every message is forwarded as-is.
    pub fn passthrough() -> Self {
        Self {
            auto_expand_enabled: false,
            ..Self::default()
        }
    }

    pub fn with_auto_expand(mut self, enabled: bool) -> Self {
        self.auto_expand_enabled = enabled;
        self
    }

    pub fn with_baseline_max_tokens(mut self, tokens: u32) -> Self {
        self.baseline_max_tokens = Some(tokens);
        self
    }

    pub fn with_attempts_limit(mut self, attempts: u32) -> Self {
        self.attempts_limit = attempts;
        self
    }

    pub fn with_token_ceiling(mut self, tokens: u32) -> Self {
        self.token_ceiling = Some(tokens);
        self
    }

    pub fn with_retain_last_n(mut self, n: usize) -> Self {
        self.retain_last_n = n;
        self
    }

    pub fn with_summary_char_budget(mut self, chars: usize) -> Self {
        self.summary_char_budget = chars;
        self
    }

    pub fn with_legend_header(mut self, header: impl Into<String>) -> Self {
        self.legend_header = header.into();
        self
    }

    pub fn with_attempt_extension(mut self, allow: bool) -> Self {
        self.allow_attempt_extension = allow;
        self
    }

    pub fn with_diagnostics(mut self, emit: bool) -> Self {
        self.emit_diagnostic_status_messages = emit;
        self
    }

    pub fn with_system_message_support(mut self, supported: bool) -> Self {
        self.supports_system_message = supported;
        self
    }

    /// The compaction settings this config implies.
    pub fn compactor_config(&self) -> CompactorConfig {
        CompactorConfig {
            retain_last_n: self.retain_last_n,
            summary_char_budget: self.summary_char_budget,
            legend_header: self.legend_header.clone(),
            keep_system_message: self.supports_system_message,
        }
    }
}
