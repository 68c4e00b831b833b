//! Context window management for retries.
//!
//! When a response is cut off, the retry is cheaper and more likely to fit if
//! the older part of the conversation is collapsed first. [`compactor`]
//! provides that as a pure function: no I/O, no LLM call, deterministic output.
//!
//! The [`controller`](crate::controller) calls [`compact`] at most once per
//! run, right before its first token-budget expansion.

pub mod compactor;

// Re-export commonly used items at the module level.
pub use compactor::{CompactorConfig, DEFAULT_LEGEND_HEADER, MAX_LINE_CHARS, compact};
