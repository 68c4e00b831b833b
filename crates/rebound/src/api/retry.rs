//! Transport retry with exponential backoff and jitter.
//!
//! The controller never retries transport failures itself. [`Retrying`] wraps
//! any [`StreamFn`] and reopens the stream when it fails with a transient error
//! (429, 500, 502, 503, 504, connect failures, timeouts) **before yielding its
//! first message**. Once content has been yielded, errors pass through
//! unchanged so nothing is ever delivered twice. Never retries 400/401 errors.

use super::streaming::{MessageStream, StreamFn};
use crate::{CompletionOptions, Message, StreamError};
use futures::StreamExt;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses sensible defaults.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given retry number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number; no rand dependency.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Whether an error indicates a transient (retryable) failure.
pub fn is_transient(error: &StreamError) -> bool {
    if let Some(status) = error.status() {
        return matches!(status, 429 | 500 | 502 | 503 | 504);
    }
    match error {
        StreamError::Request(e) => e.is_timeout() || e.is_connect(),
        StreamError::Transport(message) => {
            let lower = message.to_lowercase();
            [
                "connection reset",
                "connection refused",
                "timed out",
                "timeout",
                "broken pipe",
                "network",
            ]
            .iter()
            .any(|p| lower.contains(p))
        }
        _ => false,
    }
}

/// Whether an error is a permanent (non-retryable) failure.
pub fn is_permanent(error: &StreamError) -> bool {
    match error.status() {
        Some(status) => matches!(status, 400 | 401 | 403 | 404 | 422),
        None => matches!(error, StreamError::Serialize(_)),
    }
}

/// A [`StreamFn`] decorator that retries transient failures that happen
/// before any message was produced.
pub struct Retrying<S> {
    inner: S,
    config: RetryConfig,
}

impl<S: StreamFn> Retrying<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: StreamFn> StreamFn for Retrying<S> {
    fn stream(&self, messages: Vec<Message>, options: CompletionOptions) -> MessageStream<'_> {
        Box::pin(async_stream::stream! {
            let mut retry = 0u32;
            loop {
                let mut upstream = self.inner.stream(messages.clone(), options.clone());
                let first = upstream.next().await;
                match first {
                    Some(Err(e)) if is_permanent(&e) => {
                        warn!("Permanent stream error, not retrying: {e}");
                        yield Err(e);
                        return;
                    }
                    Some(Err(e)) if retry < self.config.max_retries && is_transient(&e) => {
                        let delay = self.config.delay_for_attempt(retry);
                        retry += 1;
                        warn!(
                            "Transient stream error (retry {retry}/{}), backing off {:.1}s: {e}",
                            self.config.max_retries,
                            delay.as_secs_f64(),
                        );
                        drop(upstream);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    Some(item) => {
                        let failed = item.is_err();
                        yield item;
                        if failed {
                            return;
                        }
                    }
                    None => return,
                }
                while let Some(item) = upstream.next().await {
                    yield item;
                }
                return;
            }
        })
    }
}
