//! The adaptive stream controller.
//!
//! [`run`] drives repeated invocations of an injected [`StreamFn`] as one
//! logical completion. Each attempt's messages are forwarded to the consumer
//! as they arrive, except assistant messages flagged `truncated` while
//! auto-expansion is on: those mark the attempt as incomplete and are
//! swallowed. When an attempt ends truncated, [`RunState::decide`] picks the
//! next step:
//!
//! 1. On the last allowed attempt, optionally grant one more.
//! 2. Out of attempts: stop.
//! 3. Compact the conversation (at most once per run).
//! 4. Double `max_tokens`, clamped to the token ceiling. If it grew, retry;
//!    otherwise report that expansion is blocked and stop.
//!
//! Transport errors end the run and are forwarded as-is. Cancellation ends it
//! silently: the token is checked before every attempt, after every upstream
//! item (message or error) and before every status message.
//!
//! ```ignore
//! let stream = run(messages, cancel.clone(), options, &client, ResilienceConfig::default());
//! futures::pin_mut!(stream);
//! while let Some(message) = stream.next().await { /* ... */ }
//! ```

pub mod config;
pub mod state;
pub mod status;

pub use config::ResilienceConfig;
pub use state::{Decision, Next, RunState};
pub use status::StatusKind;

use crate::api::{MessageStream, StreamFn};
use crate::{CompletionOptions, Message};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Run one resilient completion.
///
/// Returns a lazy stream: nothing happens until the consumer polls it, only
/// one upstream attempt is ever active, and dropping the stream abandons the
/// active attempt.
pub fn run<'a, S>(
    messages: Vec<Message>,
    cancel: CancellationToken,
    options: CompletionOptions,
    stream_fn: &'a S,
    config: ResilienceConfig,
) -> MessageStream<'a>
where
    S: StreamFn + ?Sized,
{
    Box::pin(async_stream::stream! {
        let mut state = RunState::new(messages, &options, &config);

        loop {
            let attempt = state.begin_attempt();
            if cancel.is_cancelled() {
                debug!("Cancelled before attempt {attempt}");
                return;
            }

            let attempt_options = state.attempt_options(&options);
            debug!(
                "Attempt {attempt}/{}: messages={}, max_tokens={:?}",
                state.attempt_ceiling,
                state.messages.len(),
                attempt_options.max_tokens,
            );

            let mut truncated = false;
            let mut forwarded = 0usize;
            let mut upstream = stream_fn.stream(state.messages.clone(), attempt_options);

            while let Some(item) = upstream.next().await {
                if cancel.is_cancelled() {
                    debug!("Cancelled during attempt {attempt}");
                    return;
                }
                let message = match item {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Attempt {attempt} failed: {e}");
                        yield Err(e);
                        return;
                    }
                };
                if message.is_truncated_assistant() {
                    truncated = true;
                    if config.auto_expand_enabled {
                        trace!("Holding back truncated message from attempt {attempt}");
                        continue;
                    }
                }
                forwarded += 1;
                yield Ok(message);
            }
            drop(upstream);

            debug!("Attempt {attempt} ended: forwarded={forwarded}, truncated={truncated}");

            let decision = state.decide(truncated, &config);
            for status in decision.status {
                if cancel.is_cancelled() {
                    debug!("Cancelled after attempt {attempt}");
                    return;
                }
                yield Ok(status);
            }
            if decision.next == Next::Stop {
                return;
            }
        }
    })
}

/// A [`StreamFn`] that runs every call through the controller.
///
/// Lets the controller sit underneath any API that expects the plain
/// streaming shape. Each call gets its own [`RunState`] and a child of the
/// wrapper's cancellation token, so cancelling the wrapper stops every run
/// while runs stay independent of each other.
pub struct Resilient<S> {
    inner: S,
    config: ResilienceConfig,
    cancel: CancellationToken,
}

impl<S: StreamFn> Resilient<S> {
    pub fn new(inner: S, config: ResilienceConfig) -> Self {
        Self {
            inner,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The token that cancels all runs started through this wrapper.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }
}

impl<S: StreamFn> StreamFn for Resilient<S> {
    fn stream(&self, messages: Vec<Message>, options: CompletionOptions) -> MessageStream<'_> {
        run(
            messages,
            self.cancel.child_token(),
            options,
            &self.inner,
            self.config.clone(),
        )
    }
}
