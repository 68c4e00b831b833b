//! End-to-end tests for the adaptive stream controller.
//!
//! Each test drives `run` against a scripted in-memory `StreamFn` that records
//! every call, then checks what the consumer saw and what was requested.

use std::sync::Mutex;

use futures::StreamExt;
use rebound::controller::{ResilienceConfig, Resilient, StatusKind, run};
use rebound::prelude::CancellationToken;
use rebound::{
    CompletionOptions, Message, MessageRole, StreamError,
    api::{MessageStream, StreamFn},
};

type Script = Box<dyn Fn(usize) -> Vec<Result<Message, StreamError>> + Send + Sync>;

/// A `StreamFn` whose n-th call (0-based) yields `script(n)`.
struct Scripted {
    script: Script,
    calls: Mutex<Vec<(Vec<Message>, CompletionOptions)>>,
}

impl Scripted {
    fn new<F>(script: F) -> Self
    where
        F: Fn(usize) -> Vec<Result<Message, StreamError>> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call yields one truncated assistant message.
    fn always_truncated() -> Self {
        Self::new(|_| vec![Ok(Message::assistant_text("partial").with_truncated(true))])
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn budgets(&self) -> Vec<Option<u32>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, o)| o.max_tokens)
            .collect()
    }

    fn sent_messages(&self) -> Vec<Vec<Message>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }
}

impl StreamFn for Scripted {
    fn stream(&self, messages: Vec<Message>, options: CompletionOptions) -> MessageStream<'_> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((messages, options));
            calls.len() - 1
        };
        Box::pin(futures::stream::iter((self.script)(n)))
    }
}

fn conversation(n: usize) -> Vec<Message> {
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(format!("question {i}"))
            } else {
                Message::assistant_text(format!("answer {i}"))
            }
        })
        .collect()
}

fn options(max_tokens: u32) -> CompletionOptions {
    CompletionOptions::new("test-model").with_max_tokens(max_tokens)
}

async fn drain(stream: MessageStream<'_>) -> Vec<Message> {
    stream
        .map(|item| item.expect("unexpected stream error"))
        .collect()
        .await
}

fn kinds(messages: &[Message]) -> Vec<StatusKind> {
    messages.iter().filter_map(Message::status_kind).collect()
}

// ── Truncation and budget expansion ──────────────────────────────────

#[tokio::test]
async fn persistent_truncation_uses_every_attempt_silently() {
    let upstream = Scripted::always_truncated();
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(1000)
        .with_attempts_limit(3);

    let out = drain(run(
        conversation(2),
        CancellationToken::new(),
        options(1000),
        &upstream,
        config,
    ))
    .await;

    assert_eq!(upstream.call_count(), 3);
    assert!(out.is_empty(), "truncated messages must not be forwarded: {out:?}");
}

#[tokio::test]
async fn persistent_truncation_with_diagnostics() {
    let upstream = Scripted::always_truncated();
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(1000)
        .with_attempts_limit(3)
        .with_diagnostics(true);

    let out = drain(run(
        conversation(2),
        CancellationToken::new(),
        options(1000),
        &upstream,
        config,
    ))
    .await;

    assert_eq!(upstream.call_count(), 3);
    assert_eq!(
        kinds(&out),
        vec![StatusKind::BudgetExpanded, StatusKind::BudgetExpanded]
    );
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|m| m.role == MessageRole::Assistant && !m.truncated));
    assert_eq!(upstream.budgets(), vec![Some(1000), Some(2000), Some(4000)]);
}

#[tokio::test]
async fn budget_doubles_until_clamped_then_blocks() {
    let upstream = Scripted::always_truncated();
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(1000)
        .with_token_ceiling(3000)
        .with_attempts_limit(10)
        .with_diagnostics(true);

    let out = drain(run(
        conversation(2),
        CancellationToken::new(),
        options(1000),
        &upstream,
        config,
    ))
    .await;

    assert_eq!(upstream.budgets(), vec![Some(1000), Some(2000), Some(3000)]);
    assert_eq!(
        kinds(&out),
        vec![
            StatusKind::BudgetExpanded,
            StatusKind::BudgetExpanded,
            StatusKind::ExpansionBlocked,
        ]
    );
}

#[tokio::test]
async fn baseline_used_when_options_have_no_budget() {
    let upstream = Scripted::always_truncated();
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(500)
        .with_attempts_limit(2);

    drain(run(
        conversation(2),
        CancellationToken::new(),
        CompletionOptions::new("test-model"),
        &upstream,
        config,
    ))
    .await;

    // The first attempt keeps the caller's options untouched.
    assert_eq!(upstream.budgets(), vec![None, Some(1000)]);
}

#[tokio::test]
async fn passthrough_fields_survive_retries() {
    let upstream = Scripted::always_truncated();
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(100)
        .with_attempts_limit(2);
    let opts = options(100).with_extra("temperature", serde_json::json!(0.1));

    drain(run(conversation(2), CancellationToken::new(), opts, &upstream, config)).await;

    let calls = upstream.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    for (_, o) in calls.iter() {
        assert_eq!(o.model.as_deref(), Some("test-model"));
        assert_eq!(o.extra["temperature"], serde_json::json!(0.1));
    }
}

#[tokio::test]
async fn attempt_extension_runs_until_token_ceiling() {
    let upstream = Scripted::always_truncated();
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(1000)
        .with_token_ceiling(8000)
        .with_attempts_limit(2)
        .with_attempt_extension(true)
        .with_diagnostics(true);

    let out = drain(run(
        conversation(2),
        CancellationToken::new(),
        options(1000),
        &upstream,
        config,
    ))
    .await;

    assert_eq!(
        upstream.budgets(),
        vec![Some(1000), Some(2000), Some(4000), Some(8000)]
    );
    assert_eq!(
        kinds(&out),
        vec![
            StatusKind::BudgetExpanded,
            StatusKind::AttemptExtended,
            StatusKind::BudgetExpanded,
            StatusKind::AttemptExtended,
            StatusKind::BudgetExpanded,
            StatusKind::AttemptExtended,
            StatusKind::ExpansionBlocked,
        ]
    );
}

#[tokio::test]
async fn only_finished_attempt_content_is_delivered() {
    let upstream = Scripted::new(|n| match n {
        0 => vec![Ok(Message::assistant_text("half an ans").with_truncated(true))],
        _ => vec![Ok(Message::assistant_text("the whole answer").with_finish_reason("stop"))],
    });
    let config = ResilienceConfig::default().with_baseline_max_tokens(256);

    let out = drain(run(
        conversation(2),
        CancellationToken::new(),
        options(256),
        &upstream,
        config,
    ))
    .await;

    assert_eq!(upstream.call_count(), 2);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].text(), "the whole answer");
}

// ── Compaction ───────────────────────────────────────────────────────

#[tokio::test]
async fn compaction_happens_on_at_most_one_attempt() {
    let upstream = Scripted::always_truncated();
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(1000)
        .with_token_ceiling(1_000_000)
        .with_attempts_limit(6)
        .with_retain_last_n(2)
        .with_legend_header("EARLIER:")
        .with_diagnostics(true);
    let original = conversation(10);

    let out = drain(run(
        original.clone(),
        CancellationToken::new(),
        options(1000),
        &upstream,
        config,
    ))
    .await;

    let sent = upstream.sent_messages();
    assert_eq!(sent.len(), 6);
    assert_eq!(sent[0], original);
    let changes = sent.windows(2).filter(|w| w[0] != w[1]).count();
    assert_eq!(changes, 1, "working messages must change exactly once");

    let compacted = &sent[1];
    assert_eq!(compacted.len(), 3);
    assert!(compacted[0].text().starts_with("EARLIER:\n"));
    assert_eq!(&compacted[1..], &original[8..]);

    let compactions = kinds(&out)
        .into_iter()
        .filter(|k| *k == StatusKind::ConversationCompacted)
        .count();
    assert_eq!(compactions, 1);
    assert_eq!(kinds(&out)[0], StatusKind::ConversationCompacted);
}

#[tokio::test]
async fn compaction_keeps_or_drops_system_message() {
    let mut original = vec![Message::system("rules")];
    original.extend(conversation(9));

    for supported in [true, false] {
        let upstream = Scripted::always_truncated();
        let config = ResilienceConfig::default()
            .with_baseline_max_tokens(100)
            .with_attempts_limit(2)
            .with_retain_last_n(2)
            .with_system_message_support(supported);

        drain(run(
            original.clone(),
            CancellationToken::new(),
            options(100),
            &upstream,
            config,
        ))
        .await;

        let retry = &upstream.sent_messages()[1];
        assert_eq!(retry[0].role == MessageRole::System, supported);
        assert_eq!(retry.len(), if supported { 4 } else { 3 });
    }
}

// ── Cancellation ─────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_before_start_emits_nothing() {
    let upstream = Scripted::always_truncated();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let out = drain(run(
        conversation(2),
        cancel,
        options(100),
        &upstream,
        ResilienceConfig::default().with_diagnostics(true),
    ))
    .await;

    assert!(out.is_empty());
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn cancel_between_attempts_stops_silently() {
    let upstream = Scripted::always_truncated();
    let cancel = CancellationToken::new();
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(1000)
        .with_attempts_limit(5)
        .with_diagnostics(true);

    let mut stream = run(conversation(2), cancel.clone(), options(1000), &upstream, config);
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.status_kind(), Some(StatusKind::BudgetExpanded));

    cancel.cancel();
    assert!(stream.next().await.is_none());
    drop(stream);
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn cancel_suppresses_remaining_status_messages() {
    let upstream = Scripted::always_truncated();
    let cancel = CancellationToken::new();
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(1000)
        .with_retain_last_n(1)
        .with_diagnostics(true);

    let mut stream = run(conversation(6), cancel.clone(), options(1000), &upstream, config);
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.status_kind(), Some(StatusKind::ConversationCompacted));

    cancel.cancel();
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn cancel_mid_attempt_stops_forwarding() {
    let upstream = Scripted::new(|_| {
        vec![
            Ok(Message::assistant_text("a")),
            Ok(Message::assistant_text("b")),
            Ok(Message::assistant_text("c")),
        ]
    });
    let cancel = CancellationToken::new();

    let mut stream = run(
        conversation(2),
        cancel.clone(),
        options(100),
        &upstream,
        ResilienceConfig::default(),
    );
    assert_eq!(stream.next().await.unwrap().unwrap().text(), "a");
    cancel.cancel();
    assert!(stream.next().await.is_none());
}

/// Cancels the run's token while producing its first item, which is an
/// error.
struct CancelThenFail {
    cancel: CancellationToken,
}

impl StreamFn for CancelThenFail {
    fn stream(&self, _: Vec<Message>, _: CompletionOptions) -> MessageStream<'_> {
        let cancel = self.cancel.clone();
        Box::pin(futures::stream::once(async move {
            cancel.cancel();
            Err(StreamError::transport("connection reset"))
        }))
    }
}

#[tokio::test]
async fn error_raised_after_cancel_is_not_emitted() {
    let cancel = CancellationToken::new();
    let upstream = CancelThenFail {
        cancel: cancel.clone(),
    };

    let out: Vec<_> = run(
        conversation(2),
        cancel,
        options(100),
        &upstream,
        ResilienceConfig::default().with_diagnostics(true),
    )
    .collect()
    .await;

    assert!(out.is_empty(), "emitted after cancel: {}", out.len());
}

// ── Passthrough and errors ───────────────────────────────────────────

#[tokio::test]
async fn untruncated_stream_forwarded_in_order_once() {
    let script = || -> Vec<Result<Message, StreamError>> {
        vec![
            Ok(Message::assistant_text("one")),
            Ok(Message::tool_result("c1", "two")),
            Ok(Message::assistant_text("three").with_finish_reason("stop")),
        ]
    };

    for config in [
        ResilienceConfig::default(),
        ResilienceConfig::passthrough(),
        ResilienceConfig::default()
            .with_diagnostics(true)
            .with_attempt_extension(true)
            .with_attempts_limit(1),
    ] {
        let upstream = Scripted::new(move |_| script());
        let out = drain(run(
            conversation(3),
            CancellationToken::new(),
            options(100),
            &upstream,
            config,
        ))
        .await;

        assert_eq!(upstream.call_count(), 1);
        let texts: Vec<String> = out.iter().map(Message::text).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }
}

#[tokio::test]
async fn truncation_is_observational_without_auto_expand() {
    let upstream = Scripted::always_truncated();
    let out = drain(run(
        conversation(2),
        CancellationToken::new(),
        options(100),
        &upstream,
        ResilienceConfig::passthrough().with_diagnostics(true),
    ))
    .await;

    assert_eq!(upstream.call_count(), 1);
    assert_eq!(out.len(), 1);
    assert!(out[0].is_truncated_assistant());
}

#[tokio::test]
async fn transport_error_ends_the_run() {
    let upstream = Scripted::new(|n| match n {
        0 => vec![Ok(Message::assistant_text("x").with_truncated(true))],
        _ => vec![
            Ok(Message::assistant_text("partial retry")),
            Err(StreamError::transport("connection reset")),
            Ok(Message::assistant_text("never seen")),
        ],
    });
    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(100)
        .with_attempts_limit(5);

    let out: Vec<_> = run(
        conversation(2),
        CancellationToken::new(),
        options(100),
        &upstream,
        config,
    )
    .collect()
    .await;

    assert_eq!(upstream.call_count(), 2);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].as_ref().unwrap().text(), "partial retry");
    assert_eq!(
        out[1].as_ref().unwrap_err().to_string(),
        "connection reset"
    );
}

// ── Composition ──────────────────────────────────────────────────────

#[tokio::test]
async fn resilient_wrapper_is_a_stream_fn() {
    let upstream = Scripted::new(|n| match n {
        0 => vec![Ok(Message::assistant_text("cut").with_truncated(true))],
        _ => vec![Ok(Message::assistant_text("done"))],
    });
    let wrapped = Resilient::new(
        upstream,
        ResilienceConfig::default().with_baseline_max_tokens(64),
    );

    let composed: &dyn StreamFn = &wrapped;
    let out = drain(composed.stream(conversation(2), options(64))).await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].text(), "done");

    // Runs are independent: a second call starts from attempt one again.
    let out = drain(wrapped.stream(conversation(2), options(64))).await;
    assert_eq!(out[0].text(), "done");
}

#[tokio::test]
async fn cancelling_wrapper_cancels_its_runs() {
    let wrapped = Resilient::new(
        Scripted::new(|_| vec![Ok(Message::assistant_text("hi"))]),
        ResilienceConfig::default(),
    );
    wrapped.cancellation().cancel();

    let out = drain(wrapped.stream(conversation(2), options(64))).await;
    assert!(out.is_empty());
}
