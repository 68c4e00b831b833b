//! Tracing subscriber layer that captures log events into a [`LogBuffer`].
//!
//! Hosts that render their own UI (a chat panel, an editor status view) can
//! install [`CaptureLayer`] next to their usual formatter and drain the
//! buffer at their own pace. The buffer has its own mutex, so logging from
//! tokio workers never contends with anything but another log call.

use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing::Subscriber;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::registry::LookupSpan;

/// Buffered lines above which the oldest entries are dropped.
pub const MAX_LOG_LINES: usize = 2000;
/// Number of lines kept after a trim.
pub const LOG_TRIM_TO: usize = 1500;

/// Severity of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// A captured log event.
#[derive(Debug, Clone)]
pub struct LogLine {
    /// Local wall-clock time, `HH:MM:SS`.
    pub time: String,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    /// Structured fields other than `message`, in recording order.
    pub fields: Vec<(String, String)>,
}

impl LogLine {
    /// Value of a structured field, if recorded.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Message followed by `{k=v, ...}` when there are extra fields.
    pub fn render(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras: Vec<String> = self.fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
        if self.message.is_empty() {
            extras.join(" ")
        } else {
            format!("{} {{{}}}", self.message, extras.join(", "))
        }
    }
}

/// A shared buffer of pending log lines.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<LogLine>>>);

impl LogBuffer {
    /// Drain all pending log lines from the buffer, returning them.
    pub fn drain(&self) -> Vec<LogLine> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *buf)
    }

    fn push(&self, line: LogLine) {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.push(line);
        // Cap the buffer so a burst of logs before the next drain
        // doesn't consume unbounded memory.
        if buf.len() > MAX_LOG_LINES {
            let trim_to = buf.len() - LOG_TRIM_TO;
            buf.drain(..trim_to);
        }
    }
}

/// A [`tracing_subscriber::Layer`] that captures every event into a
/// [`LogBuffer`].
pub struct CaptureLayer {
    buffer: LogBuffer,
}

impl CaptureLayer {
    /// Create a new layer and the [`LogBuffer`] it writes into.
    pub fn new() -> (Self, LogBuffer) {
        let buffer = LogBuffer::default();
        (
            Self {
                buffer: buffer.clone(),
            },
            buffer,
        )
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for CaptureLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogLine {
            time: Local::now().format("%H:%M:%S").to_string(),
            level: LogLevel::from(event.metadata().level()),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Visitor that extracts the message and extra fields from a tracing event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let raw = format!("{value:?}");
        if field.name() == "message" {
            self.message = raw
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .map(str::to_string)
                .unwrap_or(raw);
        } else {
            self.fields.push((field.name().to_string(), raw));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}
