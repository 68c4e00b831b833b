//! The streaming capability the controller is built on.
//!
//! A [`StreamFn`] turns `(messages, options)` into a lazy sequence of
//! [`Message`] values. Backends differ in authentication, request shape and
//! endpoint, but the controller only ever sees this one interface; each
//! provider is an implementation injected by the caller.

use crate::{CompletionOptions, Message, StreamError};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed stream of messages produced by a [`StreamFn`] (and by the
/// controller itself).
pub type MessageStream<'a> = Pin<Box<dyn Stream<Item = Result<Message, StreamError>> + Send + 'a>>;

/// Send messages plus options, get an async sequence of structured messages.
///
/// Implementations may fail by yielding an `Err` item; the consumer is
/// expected to stop reading after the first error.
pub trait StreamFn: Send + Sync {
    fn stream(&self, messages: Vec<Message>, options: CompletionOptions) -> MessageStream<'_>;
}

impl<T: StreamFn + ?Sized> StreamFn for Arc<T> {
    fn stream(&self, messages: Vec<Message>, options: CompletionOptions) -> MessageStream<'_> {
        (**self).stream(messages, options)
    }
}

impl<T: StreamFn + ?Sized> StreamFn for &T {
    fn stream(&self, messages: Vec<Message>, options: CompletionOptions) -> MessageStream<'_> {
        (**self).stream(messages, options)
    }
}

/// A [`StreamFn`] backed by a closure.
///
/// ```ignore
/// let echo = FnStream::new(|messages: Vec<Message>, _opts| {
///     let last = messages.last().map(|m| m.text()).unwrap_or_default();
///     Box::pin(futures::stream::iter([Ok(Message::assistant_text(last))])) as MessageStream<'static>
/// });
/// ```
pub struct FnStream<F> {
    f: F,
}

impl<F> FnStream<F>
where
    F: Fn(Vec<Message>, CompletionOptions) -> MessageStream<'static> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> StreamFn for FnStream<F>
where
    F: Fn(Vec<Message>, CompletionOptions) -> MessageStream<'static> + Send + Sync,
{
    fn stream(&self, messages: Vec<Message>, options: CompletionOptions) -> MessageStream<'_> {
        (self.f)(messages, options)
    }
}
