//! Inbound message sequence for client-streaming and bidirectional RPCs.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures_util::stream::{BoxStream, Stream, StreamExt};
use prost_reflect::DynamicMessage;
use tonic::{Code, Status};

use crate::error::DispatchError;

/// Set when an inbound sequence ended on a malformed message.
///
/// Shared between the source and the call that owns it, so the call can
/// answer INVALID_ARGUMENT instead of whatever the handler built from the
/// messages before it.
#[derive(Debug, Clone, Default)]
pub(crate) struct InputFault {
    status: Arc<OnceLock<Status>>,
}

impl InputFault {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn record(&self, status: Status) {
        let _ = self.status.set(status);
    }

    /// The decode failure, if one ended the input.
    pub(crate) fn status(&self) -> Option<Status> {
        self.status.get().cloned()
    }
}

/// Lazily produced, finite, non-restartable sequence of request messages.
///
/// Messages are yielded as they arrive on the wire; the handler is invoked
/// before the client has finished sending. The sequence ends when the client
/// half-closes. A disconnect or transport error also ends it (it is logged
/// as a stream abort, never surfaced to the handler as an error). A message
/// that fails to decode ends it too, and the call then fails with
/// INVALID_ARGUMENT whatever the handler returns.
pub struct MessageSource {
    inner: Option<BoxStream<'static, Result<DynamicMessage, Status>>>,
    api: Arc<str>,
    method: Arc<str>,
    received: u64,
    fault: InputFault,
}

impl MessageSource {
    pub(crate) fn new(
        inner: BoxStream<'static, Result<DynamicMessage, Status>>,
        api: Arc<str>,
        method: Arc<str>,
    ) -> Self {
        Self {
            inner: Some(inner),
            api,
            method,
            received: 0,
            fault: InputFault::new(),
        }
    }

    /// Report decode failures to `fault` instead of a private slot.
    pub(crate) fn with_fault(mut self, fault: InputFault) -> Self {
        self.fault = fault;
        self
    }

    /// A source over already-built messages, for exercising handlers directly.
    pub fn from_messages(messages: Vec<DynamicMessage>) -> Self {
        let inner = futures_util::stream::iter(messages.into_iter().map(Ok)).boxed();
        Self::new(inner, Arc::from("local"), Arc::from("local"))
    }

    /// Next message, or `None` once the sequence has ended.
    pub async fn next(&mut self) -> Option<DynamicMessage> {
        StreamExt::next(self).await
    }

    /// Number of messages yielded so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for MessageSource {
    type Item = DynamicMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let inner = match this.inner.as_mut() {
            Some(inner) => inner,
            None => return Poll::Ready(None),
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(message))) => {
                this.received += 1;
                Poll::Ready(Some(message))
            }
            Poll::Ready(Some(Err(status))) => {
                this.inner = None;
                if status.code() == Code::InvalidArgument {
                    // Already logged by the codec.
                    this.fault.record(status);
                } else {
                    DispatchError::StreamAbort(status.message().to_string()).log(&this.api, &this.method);
                }
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
        }
    }
}

impl std::fmt::Debug for MessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSource")
            .field("method", &self.method)
            .field("received", &self.received)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::tests::text_message;

    #[tokio::test]
    async fn yields_in_order_then_ends_for_good() {
        let mut source = MessageSource::from_messages(vec![text_message("a"), text_message("b")]);
        assert_eq!(source.next().await.unwrap().get_field_by_name("value").unwrap().as_str(), Some("a"));
        assert_eq!(source.next().await.unwrap().get_field_by_name("value").unwrap().as_str(), Some("b"));
        assert!(source.next().await.is_none());
        assert!(source.is_finished());
        assert!(source.next().await.is_none());
        assert_eq!(source.received(), 2);
    }

    #[tokio::test]
    async fn transport_error_ends_the_sequence() {
        let items = vec![Ok(text_message("a")), Err(Status::cancelled("client went away")), Ok(text_message("late"))];
        let inner = futures_util::stream::iter(items).boxed();
        let mut source = MessageSource::new(inner, Arc::from("iris"), Arc::from("Collect"));

        assert!(source.next().await.is_some());
        assert!(source.next().await.is_none());
        assert!(source.next().await.is_none());
        assert_eq!(source.received(), 1);
        assert!(source.fault.status().is_none());
    }

    #[tokio::test]
    async fn malformed_message_ends_the_sequence_and_records_the_fault() {
        let items = vec![
            Ok(text_message("a")),
            Err(Status::invalid_argument("request is not a valid echo.Text")),
            Ok(text_message("late")),
        ];
        let fault = InputFault::new();
        let inner = futures_util::stream::iter(items).boxed();
        let mut source =
            MessageSource::new(inner, Arc::from("iris"), Arc::from("Collect")).with_fault(fault.clone());

        assert!(source.next().await.is_some());
        assert!(fault.status().is_none());
        assert!(source.next().await.is_none());
        assert_eq!(fault.status().map(|s| s.code()), Some(Code::InvalidArgument));
    }
}
