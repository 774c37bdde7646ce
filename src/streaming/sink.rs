//! Outbound message sequences for server-streaming and bidirectional RPCs.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::stream::{BoxStream, Stream};
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tokio::sync::mpsc;
use tonic::{Code, Status};

use crate::error::{DispatchError, HandlerError};
use crate::observability::metrics;
use crate::streaming::source::InputFault;

/// Lazy, finite sequence of response messages produced by a handler.
///
/// The transport pulls one item at a time, so a slow client suspends the
/// producer instead of buffering results in memory.
pub type MessageStream = BoxStream<'static, Result<DynamicMessage, HandlerError>>;

/// Producer half returned by [`channel`].
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::Sender<Result<DynamicMessage, HandlerError>>,
}

impl StreamSender {
    /// Send one message, waiting until the transport has taken the previous one.
    ///
    /// Fails once the client has gone away; producers should stop then.
    pub async fn send(&self, message: DynamicMessage) -> Result<(), HandlerError> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| HandlerError::new("response stream closed by peer"))
    }

    /// End the stream with an error status.
    pub async fn fail(&self, error: HandlerError) {
        let _ = self.tx.send(Err(error)).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A bounded producer/consumer pair for writing a response stream from a
/// separate task, independently of reading the request stream.
pub fn channel() -> (StreamSender, MessageStream) {
    let (tx, rx) = mpsc::channel(1);
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (StreamSender { tx }, Box::pin(stream))
}

/// Adapts a handler stream for the transport.
///
/// Checks each message against the RPC's declared output type, stops after
/// the first error, and logs an abort if the transport drops it early. The
/// call is counted in the request metrics once the stream finishes, fails or
/// is dropped.
pub(crate) struct Outbound {
    inner: MessageStream,
    output: MessageDescriptor,
    api: Arc<str>,
    method: Arc<str>,
    started: Instant,
    fault: InputFault,
    done: bool,
}

impl Outbound {
    pub(crate) fn new(inner: MessageStream, output: MessageDescriptor, api: Arc<str>, method: Arc<str>) -> Self {
        Self {
            inner,
            output,
            api,
            method,
            started: Instant::now(),
            fault: InputFault::new(),
            done: false,
        }
    }

    /// Measure the call from `started` rather than from the first poll.
    pub(crate) fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    /// End with INVALID_ARGUMENT once `fault` records a malformed request message.
    pub(crate) fn with_fault(mut self, fault: InputFault) -> Self {
        self.fault = fault;
        self
    }

    fn finish(&mut self, code: Code) {
        self.done = true;
        metrics::record_request(&self.api, &self.method, metrics::code_label(code), self.started);
    }

    fn fail(&mut self, err: DispatchError) -> Poll<Option<Result<DynamicMessage, Status>>> {
        err.log(&self.api, &self.method);
        let status = err.to_status();
        self.finish(status.code());
        Poll::Ready(Some(Err(status)))
    }

    fn reject_input(&mut self, status: Status) -> Poll<Option<Result<DynamicMessage, Status>>> {
        self.finish(status.code());
        Poll::Ready(Some(Err(status)))
    }
}

impl Stream for Outbound {
    type Item = Result<DynamicMessage, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }
        if let Some(status) = this.fault.status() {
            return this.reject_input(status);
        }

        let polled = this.inner.as_mut().poll_next(cx);
        if polled.is_ready() {
            // The request stream may have hit a malformed message during this poll.
            if let Some(status) = this.fault.status() {
                return this.reject_input(status);
            }
        }

        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.finish(Code::Ok);
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => this.fail(DispatchError::Handler(e)),
            Poll::Ready(Some(Ok(message))) => {
                if message.descriptor().full_name() != this.output.full_name() {
                    let detail = format!(
                        "streamed '{}' where '{}' was declared",
                        message.descriptor().full_name(),
                        this.output.full_name()
                    );
                    return this.fail(DispatchError::Encode(detail));
                }
                Poll::Ready(Some(Ok(message)))
            }
        }
    }
}

impl Drop for Outbound {
    fn drop(&mut self) {
        if !self.done {
            DispatchError::StreamAbort("response stream dropped before completion".to_string())
                .log(&self.api, &self.method);
            metrics::record_request(&self.api, &self.method, metrics::code_label(Code::Cancelled), self.started);
        }
    }
}
