//! gRPC-mode dispatch on top of tonic's server machinery.
//!
//! tonic handles framing, compression and trailers; each RPC shape gets a
//! small service that hands the decoded message (or lazy message source) to
//! the bound handler method.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tokio::sync::oneshot;
use tonic::server::{ClientStreamingService, Grpc, ServerStreamingService, StreamingService, UnaryService};
use tonic::{Status, Streaming};

use crate::callback::{Callback, CallbackScheduler};
use crate::codec::{Output, Reply};
use crate::dispatch::{deliver, invoke, Admission, Lease};
use crate::error::DispatchError;
use crate::handler::grpc::{BoundRpc, ReplyFuture, StreamFuture};
use crate::handler::{GrpcRequest, GrpcRoutes};
use crate::observability::metrics;
use crate::streaming::sink::Outbound;
use crate::streaming::source::InputFault;
use crate::streaming::{DynamicCodec, MessageSource, MessageStream};

const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Turns gRPC calls into handler invocations.
pub struct GrpcDispatcher {
    api: Arc<str>,
    routes: GrpcRoutes,
    admission: Admission,
    scheduler: CallbackScheduler,
    max_message_bytes: usize,
}

impl GrpcDispatcher {
    pub(crate) fn new(api: Arc<str>, routes: GrpcRoutes, admission: Admission, max_message_bytes: usize) -> Self {
        Self {
            scheduler: CallbackScheduler::new(Arc::clone(&api)),
            api,
            routes,
            admission,
            max_message_bytes,
        }
    }

    /// Dispatch a call to `/{service}/{method}`.
    pub async fn dispatch(&self, service: &str, method: &str, request: Request<Body>) -> Response {
        let started = Instant::now();

        let bound = match self.routes.resolve(service, method) {
            Some(bound) => bound,
            None => {
                let err = DispatchError::MethodNotAllowed {
                    operation: format!("{}/{}", service, method),
                    allowed: self.routes.names(),
                };
                return self.reject(err, method, started);
            }
        };

        let lease = match self.admission.admit().await {
            Ok(lease) => lease,
            Err(err) => return self.reject(err, method, started),
        };

        let method: Arc<str> = Arc::from(method);
        let codec = DynamicCodec::new(bound.rpc.input.clone(), Arc::clone(&self.api), Arc::clone(&method));
        let mut grpc = Grpc::new(codec).max_decoding_message_size(self.max_message_bytes);
        let ctx = RpcContext {
            api: Arc::clone(&self.api),
            method,
            output: bound.rpc.output.clone(),
            lease: lease.clone(),
            started,
            fault: InputFault::new(),
        };
        let (callback_tx, mut callback_rx) = oneshot::channel();

        let response = match &bound.call {
            BoundRpc::Unary(call) => {
                let service = UnaryRpc {
                    call: Arc::clone(call),
                    ctx,
                    callback: Some(callback_tx),
                };
                grpc.unary(service, request).await
            }
            BoundRpc::ClientStreaming(call) => {
                let service = ClientStreamingRpc {
                    call: Arc::clone(call),
                    ctx,
                    callback: Some(callback_tx),
                };
                grpc.client_streaming(service, request).await
            }
            BoundRpc::ServerStreaming(call) => {
                let service = ServerStreamingRpc {
                    call: Arc::clone(call),
                    ctx,
                };
                grpc.server_streaming(service, request).await
            }
            BoundRpc::Bidirectional(call) => {
                let service = BidirectionalRpc {
                    call: Arc::clone(call),
                    ctx,
                };
                grpc.streaming(service, request).await
            }
        };

        let callback = callback_rx.try_recv().ok();
        deliver(response.map(Body::new), Some(lease), callback, &self.scheduler)
    }

    fn reject(&self, err: DispatchError, method: &str, started: Instant) -> Response {
        err.log(&self.api, method);
        let status = err.to_status();
        metrics::record_request(&self.api, method, metrics::code_label(status.code()), started);
        status_response(status)
    }
}

impl std::fmt::Debug for GrpcDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcDispatcher")
            .field("api", &self.api)
            .field("service", &self.routes.service())
            .field("admission", &self.admission)
            .finish()
    }
}

/// Trailers-only response carrying `status`.
pub(crate) fn status_response(status: Status) -> Response {
    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    if let Err(e) = status.add_header(headers) {
        tracing::error!(error = %e, "Failed to encode grpc status headers");
    }
    response
}

/// Per-call state shared by the shape-specific services.
#[derive(Clone)]
struct RpcContext {
    api: Arc<str>,
    method: Arc<str>,
    output: MessageDescriptor,
    lease: Lease,
    started: Instant,
    fault: InputFault,
}

impl RpcContext {
    fn request<T>(&self, message: T, metadata: tonic::metadata::MetadataMap) -> GrpcRequest<T> {
        GrpcRequest::new(message, metadata, Arc::clone(&self.method), self.output.clone())
    }

    fn source(&self, streaming: Streaming<DynamicMessage>) -> MessageSource {
        MessageSource::new(streaming.boxed(), Arc::clone(&self.api), Arc::clone(&self.method))
            .with_fault(self.fault.clone())
    }

    /// Check a unary result against the declared output type.
    fn unary_reply(&self, reply: Reply) -> Result<(DynamicMessage, Option<Callback>), DispatchError> {
        let (output, callback) = reply.into_parts();
        match output {
            Output::Message(message) if message.descriptor().full_name() == self.output.full_name() => {
                Ok((message, callback))
            }
            Output::Message(message) => Err(DispatchError::Encode(format!(
                "returned '{}' where '{}' was declared",
                message.descriptor().full_name(),
                self.output.full_name()
            ))),
            other => Err(DispatchError::Encode(format!(
                "{} result returned from a grpc method",
                other.variant()
            ))),
        }
    }

    fn succeed(&self) {
        metrics::record_request(&self.api, &self.method, metrics::code_label(tonic::Code::Ok), self.started);
    }

    fn fail(&self, err: DispatchError) -> Status {
        err.log(&self.api, &self.method);
        self.finish_with(err.to_status())
    }

    fn finish_with(&self, status: Status) -> Status {
        metrics::record_request(&self.api, &self.method, metrics::code_label(status.code()), self.started);
        status
    }

    /// A malformed request message outranks whatever the handler made of the
    /// messages before it. The codec has already logged it.
    fn input_fault(&self) -> Option<Status> {
        self.fault.status().map(|status| self.finish_with(status))
    }

    async fn finish_unary(
        self,
        fut: ReplyFuture,
        callback_tx: Option<oneshot::Sender<Callback>>,
    ) -> Result<tonic::Response<DynamicMessage>, Status> {
        let result = invoke(fut, self.lease.clone()).await;
        if let Some(status) = self.input_fault() {
            return Err(status);
        }
        match result.and_then(|reply| self.unary_reply(reply)) {
            Ok((message, callback)) => {
                if let (Some(callback), Some(tx)) = (callback, callback_tx) {
                    let _ = tx.send(callback);
                }
                self.succeed();
                Ok(tonic::Response::new(message))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn finish_stream(self, fut: StreamFuture) -> Result<tonic::Response<Outbound>, Status> {
        let result = invoke(fut, self.lease.clone()).await;
        if let Some(status) = self.input_fault() {
            return Err(status);
        }
        match result {
            // Counted once the stream ends, see Outbound.
            Ok(stream) => Ok(tonic::Response::new(self.outbound(stream))),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn outbound(&self, stream: MessageStream) -> Outbound {
        Outbound::new(stream, self.output.clone(), Arc::clone(&self.api), Arc::clone(&self.method))
            .started_at(self.started)
            .with_fault(self.fault.clone())
    }
}

type CallFn<Req, Fut> = Arc<dyn Fn(GrpcRequest<Req>) -> Fut + Send + Sync>;
type GrpcFuture<T> = BoxFuture<'static, Result<tonic::Response<T>, Status>>;

struct UnaryRpc {
    call: CallFn<DynamicMessage, ReplyFuture>,
    ctx: RpcContext,
    callback: Option<oneshot::Sender<Callback>>,
}

impl UnaryService<DynamicMessage> for UnaryRpc {
    type Response = DynamicMessage;
    type Future = GrpcFuture<DynamicMessage>;

    fn call(&mut self, request: tonic::Request<DynamicMessage>) -> Self::Future {
        let (metadata, _, message) = request.into_parts();
        let fut = (self.call)(self.ctx.request(message, metadata));
        Box::pin(self.ctx.clone().finish_unary(fut, self.callback.take()))
    }
}

struct ClientStreamingRpc {
    call: CallFn<MessageSource, ReplyFuture>,
    ctx: RpcContext,
    callback: Option<oneshot::Sender<Callback>>,
}

impl ClientStreamingService<DynamicMessage> for ClientStreamingRpc {
    type Response = DynamicMessage;
    type Future = GrpcFuture<DynamicMessage>;

    fn call(&mut self, request: tonic::Request<Streaming<DynamicMessage>>) -> Self::Future {
        let (metadata, _, streaming) = request.into_parts();
        let source = self.ctx.source(streaming);
        let fut = (self.call)(self.ctx.request(source, metadata));
        Box::pin(self.ctx.clone().finish_unary(fut, self.callback.take()))
    }
}

struct ServerStreamingRpc {
    call: CallFn<DynamicMessage, StreamFuture>,
    ctx: RpcContext,
}

impl ServerStreamingService<DynamicMessage> for ServerStreamingRpc {
    type Response = DynamicMessage;
    type ResponseStream = Outbound;
    type Future = GrpcFuture<Outbound>;

    fn call(&mut self, request: tonic::Request<DynamicMessage>) -> Self::Future {
        let (metadata, _, message) = request.into_parts();
        let fut = (self.call)(self.ctx.request(message, metadata));
        Box::pin(self.ctx.clone().finish_stream(fut))
    }
}

struct BidirectionalRpc {
    call: CallFn<MessageSource, StreamFuture>,
    ctx: RpcContext,
}

impl StreamingService<DynamicMessage> for BidirectionalRpc {
    type Response = DynamicMessage;
    type ResponseStream = Outbound;
    type Future = GrpcFuture<Outbound>;

    fn call(&mut self, request: tonic::Request<Streaming<DynamicMessage>>) -> Self::Future {
        let (metadata, _, streaming) = request.into_parts();
        let source = self.ctx.source(streaming);
        let fut = (self.call)(self.ctx.request(source, metadata));
        Box::pin(self.ctx.clone().finish_stream(fut))
    }
}
