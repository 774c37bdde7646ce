//! gRPC handler contract: one method per RPC of the schema's single service.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::metadata::MetadataMap;

use crate::codec::Reply;
use crate::error::{HandlerError, StartupError};
use crate::handler::InitContext;
use crate::schema::{RpcDescriptor, ServiceSchema, StreamingShape};
use crate::streaming::{MessageSource, MessageStream};

pub(crate) type ReplyFuture = BoxFuture<'static, Result<Reply, HandlerError>>;
pub(crate) type StreamFuture = BoxFuture<'static, Result<MessageStream, HandlerError>>;

/// A request handler served over gRPC.
///
/// `new` runs exactly once, on the blocking pool, before the listener is
/// bound; `ctx.messages()` gives access to the schema's message types.
pub trait GrpcHandler: Sized + Send + Sync + 'static {
    fn new(ctx: InitContext) -> Result<Self, HandlerError>;

    /// Register one method per RPC, with the RPC's streaming shape.
    fn methods(methods: &mut GrpcMethods<Self>);
}

/// Per-call input for a gRPC method.
#[derive(Debug)]
pub struct GrpcRequest<T> {
    pub message: T,
    pub metadata: MetadataMap,
    /// RPC name, e.g. `Classify`.
    pub method: Arc<str>,
    output: MessageDescriptor,
}

impl<T> GrpcRequest<T> {
    pub(crate) fn new(message: T, metadata: MetadataMap, method: Arc<str>, output: MessageDescriptor) -> Self {
        Self {
            message,
            metadata,
            method,
            output,
        }
    }

    pub fn into_inner(self) -> T {
        self.message
    }

    /// Descriptor of the RPC's declared response type.
    pub fn output_descriptor(&self) -> &MessageDescriptor {
        &self.output
    }

    /// An empty response message of the declared type.
    pub fn new_output(&self) -> DynamicMessage {
        DynamicMessage::new(self.output.clone())
    }
}

type UnaryFn<H> = Arc<dyn Fn(Arc<H>, GrpcRequest<DynamicMessage>) -> ReplyFuture + Send + Sync>;
type ClientStreamingFn<H> = Arc<dyn Fn(Arc<H>, GrpcRequest<MessageSource>) -> ReplyFuture + Send + Sync>;
type ServerStreamingFn<H> = Arc<dyn Fn(Arc<H>, GrpcRequest<DynamicMessage>) -> StreamFuture + Send + Sync>;
type BidirectionalFn<H> = Arc<dyn Fn(Arc<H>, GrpcRequest<MessageSource>) -> StreamFuture + Send + Sync>;

enum Entry<H> {
    Unary(UnaryFn<H>),
    ClientStreaming(ClientStreamingFn<H>),
    ServerStreaming(ServerStreamingFn<H>),
    Bidirectional(BidirectionalFn<H>),
}

impl<H: Send + Sync + 'static> Entry<H> {
    fn shape(&self) -> StreamingShape {
        match self {
            Entry::Unary(_) => StreamingShape::Unary,
            Entry::ClientStreaming(_) => StreamingShape::ClientStreaming,
            Entry::ServerStreaming(_) => StreamingShape::ServerStreaming,
            Entry::Bidirectional(_) => StreamingShape::Bidirectional,
        }
    }

    fn bind(self, handler: Arc<H>) -> BoundRpc {
        match self {
            Entry::Unary(f) => BoundRpc::Unary(Arc::new(move |req: GrpcRequest<DynamicMessage>| {
                f(Arc::clone(&handler), req)
            })),
            Entry::ClientStreaming(f) => BoundRpc::ClientStreaming(Arc::new(move |req: GrpcRequest<MessageSource>| {
                f(Arc::clone(&handler), req)
            })),
            Entry::ServerStreaming(f) => BoundRpc::ServerStreaming(Arc::new(move |req: GrpcRequest<DynamicMessage>| {
                f(Arc::clone(&handler), req)
            })),
            Entry::Bidirectional(f) => BoundRpc::Bidirectional(Arc::new(move |req: GrpcRequest<MessageSource>| {
                f(Arc::clone(&handler), req)
            })),
        }
    }
}

/// Method table a [`GrpcHandler`] fills in at startup.
pub struct GrpcMethods<H> {
    table: BTreeMap<String, Entry<H>>,
}

impl<H: Send + Sync + 'static> GrpcMethods<H> {
    pub(crate) fn new() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    /// Single message in, single message out.
    pub fn unary<F, Fut, R>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, GrpcRequest<DynamicMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Into<Reply>,
    {
        let call: UnaryFn<H> = Arc::new(move |handler: Arc<H>, req: GrpcRequest<DynamicMessage>| {
            f(handler, req).map(|result| result.map(Into::<Reply>::into)).boxed()
        });
        self.table.insert(name.to_string(), Entry::Unary(call));
        self
    }

    /// Lazy message sequence in, single message out.
    pub fn client_streaming<F, Fut, R>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, GrpcRequest<MessageSource>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Into<Reply>,
    {
        let call: ClientStreamingFn<H> = Arc::new(move |handler: Arc<H>, req: GrpcRequest<MessageSource>| {
            f(handler, req).map(|result| result.map(Into::<Reply>::into)).boxed()
        });
        self.table.insert(name.to_string(), Entry::ClientStreaming(call));
        self
    }

    /// Single message in, lazy message sequence out.
    pub fn server_streaming<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, GrpcRequest<DynamicMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MessageStream, HandlerError>> + Send + 'static,
    {
        let call: ServerStreamingFn<H> =
            Arc::new(move |handler: Arc<H>, req: GrpcRequest<DynamicMessage>| f(handler, req).boxed());
        self.table.insert(name.to_string(), Entry::ServerStreaming(call));
        self
    }

    /// Lazy sequences in both directions, read and written independently.
    pub fn streaming<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, GrpcRequest<MessageSource>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MessageStream, HandlerError>> + Send + 'static,
    {
        let call: BidirectionalFn<H> =
            Arc::new(move |handler: Arc<H>, req: GrpcRequest<MessageSource>| f(handler, req).boxed());
        self.table.insert(name.to_string(), Entry::Bidirectional(call));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Check the table against the service's RPCs.
    ///
    /// Every RPC needs a method of the same name and streaming shape, and
    /// every method must name an RPC.
    pub(crate) fn validate(&self, schema: &ServiceSchema) -> Result<(), StartupError> {
        let rpcs = schema.rpcs();
        let mut problems = Vec::new();

        for rpc in &rpcs {
            match self.table.get(&rpc.name) {
                None => problems.push(format!("missing method for rpc '{}' ({})", rpc.name, rpc.shape)),
                Some(entry) if entry.shape() != rpc.shape => problems.push(format!(
                    "method '{}' is registered as {} but the rpc is {}",
                    rpc.name,
                    entry.shape(),
                    rpc.shape
                )),
                Some(_) => {}
            }
        }
        for name in self.table.keys() {
            if !rpcs.iter().any(|rpc| &rpc.name == name) {
                problems.push(format!("method '{}' matches no rpc of {}", name, schema.service_name()));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(StartupError::Contract(problems.join("; ")))
        }
    }

    /// Validate, then bind every method to the constructed `handler`.
    pub(crate) fn bind(mut self, handler: Arc<H>, schema: &ServiceSchema) -> Result<GrpcRoutes, StartupError> {
        self.validate(schema)?;
        let mut rpcs = BTreeMap::new();
        for rpc in schema.rpcs() {
            if let Some(entry) = self.table.remove(&rpc.name) {
                let call = entry.bind(Arc::clone(&handler));
                rpcs.insert(rpc.name.clone(), BoundMethod { rpc, call });
            }
        }
        Ok(GrpcRoutes {
            service: schema.service_name().to_string(),
            rpcs,
        })
    }
}

pub(crate) enum BoundRpc {
    Unary(Arc<dyn Fn(GrpcRequest<DynamicMessage>) -> ReplyFuture + Send + Sync>),
    ClientStreaming(Arc<dyn Fn(GrpcRequest<MessageSource>) -> ReplyFuture + Send + Sync>),
    ServerStreaming(Arc<dyn Fn(GrpcRequest<DynamicMessage>) -> StreamFuture + Send + Sync>),
    Bidirectional(Arc<dyn Fn(GrpcRequest<MessageSource>) -> StreamFuture + Send + Sync>),
}

pub(crate) struct BoundMethod {
    pub(crate) rpc: RpcDescriptor,
    pub(crate) call: BoundRpc,
}

/// RPC name → bound method, built once at startup.
pub(crate) struct GrpcRoutes {
    service: String,
    rpcs: BTreeMap<String, BoundMethod>,
}

impl GrpcRoutes {
    pub(crate) fn service(&self) -> &str {
        &self.service
    }

    pub(crate) fn resolve(&self, service: &str, method: &str) -> Option<&BoundMethod> {
        if service != self.service {
            return None;
        }
        self.rpcs.get(method)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.rpcs.keys().cloned().collect()
    }
}
