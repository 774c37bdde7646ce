//! Handler runtime replica.
//!
//! ```text
//!   HTTP/1.1 or h2c                 ┌──────────────────────────────────────────────┐
//!   ───────────────────────────────▶│ http::server  (request id, trace, limits)    │
//!                                   │      │                                       │
//!                                   │      ▼                                       │
//!                                   │ dispatch::{HttpDispatcher, GrpcDispatcher}   │
//!                                   │      │ admission (permits + queue)           │
//!                                   │      │ codec (payload decode / encode)       │
//!                                   │      ▼                                       │
//!                                   │ handler instance (constructed once)          │
//!                                   │      │                                       │
//!   ◀───────────────────────────────│ response body ──▶ callback scheduler         │
//!                                   │                                              │
//!   autoscaler ────────────────────▶│ admin (/admin/in-flight) ◀── inflight        │
//!                                   └──────────────────────────────────────────────┘
//! ```
//!
//! The binary serves the built-in echo handlers; real deployments link the
//! library and call [`handler_runtime::lifecycle::run_http`] or
//! [`handler_runtime::lifecycle::run_grpc`] with their own handler type.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures_util::StreamExt;
use prost_reflect::{DynamicMessage, MessageDescriptor, Value};

use handler_runtime::codec::{FormField, Payload};
use handler_runtime::config::{load_config, ProtocolMode};
use handler_runtime::lifecycle::{run_grpc, run_http};
use handler_runtime::{
    GrpcHandler, GrpcMethods, GrpcRequest, HandlerError, HttpHandler, HttpMethods, HttpRequest,
    InitContext, MessageSource, MessageStream, Reply,
};

#[derive(Parser)]
#[command(name = "handler-runtime")]
#[command(about = "Serve a request handler over HTTP or gRPC", long_about = None)]
struct Cli {
    /// Path to the replica configuration (TOML).
    #[arg(short, long, default_value = "demos/echo.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mode = load_config(&cli.config)?.api.protocol;

    let result = match mode {
        ProtocolMode::Http => run_http::<EchoHttp>(&cli.config).await,
        ProtocolMode::Grpc => run_grpc::<EchoGrpc>(&cli.config).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "Startup failed");
        return Err(e.into());
    }
    Ok(())
}

/// Returns POSTed payloads unchanged; GET answers with the configured greeting.
struct EchoHttp {
    greeting: String,
}

impl HttpHandler for EchoHttp {
    fn new(ctx: InitContext) -> Result<Self, HandlerError> {
        let greeting = ctx.config().get_str("greeting")?.unwrap_or("hello").to_string();
        Ok(Self { greeting })
    }

    fn methods(methods: &mut HttpMethods<Self>) {
        methods
            .post(|_echo, request: HttpRequest| async move { Ok::<_, HandlerError>(echo_payload(request.payload)) })
            .get(|echo: Arc<EchoHttp>, request: HttpRequest| async move {
                let name = request.query("name").unwrap_or_else(|| "world".to_string());
                Ok::<_, HandlerError>(format!("{}, {}", echo.greeting, name))
            });
    }
}

fn echo_payload(payload: Option<Payload>) -> Reply {
    match payload {
        None => Reply::bytes(Vec::new()),
        Some(Payload::Json(value)) => Reply::json(value),
        Some(Payload::Text { value, .. }) => Reply::text(value),
        Some(Payload::Bytes(raw)) => Reply::bytes(raw),
        Some(Payload::Form(fields)) => {
            let object = fields
                .iter()
                .map(|(name, field)| {
                    let value = match field {
                        FormField::Text(text) => serde_json::Value::String(text.clone()),
                        FormField::File(file) => serde_json::json!({
                            "filename": file.filename,
                            "size": file.len(),
                        }),
                    };
                    (name.to_string(), value)
                })
                .collect::<serde_json::Map<_, _>>();
            Reply::json(serde_json::Value::Object(object))
        }
    }
}

/// Serves `demos/echo.proto`.
struct EchoGrpc {
    text: MessageDescriptor,
}

impl EchoGrpc {
    fn text(&self, value: impl Into<String>) -> DynamicMessage {
        let mut message = DynamicMessage::new(self.text.clone());
        message.set_field_by_name("value", Value::String(value.into()));
        message
    }
}

fn value_of(message: &DynamicMessage) -> String {
    message
        .get_field_by_name("value")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

impl GrpcHandler for EchoGrpc {
    fn new(ctx: InitContext) -> Result<Self, HandlerError> {
        Ok(Self {
            text: ctx.message("echo.Text")?,
        })
    }

    fn methods(methods: &mut GrpcMethods<Self>) {
        methods
            .unary("Say", |echo: Arc<EchoGrpc>, request: GrpcRequest<DynamicMessage>| async move {
                Ok::<_, HandlerError>(echo.text(value_of(&request.message)))
            })
            .client_streaming("Collect", |echo: Arc<EchoGrpc>, request: GrpcRequest<MessageSource>| async move {
                let mut source = request.into_inner();
                let mut words = Vec::new();
                while let Some(message) = source.next().await {
                    words.push(value_of(&message));
                }
                Ok::<_, HandlerError>(echo.text(words.join(" ")))
            })
            .server_streaming("Spell", |echo: Arc<EchoGrpc>, request: GrpcRequest<DynamicMessage>| async move {
                let letters: Vec<Result<DynamicMessage, HandlerError>> = value_of(&request.message)
                    .chars()
                    .map(|c| Ok(echo.text(c.to_string())))
                    .collect();
                Ok::<MessageStream, HandlerError>(futures_util::stream::iter(letters).boxed())
            })
            .streaming("Chat", |echo: Arc<EchoGrpc>, request: GrpcRequest<MessageSource>| async move {
                let replies = request
                    .into_inner()
                    .map(move |message| Ok::<_, HandlerError>(echo.text(value_of(&message))));
                Ok::<MessageStream, HandlerError>(replies.boxed())
            });
    }
}
