//! What the runtime serves, fixed once the handler is bound.

use serde::Serialize;

use crate::config::ProtocolMode;

/// Protocol mode, operation names and owning API of the bound handler.
///
/// Built once at startup and never mutated; shared read-only with the admin
/// interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerDescriptor {
    pub api: String,
    pub mode: ProtocolMode,
    /// HTTP verbs, or RPC names of the service.
    pub operations: Vec<String>,
    /// Fully qualified service name (gRPC only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}
