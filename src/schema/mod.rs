//! Protocol-schema loading for gRPC mode.
//!
//! # Data Flow
//! ```text
//! api.proto_path
//!     → protox (parse + resolve imports)
//!     → prost-reflect DescriptorPool (message bindings for the handler)
//!     → ServiceSchema (exactly one service, its RPCs and their shapes)
//! ```

use std::path::{Path, PathBuf};

use prost_reflect::{DescriptorPool, MessageDescriptor, MethodDescriptor, ServiceDescriptor};

/// Error raised while loading the protocol schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to compile {path}: {message}")]
    Compile { path: PathBuf, message: String },
    #[error("{path} must declare exactly one service, found {found}")]
    ServiceCount { path: PathBuf, found: usize },
}

/// Streaming shape of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingShape {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidirectional,
}

impl StreamingShape {
    pub fn of(method: &MethodDescriptor) -> Self {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => StreamingShape::Unary,
            (true, false) => StreamingShape::ClientStreaming,
            (false, true) => StreamingShape::ServerStreaming,
            (true, true) => StreamingShape::Bidirectional,
        }
    }
}

impl std::fmt::Display for StreamingShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamingShape::Unary => "unary",
            StreamingShape::ClientStreaming => "client-streaming",
            StreamingShape::ServerStreaming => "server-streaming",
            StreamingShape::Bidirectional => "bidirectional",
        };
        f.write_str(name)
    }
}

/// A single RPC declared by the service.
#[derive(Debug, Clone)]
pub struct RpcDescriptor {
    pub name: String,
    pub shape: StreamingShape,
    pub input: MessageDescriptor,
    pub output: MessageDescriptor,
}

/// The single service a gRPC replica serves.
#[derive(Debug, Clone)]
pub struct ServiceSchema {
    pool: DescriptorPool,
    service: ServiceDescriptor,
}

impl ServiceSchema {
    /// Compile a `.proto` file and extract its only service.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        if !path.is_file() {
            return Err(SchemaError::NotFound(path.to_path_buf()));
        }

        let include = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SchemaError::NotFound(path.to_path_buf()))?;

        let compile_error = |message: String| SchemaError::Compile {
            path: path.to_path_buf(),
            message,
        };

        let files = protox::compile([&file_name], [include]).map_err(|e| compile_error(e.to_string()))?;
        let pool = DescriptorPool::from_file_descriptor_set(files).map_err(|e| compile_error(e.to_string()))?;
        let file = pool
            .get_file_by_name(&file_name)
            .ok_or_else(|| compile_error(format!("{} missing from compiled descriptors", file_name)))?;

        let services: Vec<ServiceDescriptor> = file.services().collect();
        if services.len() != 1 {
            return Err(SchemaError::ServiceCount {
                path: path.to_path_buf(),
                found: services.len(),
            });
        }
        let service = services.into_iter().next().ok_or(SchemaError::ServiceCount {
            path: path.to_path_buf(),
            found: 0,
        })?;

        tracing::info!(
            service = %service.full_name(),
            rpcs = service.methods().len(),
            "Protocol schema loaded"
        );

        Ok(Self { pool, service })
    }

    /// Fully qualified service name, e.g. `iris.Classifier`.
    pub fn service_name(&self) -> &str {
        self.service.full_name()
    }

    /// Message bindings for every type the schema declares or imports.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn rpcs(&self) -> Vec<RpcDescriptor> {
        self.service
            .methods()
            .map(|method| RpcDescriptor {
                name: method.name().to_string(),
                shape: StreamingShape::of(&method),
                input: method.input(),
                output: method.output(),
            })
            .collect()
    }

    /// Look up a message type by its fully qualified name.
    pub fn message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const ECHO_PROTO: &str = r#"
        syntax = "proto3";
        package echo;

        message Text { string value = 1; }

        service Echo {
            rpc Say (Text) returns (Text);
            rpc Collect (stream Text) returns (Text);
            rpc Spell (Text) returns (stream Text);
            rpc Chat (stream Text) returns (stream Text);
        }
    "#;

    pub(crate) fn write_proto(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_service_and_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let schema = ServiceSchema::load(&write_proto(&dir, "echo.proto", ECHO_PROTO)).unwrap();

        assert_eq!(schema.service_name(), "echo.Echo");
        let shapes: Vec<_> = schema.rpcs().iter().map(|r| (r.name.clone(), r.shape)).collect();
        assert_eq!(
            shapes,
            vec![
                ("Say".to_string(), StreamingShape::Unary),
                ("Collect".to_string(), StreamingShape::ClientStreaming),
                ("Spell".to_string(), StreamingShape::ServerStreaming),
                ("Chat".to_string(), StreamingShape::Bidirectional),
            ]
        );
        assert!(schema.message("echo.Text").is_some());
    }

    #[test]
    fn rejects_multiple_services() {
        let dir = tempfile::tempdir().unwrap();
        let proto = r#"
            syntax = "proto3";
            message M { int32 x = 1; }
            service A { rpc Go (M) returns (M); }
            service B { rpc Go (M) returns (M); }
        "#;
        let err = ServiceSchema::load(&write_proto(&dir, "two.proto", proto)).unwrap_err();
        assert!(matches!(err, SchemaError::ServiceCount { found: 2, .. }));
    }

    #[test]
    fn rejects_zero_services() {
        let dir = tempfile::tempdir().unwrap();
        let proto = "syntax = \"proto3\";\nmessage M { int32 x = 1; }\n";
        let err = ServiceSchema::load(&write_proto(&dir, "none.proto", proto)).unwrap_err();
        assert!(matches!(err, SchemaError::ServiceCount { found: 0, .. }));
    }

    #[test]
    fn reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.proto");
        assert!(matches!(ServiceSchema::load(&missing), Err(SchemaError::NotFound(_))));

        let broken = write_proto(&dir, "broken.proto", "syntax = \"proto3\"; service {");
        assert!(matches!(ServiceSchema::load(&broken), Err(SchemaError::Compile { .. })));
    }
}
