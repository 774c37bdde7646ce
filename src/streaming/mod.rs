//! Streaming adapter for gRPC.
//!
//! # Data Flow
//! ```text
//! unary:             message            → handler → Reply(message)
//! client-streaming:  source.rs (lazy)   → handler → Reply(message)
//! server-streaming:  message            → handler → sink.rs (MessageStream, pulled)
//! bidirectional:     source.rs (lazy)   → handler → sink.rs (MessageStream, pulled)
//!
//! wire bytes ⇄ codec.rs (DynamicMessage against the schema descriptors)
//! ```
//!
//! # Design Decisions
//! - Input is never collected before the handler runs
//! - Output is pulled by the transport one item at a time (backpressure)
//! - Reading and writing are independent: the response stream is polled by
//!   the connection while the handler task reads the request stream
//! - Disconnects end the input sequence and drop the output producer

pub mod codec;
pub mod sink;
pub mod source;

pub use codec::DynamicCodec;
pub use sink::{channel, MessageStream, StreamSender};
pub use source::MessageSource;

#[cfg(test)]
pub(crate) mod tests {
    use prost_reflect::{DescriptorPool, DynamicMessage, Value};

    const PROTO: &str = r#"
        syntax = "proto3";
        package echo;
        message Text { string value = 1; }
        message Other { int32 n = 1; }
        service Echo { rpc Spell (Text) returns (stream Text); }
    "#;

    pub(crate) fn pool() -> DescriptorPool {
        let dir = tempfile::tempdir().unwrap();
        let path = crate::schema::tests::write_proto(&dir, "echo.proto", PROTO);
        crate::schema::ServiceSchema::load(&path).unwrap().pool().clone()
    }

    pub(crate) fn text_message(value: &str) -> DynamicMessage {
        let mut message = DynamicMessage::new(pool().get_message_by_name("echo.Text").unwrap());
        message.set_field_by_name("value", Value::String(value.to_string()));
        message
    }
}
