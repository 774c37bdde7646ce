//! Reflection-based gRPC message codec.
//!
//! Messages are decoded against the descriptor of the RPC's input type, so
//! no generated code is needed for the user's schema.

use std::sync::Arc;

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

use crate::error::DispatchError;

/// Codec for one RPC: decodes `input`, encodes whatever message it is given.
#[derive(Debug, Clone)]
pub struct DynamicCodec {
    input: MessageDescriptor,
    api: Arc<str>,
    method: Arc<str>,
}

impl DynamicCodec {
    pub fn new(input: MessageDescriptor, api: Arc<str>, method: Arc<str>) -> Self {
        Self { input, api, method }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            input: self.input.clone(),
            api: Arc::clone(&self.api),
            method: Arc::clone(&self.method),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("failed to encode response: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct DynamicDecoder {
    input: MessageDescriptor,
    api: Arc<str>,
    method: Arc<str>,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        match DynamicMessage::decode(self.input.clone(), src) {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                let err = DispatchError::Decode(format!(
                    "request is not a valid {}: {}",
                    self.input.full_name(),
                    e
                ));
                err.log(&self.api, &self.method);
                Err(err.to_status())
            }
        }
    }
}
