//! # Dynamic Message Codec
//!
//! A `tonic::codec::Codec` that transports `prost_reflect::DynamicMessage`s, so any method
//! resolved at runtime can be called without generated Rust types.
//!
//! The encoder writes the request message as-is. The decoder needs the response descriptor up
//! front, since the bytes on the wire carry no type information.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

pub struct DynamicMessageCodec {
    response: MessageDescriptor,
}

impl DynamicMessageCodec {
    pub fn new(response: MessageDescriptor) -> Self {
        Self { response }
    }
}

impl Codec for DynamicMessageCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicMessageEncoder;
    type Decoder = DynamicMessageDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicMessageEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicMessageDecoder(self.response.clone())
    }
}

pub struct DynamicMessageEncoder;

impl Encoder for DynamicMessageEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("Failed to encode request: {e}")))
    }
}

pub struct DynamicMessageDecoder(MessageDescriptor);

impl Decoder for DynamicMessageDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut message = DynamicMessage::new(self.0.clone());
        message.merge(src).map_err(|e| {
            Status::internal(format!(
                "Failed to decode '{}' response: {e}",
                self.0.full_name()
            ))
        })?;

        Ok(Some(message))
    }
}
