//! # Dynamic Codec
//!
//! Converts between loosely typed [`Value`]s and protobuf bytes for any message of a
//! [`TypeRegistry`], without generated Rust types.
//!
//! Encoding is strict about shape: a key that names no field, or a value that cannot be coerced
//! to the field's kind, fails with [`CodecError::ShapeMismatch`] naming the offending path.
//! Decoding renders every field without explicit presence (defaults included), and message,
//! `optional` and oneof fields only when set. Enums render as their value name.
pub mod any;
mod coerce;
pub mod value;

pub use any::AnyEnvelope;
pub use value::Value;

use crate::registry::{TypeNotFound, TypeRegistry};
use prost::Message;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MapKey, ReflectMessage};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    TypeNotFound(#[from] TypeNotFound),

    #[error("Value does not match the message shape at '{path}': {reason}")]
    ShapeMismatch { path: String, reason: String },

    #[error("Malformed type URL '{0}': expected '{prefix}<type name>'", prefix = any::TYPE_URL_PREFIX)]
    TypeUrlMalformed(String),

    #[error("Type URL '{type_url}' names a type that was not resolved")]
    TypeUrlMismatch { type_url: String },

    #[error("Failed to decode '{type_name}': '{source}'")]
    Decode {
        type_name: String,
        source: prost::DecodeError,
    },
}

/// Encodes and decodes messages of one registry.
#[derive(Debug, Clone, Copy)]
pub struct DynamicCodec<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> DynamicCodec<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    /// Builds a message of type `type_name` from `value`.
    pub fn to_message(&self, type_name: &str, value: &Value) -> Result<DynamicMessage, CodecError> {
        let descriptor = self.registry.lookup_message(type_name)?;
        coerce::message(descriptor, value, "")
    }

    pub fn encode(&self, type_name: &str, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(self.to_message(type_name, value)?.encode_to_vec())
    }

    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        let descriptor = self.registry.lookup_message(type_name)?;
        let message =
            DynamicMessage::decode(descriptor, bytes).map_err(|source| CodecError::Decode {
                type_name: type_name.to_string(),
                source,
            })?;

        Ok(message_to_value(&message))
    }

    pub fn encode_any(&self, type_name: &str, value: &Value) -> Result<AnyEnvelope, CodecError> {
        Ok(AnyEnvelope {
            type_url: any::type_url(type_name),
            value: self.encode(type_name, value)?,
        })
    }

    pub fn decode_any(&self, envelope: &AnyEnvelope) -> Result<Value, CodecError> {
        let type_name = any::type_name_from_url(&envelope.type_url)?;
        if self.registry.lookup_message(type_name).is_err() {
            return Err(CodecError::TypeUrlMismatch {
                type_url: envelope.type_url.clone(),
            });
        }

        self.decode(type_name, &envelope.value)
    }
}

/// Renders a message keyed by proto field names.
pub fn message_to_value(message: &DynamicMessage) -> Value {
    let fields = message
        .descriptor()
        .fields()
        .filter(|field| !field.supports_presence() || message.has_field(field))
        .map(|field| {
            let value = field_to_value(&field, &message.get_field(&field));
            (field.name().to_string(), value)
        })
        .collect();

    Value::Map(fields)
}

fn field_to_value(field: &FieldDescriptor, value: &prost_reflect::Value) -> Value {
    match (value, field.kind()) {
        (prost_reflect::Value::Map(entries), Kind::Message(entry)) => {
            let value_field = entry.map_entry_value_field();
            let rendered: BTreeMap<_, _> = entries
                .iter()
                .map(|(key, value)| (map_key_to_string(key), field_to_value(&value_field, value)))
                .collect();
            Value::Map(rendered)
        }
        (prost_reflect::Value::List(items), _) => Value::List(
            items
                .iter()
                .map(|item| scalar_to_value(&field.kind(), item))
                .collect(),
        ),
        (value, kind) => scalar_to_value(&kind, value),
    }
}

fn scalar_to_value(kind: &Kind, value: &prost_reflect::Value) -> Value {
    use prost_reflect::Value as V;

    match value {
        V::Bool(b) => Value::Bool(*b),
        V::I32(i) => Value::Int((*i).into()),
        V::I64(i) => Value::Int(*i),
        V::U32(u) => Value::UInt((*u).into()),
        V::U64(u) => Value::UInt(*u),
        V::F32(f) => Value::Float((*f).into()),
        V::F64(f) => Value::Float(*f),
        V::String(s) => Value::String(s.clone()),
        V::Bytes(b) => Value::Bytes(b.to_vec()),
        V::EnumNumber(number) => match kind {
            Kind::Enum(descriptor) => match descriptor.get_value(*number) {
                Some(v) => Value::String(v.name().to_string()),
                None => Value::Int((*number).into()),
            },
            _ => Value::Int((*number).into()),
        },
        V::Message(message) => message_to_value(message),
        V::List(items) => Value::List(items.iter().map(|i| scalar_to_value(kind, i)).collect()),
        V::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (map_key_to_string(k), scalar_to_value(kind, v)))
                .collect(),
        ),
    }
}

fn map_key_to_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(b) => b.to_string(),
        MapKey::I32(i) => i.to_string(),
        MapKey::I64(i) => i.to_string(),
        MapKey::U32(u) => u.to_string(),
        MapKey::U64(u) => u.to_string(),
        MapKey::String(s) => s.clone(),
    }
}
