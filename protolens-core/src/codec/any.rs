//! `google.protobuf.Any` envelopes.
use super::CodecError;

/// The standard protobuf `Any` message: a type URL plus the serialized message.
pub type AnyEnvelope = prost_types::Any;

pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

pub fn type_url(type_name: &str) -> String {
    format!("{TYPE_URL_PREFIX}{type_name}")
}

/// Extracts the fully-qualified type name embedded in `type_url`.
pub fn type_name_from_url(type_url: &str) -> Result<&str, CodecError> {
    match type_url.strip_prefix(TYPE_URL_PREFIX) {
        Some(name) if !name.is_empty() && !name.contains('/') => Ok(name),
        _ => Err(CodecError::TypeUrlMalformed(type_url.to_string())),
    }
}
