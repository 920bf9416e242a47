//! # Tools
//!
//! A tool is a unary gRPC method exposed under a stable name, together with the fully-qualified
//! names of its request and response messages. Tool descriptors are produced by whatever layer
//! advertises tools; this crate only resolves and invokes them.
use crate::codec::CodecError;
use crate::grpc::client::GrpcRequestError;
use crate::registry::TypeNotFound;
use crate::session::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(rename = "inputTypeFQN")]
    pub input_type: String,
    #[serde(rename = "outputTypeFQN")]
    pub output_type: String,
    #[serde(rename = "grpcServiceFQN")]
    pub service: String,
    #[serde(rename = "grpcMethodName")]
    pub method: String,
}

impl ToolDescriptor {
    /// The symbols a registry must define for this tool to be callable.
    pub fn symbols(&self) -> [String; 3] {
        [
            self.input_type.clone(),
            self.output_type.clone(),
            format!("{}.{}", self.service, self.method),
        ]
    }
}

/// Coarse classification of a failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    NotFound,
    InvalidArgument,
    Unavailable,
    Internal,
}

impl fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ToolErrorCode::NotFound => "NOT_FOUND",
            ToolErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ToolErrorCode::Unavailable => "UNAVAILABLE",
            ToolErrorCode::Internal => "INTERNAL",
        };
        f.write_str(code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Tool does not advertise a resolvable type: {0}")]
    TypeNotFound(#[from] TypeNotFound),

    #[error(
        "Tool '{tool}' declares {declared_input} -> {declared_output}, but the server method takes {actual_input} -> {actual_output}"
    )]
    SignatureMismatch {
        tool: String,
        declared_input: String,
        declared_output: String,
        actual_input: String,
        actual_output: String,
    },

    #[error("Argument validation failed: {}", .0.join("; "))]
    InvalidArguments(Vec<String>),

    #[error("type_url '{type_url}' does not match the tool input type '{expected}'")]
    TypeUrlMismatch { type_url: String, expected: String },

    #[error("Request too large: {size} bytes exceeds the limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Request(#[from] GrpcRequestError),
}

impl ToolCallError {
    pub fn code(&self) -> ToolErrorCode {
        match self {
            ToolCallError::Session(e) => e.code(),
            ToolCallError::TypeNotFound(_) => ToolErrorCode::NotFound,
            ToolCallError::SignatureMismatch { .. } => ToolErrorCode::Internal,
            ToolCallError::InvalidArguments(_)
            | ToolCallError::TypeUrlMismatch { .. }
            | ToolCallError::MessageTooLarge { .. } => ToolErrorCode::InvalidArgument,
            ToolCallError::Codec(e) => match e {
                CodecError::TypeNotFound(_) => ToolErrorCode::NotFound,
                CodecError::ShapeMismatch { .. }
                | CodecError::TypeUrlMalformed(_)
                | CodecError::TypeUrlMismatch { .. } => ToolErrorCode::InvalidArgument,
                CodecError::Decode { .. } => ToolErrorCode::Internal,
            },
            ToolCallError::Request(GrpcRequestError::ClientNotReady(_)) => {
                ToolErrorCode::Unavailable
            }
            ToolCallError::Request(_) => ToolErrorCode::InvalidArgument,
        }
    }
}
