//! # Protolens Core
//!
//! `protolens-core` resolves protobuf schemas at runtime from any gRPC server exposing the
//! Server Reflection Protocol, and uses them to encode, decode and validate messages without
//! compile-time generated bindings.
//!
//! ## Key Components
//!
//! * **[`ReflectionSession`](session::ReflectionSession):** The main entry point. It owns a
//!   per-address schema cache and serves `resolve_types`, `call_tool` and friends.
//! * **[`ReflectionClient`](reflection::client::ReflectionClient):** Batched `ServerReflectionInfo`
//!   requests, tolerant to partial failures.
//! * **[`DescriptorResolver`](resolver::DescriptorResolver):** Closes the import graph of a set
//!   of root symbols, one batched round-trip per dependency layer.
//! * **[`TypeRegistry`](registry::TypeRegistry):** The linked, immutable type system built from
//!   the resolved `FileDescriptorProto`s.
//! * **[`DynamicCodec`](codec::DynamicCodec):** Encodes and decodes loosely typed
//!   [`Value`](codec::Value)s, including `google.protobuf.Any` envelopes.
//! * **[`constraints`]:** Recovers field validation rules from custom options and evaluates them.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod codec;
pub mod config;
pub mod constraints;
pub mod grpc;
pub mod reflection;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod tool;
pub mod wire;

pub use codec::{AnyEnvelope, DynamicCodec, Value};
pub use config::SessionConfig;
pub use session::{ReflectionSession, ResolvedSchema};
pub use tool::ToolDescriptor;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
