//! # Dynamic gRPC Transport
//!
//! Unary calls to methods that are only known at runtime. Requests and responses travel as
//! `prost_reflect::DynamicMessage`s built by the [`codec`](crate::codec) module.
pub mod client;
pub mod codec;
