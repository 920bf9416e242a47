//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! It enables the client to query a server for its own Protobuf schema at runtime, so that
//! no pre-compiled descriptors are needed.
pub mod client;
pub mod proto;
