//! # Session Configuration
//!
//! Tunables shared by every resolution and call made through a
//! [`ReflectionSession`](crate::session::ReflectionSession).
use std::time::Duration;

/// Wall-clock budget for a single reflection batch.
pub const DEFAULT_REFLECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on dependency-closure rounds after the initial symbol lookup.
pub const DEFAULT_MAX_CLOSURE_ROUNDS: usize = 32;

/// File whose options carry the server's `ServerMeta`.
pub const DEFAULT_SERVER_META_FILE: &str = "internal/meta_anchor.proto";

/// Largest encoded request accepted by `call_tool` (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time after which an in-flight reflection stream is cancelled. Descriptors
    /// collected before the deadline are kept.
    pub reflection_timeout: Duration,
    /// Maximum number of filename rounds the resolver may issue.
    pub max_closure_rounds: usize,
    /// Maximum encoded size of a tool request.
    pub max_message_bytes: usize,
    /// File fetched alongside every resolution to read the server's identity. `None`
    /// disables server meta entirely.
    pub server_meta_file: Option<String>,
    /// When set, a cache hit first asks the server for its current meta and drops the cached
    /// schema if the version moved.
    pub verify_server_version: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reflection_timeout: DEFAULT_REFLECTION_TIMEOUT,
            max_closure_rounds: DEFAULT_MAX_CLOSURE_ROUNDS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            server_meta_file: Some(DEFAULT_SERVER_META_FILE.to_string()),
            verify_server_version: false,
        }
    }
}

impl SessionConfig {
    pub fn with_reflection_timeout(mut self, timeout: Duration) -> Self {
        self.reflection_timeout = timeout;
        self
    }

    pub fn with_max_closure_rounds(mut self, rounds: usize) -> Self {
        self.max_closure_rounds = rounds;
        self
    }

    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    pub fn with_server_meta_file(mut self, file: Option<String>) -> Self {
        self.server_meta_file = file;
        self
    }

    pub fn with_verify_server_version(mut self, verify: bool) -> Self {
        self.verify_server_version = verify;
        self
    }
}
