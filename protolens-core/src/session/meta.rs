//! Server identity advertised through a `FileOptions` extension.
//!
//! A server may publish an anchor file (by default [`DEFAULT_SERVER_META_FILE`]) whose options
//! carry a `ServerMeta { string server_id = 1; string server_version = 2; }` message. The
//! extension is recognized by its shape rather than its number: any extension of
//! `google.protobuf.FileOptions` whose message type has a `server_version` field.
//!
//! [`DEFAULT_SERVER_META_FILE`]: crate::config::DEFAULT_SERVER_META_FILE
use crate::registry::TypeRegistry;
use crate::wire::{self, FileHeader};
use prost_reflect::{ExtensionDescriptor, Kind};
use serde::Serialize;
use tracing::warn;

const FILE_OPTIONS: &str = "google.protobuf.FileOptions";

const SERVER_ID: u32 = 1;
const SERVER_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerMeta {
    pub server_id: String,
    pub server_version: String,
}

impl ServerMeta {
    /// Reads the meta option of the first file of `registry` that declares one.
    pub fn from_registry(registry: &TypeRegistry) -> Option<Self> {
        let extension = registry.pool().all_extensions().find(is_server_meta)?;

        registry.files().iter().find_map(|(name, raw)| {
            match read(raw, extension.number()) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(file = %name, error = %e, "unreadable server meta option");
                    None
                }
            }
        })
    }
}

fn is_server_meta(extension: &ExtensionDescriptor) -> bool {
    if extension.containing_message().full_name() != FILE_OPTIONS {
        return false;
    }
    match extension.kind() {
        Kind::Message(meta) => meta
            .get_field(SERVER_VERSION)
            .is_some_and(|field| field.name() == "server_version"),
        _ => false,
    }
}

fn read(file: &[u8], number: u32) -> Result<Option<ServerMeta>, wire::WireError> {
    let header = FileHeader::parse(file)?;
    let Some(meta) = wire::length_delimited(&header.options, number)?.pop() else {
        return Ok(None);
    };

    Ok(Some(ServerMeta {
        server_id: wire::last_string(meta, SERVER_ID)?.unwrap_or_default(),
        server_version: wire::last_string(meta, SERVER_VERSION)?.unwrap_or_default(),
    }))
}
