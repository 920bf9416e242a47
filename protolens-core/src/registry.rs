//! # Type Registry
//!
//! The closed, queryable type system built from a set of `FileDescriptorProto`s.
//!
//! Building a registry:
//!
//! 1. Decodes every file and drops duplicates (first file wins for a given name).
//! 2. Applies the fixups of [`normalize`] to the decoded descriptors.
//! 3. Orders the files so that every file follows its imports, failing on a missing import.
//! 4. Links them into a `prost_reflect::DescriptorPool`. Files that needed no fixup are fed to
//!    the pool in their original encoding, so custom options survive.
//!
//! A registry is never mutated once built.
pub mod json;
pub(crate) mod normalize;

use bytes::Bytes;
use prost::Message;
use prost::encoding::{WireType, encode_key, encode_varint};
use prost_reflect::{
    DescriptorError, DescriptorPool, EnumDescriptor, MessageDescriptor, MethodDescriptor,
    ServiceDescriptor,
};
use prost_types::FileDescriptorProto;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to decode FileDescriptorProto: '{0}'")]
    Decode(#[from] prost::DecodeError),

    #[error("Invalid JSON descriptor at '{path}': {reason}")]
    Json { path: String, reason: String },

    #[error("File '{file}' imports '{dependency}', which is not part of the resolved set")]
    MissingDependency { file: String, dependency: String },

    #[error("Import cycle detected through '{0}'")]
    DependencyCycle(String),

    #[error("Failed to link descriptors: '{0}'")]
    Link(#[from] DescriptorError),
}

/// The kind of symbol a lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Message,
    Enum,
    Service,
    Method,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Message => "message",
            SymbolKind::Enum => "enum",
            SymbolKind::Service => "service",
            SymbolKind::Method => "method",
        };
        f.write_str(name)
    }
}

/// A fully-qualified name with no match in a registry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} '{name}' not found; resolved {kind}s: [{}]", .known.join(", "))]
pub struct TypeNotFound {
    pub name: String,
    pub kind: SymbolKind,
    /// The names of that kind the registry does define, sorted.
    pub known: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TypeRegistry {
    pool: DescriptorPool,
    /// Original encoding of every file, keyed by file name.
    files: BTreeMap<String, Bytes>,
    messages: HashMap<String, MessageDescriptor>,
    enums: HashMap<String, EnumDescriptor>,
    services: HashMap<String, ServiceDescriptor>,
}

struct SourceFile {
    proto: FileDescriptorProto,
    raw: Bytes,
}

impl TypeRegistry {
    /// Builds a registry from encoded `FileDescriptorProto`s, in any order.
    pub fn from_encoded<I>(files: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let sources = files
            .into_iter()
            .map(|raw| {
                let proto = FileDescriptorProto::decode(raw.clone())?;
                Ok(SourceFile { proto, raw })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;

        Self::build(sources)
    }

    /// Builds a registry from already decoded descriptors, in any order.
    pub fn from_file_descriptors<I>(files: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = FileDescriptorProto>,
    {
        let sources = files
            .into_iter()
            .map(|proto| SourceFile {
                raw: proto.encode_to_vec().into(),
                proto,
            })
            .collect();

        Self::build(sources)
    }

    /// Builds a registry from descriptors exported as JSON objects, in the shape produced by
    /// the google-protobuf JavaScript `toObject()` helpers. See [`json`].
    pub fn from_json_files(files: &[serde_json::Value]) -> Result<Self, RegistryError> {
        let protos = files
            .iter()
            .map(json::file_from_json)
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_file_descriptors(protos)
    }

    fn build(sources: Vec<SourceFile>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        let mut sources: Vec<_> = sources
            .into_iter()
            .filter(|source| seen.insert(source.proto.name().to_string()))
            .collect();

        let mut protos: Vec<_> = sources.iter().map(|s| s.proto.clone()).collect();
        let changed = normalize::normalize_files(&mut protos);

        let mut encoded = Vec::with_capacity(protos.len());
        for ((source, proto), changed) in sources.iter().zip(&protos).zip(changed) {
            if changed {
                encoded.push(Bytes::from(proto.encode_to_vec()));
            } else {
                encoded.push(source.raw.clone());
            }
        }

        let order = dependency_order(&protos)?;

        let mut set = Vec::new();
        for &index in &order {
            let file = &encoded[index];
            encode_key(1, WireType::LengthDelimited, &mut set);
            encode_varint(file.len() as u64, &mut set);
            set.extend_from_slice(file);
        }

        let pool = DescriptorPool::decode(set.as_slice())?;

        let files = sources
            .drain(..)
            .map(|source| (source.proto.name().to_string(), source.raw))
            .collect();

        Ok(Self::index(pool, files))
    }

    fn index(pool: DescriptorPool, files: BTreeMap<String, Bytes>) -> Self {
        let messages = pool
            .all_messages()
            .map(|m| (m.full_name().to_string(), m))
            .collect();
        let enums = pool
            .all_enums()
            .map(|e| (e.full_name().to_string(), e))
            .collect();
        let services = pool
            .services()
            .map(|s| (s.full_name().to_string(), s))
            .collect();

        Self {
            pool,
            files,
            messages,
            enums,
            services,
        }
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Original encoding of every file, keyed by file name.
    pub fn files(&self) -> &BTreeMap<String, Bytes> {
        &self.files
    }

    pub fn lookup_message(&self, name: &str) -> Result<MessageDescriptor, TypeNotFound> {
        self.messages
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name, SymbolKind::Message, self.messages.keys()))
    }

    pub fn lookup_enum(&self, name: &str) -> Result<EnumDescriptor, TypeNotFound> {
        self.enums
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name, SymbolKind::Enum, self.enums.keys()))
    }

    pub fn lookup_service(&self, name: &str) -> Result<ServiceDescriptor, TypeNotFound> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name, SymbolKind::Service, self.services.keys()))
    }

    pub fn lookup_method(
        &self,
        service: &str,
        method: &str,
    ) -> Result<MethodDescriptor, TypeNotFound> {
        let descriptor = self.lookup_service(service)?;
        let found = descriptor.methods().find(|m| m.name() == method);

        found.ok_or_else(|| TypeNotFound {
            name: format!("{service}/{method}"),
            kind: SymbolKind::Method,
            known: descriptor
                .methods()
                .map(|m| format!("{service}/{}", m.name()))
                .collect(),
        })
    }

    /// Returns `true` if `symbol` names a message, enum, service or `service.Method`.
    pub fn defines(&self, symbol: &str) -> bool {
        if self.messages.contains_key(symbol)
            || self.enums.contains_key(symbol)
            || self.services.contains_key(symbol)
        {
            return true;
        }

        symbol
            .rsplit_once('.')
            .and_then(|(service, method)| {
                self.services
                    .get(service)
                    .map(|s| s.methods().any(|m| m.name() == method))
            })
            .unwrap_or(false)
    }

    pub fn message_names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

fn not_found<'a>(
    name: &str,
    kind: SymbolKind,
    known: impl Iterator<Item = &'a String>,
) -> TypeNotFound {
    let mut known: Vec<_> = known.cloned().collect();
    known.sort();
    TypeNotFound {
        name: name.to_string(),
        kind,
        known,
    }
}

/// Returns the indexes of `files` ordered so that every file comes after its imports.
fn dependency_order(files: &[FileDescriptorProto]) -> Result<Vec<usize>, RegistryError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    fn visit(
        index: usize,
        files: &[FileDescriptorProto],
        by_name: &HashMap<&str, usize>,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) -> Result<(), RegistryError> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                return Err(RegistryError::DependencyCycle(
                    files[index].name().to_string(),
                ));
            }
            Mark::Unvisited => {}
        }

        marks[index] = Mark::Visiting;
        for dependency in &files[index].dependency {
            let &next = by_name.get(dependency.as_str()).ok_or_else(|| {
                RegistryError::MissingDependency {
                    file: files[index].name().to_string(),
                    dependency: dependency.clone(),
                }
            })?;
            visit(next, files, by_name, marks, order)?;
        }
        marks[index] = Mark::Done;
        order.push(index);

        Ok(())
    }

    let by_name: HashMap<&str, usize> = files
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name(), i))
        .collect();

    let mut marks = vec![Mark::Unvisited; files.len()];
    let mut order = Vec::with_capacity(files.len());
    for index in 0..files.len() {
        visit(index, files, &by_name, &mut marks, &mut order)?;
    }

    Ok(order)
}
