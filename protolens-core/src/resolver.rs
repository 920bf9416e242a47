//! # Descriptor Graph Resolver
//!
//! Closes the import graph of a set of root symbols.
//!
//! 1. The files defining the roots are fetched with one `file_containing_symbol` batch, along
//!    with any extra files requested by name. A missing extra file is not an error.
//! 2. The `dependency` list of every collected file is read; any name not collected yet is pending.
//! 3. All pending files are fetched with one `file_by_filename` batch.
//! 4. Steps 2-3 repeat until nothing is pending.
//!
//! Compiled protobuf schemas form a DAG of files, so the loop terminates. The number of
//! filename rounds is still bounded by a configurable ceiling, so that a misbehaving server
//! cannot keep the client busy forever.
use crate::BoxError;
use crate::reflection::client::{
    DescriptorBatch, DescriptorRequest, ReflectionClient, ReflectionError,
};
use crate::wire::{FileHeader, WireError};
use bytes::Bytes;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::{DescriptorProto, EnumDescriptorProto, FileDescriptorProto};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use tonic::client::GrpcService;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Reflection request failed: '{0}'")]
    Reflection(#[from] ReflectionError),

    #[error(
        "Unresolved symbols: [{}]; resolved: [{}]",
        .missing.join(", "),
        .found.join(", ")
    )]
    UnresolvedSymbols {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("The server did not provide the dependency files: [{}]", .0.join(", "))]
    MissingDependencies(Vec<String>),

    #[error(
        "Dependency closure did not finish after {rounds} rounds; still pending: [{}]",
        .pending.join(", ")
    )]
    DependencyClosureTooDeep { rounds: usize, pending: Vec<String> },

    #[error("Failed to read the header of FileDescriptorProto '{name}': {source}")]
    Header {
        name: String,
        #[source]
        source: WireError,
    },

    #[error("Failed to decode FileDescriptorProto '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: prost::DecodeError,
    },
}

/// Anything able to answer a batch of descriptor lookups.
pub trait DescriptorSource {
    fn fetch(
        &mut self,
        requests: &[DescriptorRequest],
    ) -> impl Future<Output = Result<DescriptorBatch, ReflectionError>>;
}

impl<S> DescriptorSource for ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    fn fetch(
        &mut self,
        requests: &[DescriptorRequest],
    ) -> impl Future<Output = Result<DescriptorBatch, ReflectionError>> {
        self.fetch_descriptors(requests)
    }
}

/// The closed set of encoded files covering a set of root symbols.
#[derive(Debug, Clone, Default)]
pub struct ResolvedFiles {
    /// Raw `FileDescriptorProto` bytes keyed by file name.
    pub files: BTreeMap<String, Bytes>,
    /// Number of filename rounds issued after the initial symbol lookup.
    pub rounds: usize,
}

pub struct DescriptorResolver<'a, S> {
    source: &'a mut S,
    max_rounds: usize,
    extra_files: Vec<String>,
}

impl<'a, S: DescriptorSource> DescriptorResolver<'a, S> {
    pub fn new(source: &'a mut S, max_rounds: usize) -> Self {
        Self {
            source,
            max_rounds,
            extra_files: Vec::new(),
        }
    }

    /// Also fetches `files` by name in the root batch, together with their imports.
    pub fn with_extra_files(mut self, files: impl IntoIterator<Item = String>) -> Self {
        self.extra_files.extend(files);
        self
    }

    /// Fetches the files defining `roots` and every file they transitively import.
    ///
    /// # Returns
    ///
    /// * `Ok(ResolvedFiles)` - Every root is defined and every import is present.
    /// * `Err(ResolveError)` - See the variants of [`ResolveError`].
    pub async fn resolve(&mut self, roots: &BTreeSet<String>) -> Result<ResolvedFiles, ResolveError> {
        let requests: Vec<_> = roots
            .iter()
            .cloned()
            .map(DescriptorRequest::Symbol)
            .chain(self.extra_files.iter().cloned().map(DescriptorRequest::File))
            .collect();

        let mut collected = self.source.fetch(&requests).await?.into_files();
        debug!(files = collected.len(), "fetched root descriptors");

        check_roots(roots, &collected)?;

        let mut rounds = 0;
        loop {
            let pending = pending_dependencies(&collected)?;
            if pending.is_empty() {
                break;
            }

            if rounds == self.max_rounds {
                return Err(ResolveError::DependencyClosureTooDeep {
                    rounds,
                    pending: pending.into_iter().collect(),
                });
            }
            rounds += 1;

            debug!(round = rounds, pending = pending.len(), "fetching missing dependencies");

            let requests: Vec<_> = pending
                .iter()
                .cloned()
                .map(DescriptorRequest::File)
                .collect();
            let batch = match self.source.fetch(&requests).await {
                Ok(batch) => batch,
                Err(ReflectionError::Server { .. }) => {
                    return Err(ResolveError::MissingDependencies(
                        pending.into_iter().collect(),
                    ));
                }
                Err(e) => return Err(e.into()),
            };

            if !pending.iter().any(|name| batch.contains(name)) {
                return Err(ResolveError::MissingDependencies(
                    pending.into_iter().collect(),
                ));
            }

            for (name, raw) in batch.into_files() {
                collected.entry(name).or_insert(raw);
            }
        }

        Ok(ResolvedFiles {
            files: collected,
            rounds,
        })
    }
}

fn decode_file(name: &str, raw: &Bytes) -> Result<FileDescriptorProto, ResolveError> {
    FileDescriptorProto::decode(raw.clone()).map_err(|source| ResolveError::Decode {
        name: name.to_string(),
        source,
    })
}

fn pending_dependencies(
    collected: &BTreeMap<String, Bytes>,
) -> Result<BTreeSet<String>, ResolveError> {
    let mut pending = BTreeSet::new();
    for (name, raw) in collected {
        let header = FileHeader::parse(raw).map_err(|source| ResolveError::Header {
            name: name.clone(),
            source,
        })?;
        for dependency in header.dependencies {
            if !collected.contains_key(&dependency) {
                pending.insert(dependency);
            }
        }
    }
    Ok(pending)
}

fn check_roots(
    roots: &BTreeSet<String>,
    collected: &BTreeMap<String, Bytes>,
) -> Result<(), ResolveError> {
    let mut defined = HashSet::new();
    for (name, raw) in collected {
        defined_symbols(&decode_file(name, raw)?, &mut defined);
    }

    let (found, missing): (Vec<_>, Vec<_>) = roots
        .iter()
        .cloned()
        .partition(|root| defined.contains(root.as_str()));

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ResolveError::UnresolvedSymbols { missing, found })
    }
}

/// Collects the fully-qualified names a file defines: messages (nested included), enums,
/// services and service methods.
pub(crate) fn defined_symbols(file: &FileDescriptorProto, out: &mut HashSet<String>) {
    let scope = file.package().to_string();

    for message in &file.message_type {
        message_symbols(message, &scope, out);
    }
    for enumeration in &file.enum_type {
        enum_symbols(enumeration, &scope, out);
    }
    for service in &file.service {
        let service_name = qualify(&scope, service.name());
        for method in &service.method {
            out.insert(format!("{service_name}.{}", method.name()));
        }
        out.insert(service_name);
    }
}

fn message_symbols(message: &DescriptorProto, scope: &str, out: &mut HashSet<String>) {
    let name = qualify(scope, message.name());
    for nested in &message.nested_type {
        message_symbols(nested, &name, out);
    }
    for enumeration in &message.enum_type {
        enum_symbols(enumeration, &name, out);
    }
    out.insert(name);
}

fn enum_symbols(enumeration: &EnumDescriptorProto, scope: &str, out: &mut HashSet<String>) {
    out.insert(qualify(scope, enumeration.name()));
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}
