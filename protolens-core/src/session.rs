//! # Reflection Session
//!
//! A [`ReflectionSession`] resolves schemas from servers and invokes tools on them. It owns a
//! [`SchemaCache`] keyed by server address, so each address is resolved once and later calls
//! for already known symbols are served without any reflection traffic.
//!
//! A cached schema is never modified. When a caller asks for a symbol the cached schema does not
//! define, the union of the old and new roots is resolved again and the new schema replaces the
//! old one.
//!
//! Every resolution also reads the server's [`ServerMeta`]. A schema resolved under another
//! server version is dropped: immediately when a resolution observes the change, and on every
//! cache hit when [`SessionConfig::verify_server_version`] is set.
//!
//! ## Example
//!
//! ```rust,no_run
//! use protolens_core::{ReflectionSession, ToolDescriptor, Value};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = ReflectionSession::new();
//! let tool = ToolDescriptor {
//!     name: "get_weather".to_string(),
//!     input_type: "examples.weather.GetWeatherRequest".to_string(),
//!     output_type: "examples.weather.GetWeatherResponse".to_string(),
//!     service: "examples.weather.WeatherService".to_string(),
//!     method: "GetWeather".to_string(),
//! };
//!
//! let args = Value::map([("location", "NYC"), ("units", "metric")]);
//! match session.call_tool("http://localhost:50051", &tool, &args, vec![]).await? {
//!     Ok(response) => println!("{:?}", response),
//!     Err(status) => eprintln!("server returned {status}"),
//! }
//! # Ok(())
//! # }
//! ```
pub mod meta;

pub use meta::ServerMeta;

use crate::BoxError;
use crate::codec::{self, AnyEnvelope, CodecError, DynamicCodec, Value};
use crate::config::SessionConfig;
use crate::constraints::{self, RuleSet};
use crate::grpc::client::GrpcClient;
use crate::reflection::client::{ReflectionClient, ReflectionError};
use crate::registry::{RegistryError, TypeRegistry};
use crate::resolver::{DescriptorResolver, ResolveError};
use crate::tool::{ToolCallError, ToolDescriptor, ToolErrorCode};
use http_body::Body as HttpBody;
use prost::Message;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tonic::client::GrpcService;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

const NOT_FOUND: i32 = tonic::Code::NotFound as i32;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),

    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),

    #[error("Reflection failed: {0}")]
    Reflection(#[from] ReflectionError),

    #[error("Schema resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Failed to build the type registry: {0}")]
    Registry(#[from] RegistryError),
}

impl SessionError {
    pub fn code(&self) -> ToolErrorCode {
        match self {
            SessionError::InvalidUrl(..) => ToolErrorCode::InvalidArgument,
            SessionError::Resolve(ResolveError::UnresolvedSymbols { .. })
            | SessionError::Resolve(ResolveError::Reflection(ReflectionError::Server {
                code: NOT_FOUND,
                ..
            })) => ToolErrorCode::NotFound,
            SessionError::ConnectionFailed(..)
            | SessionError::Reflection(_)
            | SessionError::Resolve(ResolveError::Reflection(_)) => ToolErrorCode::Unavailable,
            SessionError::Resolve(_) | SessionError::Registry(_) => ToolErrorCode::Internal,
        }
    }
}

/// Opens a gRPC service for a server address.
pub trait Connector {
    type Service;

    fn connect(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Self::Service, SessionError>> + Send;
}

/// Connects over HTTP/2 with `tonic`'s transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Service = Channel;

    async fn connect(&self, address: &str) -> Result<Channel, SessionError> {
        let endpoint = Endpoint::new(address.to_string())
            .map_err(|e| SessionError::InvalidUrl(address.to_string(), e))?;

        endpoint
            .connect()
            .await
            .map_err(|e| SessionError::ConnectionFailed(address.to_string(), e))
    }
}

/// Hands out clones of one service regardless of the address, e.g. an in-process server.
#[derive(Debug, Clone)]
pub struct ServiceConnector<S>(pub S);

impl<S: Clone + Send + Sync> Connector for ServiceConnector<S> {
    type Service = S;

    async fn connect(&self, _address: &str) -> Result<S, SessionError> {
        Ok(self.0.clone())
    }
}

/// A registry together with the rules extracted from it.
#[derive(Debug)]
pub struct ResolvedSchema {
    roots: BTreeSet<String>,
    registry: TypeRegistry,
    rules: RuleSet,
    server_meta: Option<ServerMeta>,
}

impl ResolvedSchema {
    pub fn new(roots: BTreeSet<String>, registry: TypeRegistry) -> Self {
        let rules = constraints::extract_rules(&registry);
        let server_meta = ServerMeta::from_registry(&registry);
        Self {
            roots,
            registry,
            rules,
            server_meta,
        }
    }

    /// The identity the server advertised when this schema was resolved.
    pub fn server_meta(&self) -> Option<&ServerMeta> {
        self.server_meta.as_ref()
    }

    /// The symbols this schema was resolved for.
    pub fn roots(&self) -> &BTreeSet<String> {
        &self.roots
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn codec(&self) -> DynamicCodec<'_> {
        DynamicCodec::new(&self.registry)
    }

    pub fn defines_all<'a>(&self, symbols: impl IntoIterator<Item = &'a String>) -> bool {
        symbols.into_iter().all(|s| self.registry.defines(s))
    }

    pub fn encode(&self, type_name: &str, value: &Value) -> Result<Vec<u8>, CodecError> {
        self.codec().encode(type_name, value)
    }

    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        self.codec().decode(type_name, bytes)
    }

    pub fn encode_any(&self, type_name: &str, value: &Value) -> Result<AnyEnvelope, CodecError> {
        self.codec().encode_any(type_name, value)
    }

    pub fn decode_any(&self, envelope: &AnyEnvelope) -> Result<Value, CodecError> {
        self.codec().decode_any(envelope)
    }

    pub fn validate(&self, type_name: &str, candidate: &Value) -> Vec<String> {
        constraints::validate(type_name, &self.rules, candidate)
    }
}

/// Resolved schemas by server address.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: RwLock<HashMap<String, Arc<ResolvedSchema>>>,
}

impl SchemaCache {
    pub async fn get(&self, address: &str) -> Option<Arc<ResolvedSchema>> {
        self.entries.read().await.get(address).cloned()
    }

    /// Stores `schema` unless `address` already has an entry, and returns the stored entry.
    pub async fn insert_if_absent(
        &self,
        address: &str,
        schema: Arc<ResolvedSchema>,
    ) -> Arc<ResolvedSchema> {
        self.entries
            .write()
            .await
            .entry(address.to_string())
            .or_insert(schema)
            .clone()
    }

    pub async fn replace(&self, address: &str, schema: Arc<ResolvedSchema>) {
        self.entries
            .write()
            .await
            .insert(address.to_string(), schema);
    }

    pub async fn remove(&self, address: &str) -> bool {
        self.entries.write().await.remove(address).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

pub struct ReflectionSession<C = TcpConnector> {
    connector: C,
    config: SessionConfig,
    cache: SchemaCache,
}

impl ReflectionSession<TcpConnector> {
    pub fn new() -> Self {
        Self::with_connector(TcpConnector, SessionConfig::default())
    }
}

impl Default for ReflectionSession<TcpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ReflectionSession<C>
where
    C: Connector,
    C::Service: GrpcService<tonic::body::Body>,
    <C::Service as GrpcService<tonic::body::Body>>::Error: Into<BoxError>,
    <C::Service as GrpcService<tonic::body::Body>>::ResponseBody:
        HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <<C::Service as GrpcService<tonic::body::Body>>::ResponseBody as HttpBody>::Error:
        Into<BoxError> + Send,
{
    pub fn with_connector(connector: C, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            cache: SchemaCache::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Lists the services advertised by the server at `address`. Never cached.
    pub async fn list_services(&self, address: &str) -> Result<Vec<String>, SessionError> {
        let service = self.connector.connect(address).await?;
        let mut client =
            ReflectionClient::new(service).with_timeout(self.config.reflection_timeout);

        Ok(client.list_services().await?)
    }

    /// Returns a schema of `address` defining every symbol of `roots`, from the cache when
    /// possible.
    pub async fn resolve_types<I, T>(
        &self,
        address: &str,
        roots: I,
    ) -> Result<Arc<ResolvedSchema>, SessionError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let roots: BTreeSet<String> = roots.into_iter().map(Into::into).collect();

        if self.config.verify_server_version {
            self.refresh_if_outdated(address).await?;
        }

        if let Some(cached) = self.cache.get(address).await {
            if cached.defines_all(&roots) {
                debug!(%address, "schema cache hit");
                return Ok(cached);
            }

            debug!(%address, "cached schema lacks requested symbols, resolving again");
            let union = cached.roots().union(&roots).cloned().collect();
            let fresh = Arc::new(self.resolve_uncached(address, union).await?);
            self.cache.replace(address, fresh.clone()).await;
            return Ok(fresh);
        }

        debug!(%address, "schema cache miss");
        let fresh = Arc::new(self.resolve_uncached(address, roots.clone()).await?);
        let stored = self.cache.insert_if_absent(address, fresh.clone()).await;

        if stored.defines_all(&roots) && stored.server_meta() == fresh.server_meta() {
            Ok(stored)
        } else {
            self.cache.replace(address, fresh.clone()).await;
            Ok(fresh)
        }
    }

    /// Drops the cached schema of `address`. Returns `false` if there was none.
    pub async fn invalidate(&self, address: &str) -> bool {
        self.cache.remove(address).await
    }

    /// Asks the server at `address` for its current [`ServerMeta`]. Never cached.
    ///
    /// Returns `None` when the server publishes no meta file or the session has none configured.
    pub async fn server_meta(&self, address: &str) -> Result<Option<ServerMeta>, SessionError> {
        let Some(file) = self.config.server_meta_file.clone() else {
            return Ok(None);
        };

        let service = self.connector.connect(address).await?;
        let mut client =
            ReflectionClient::new(service).with_timeout(self.config.reflection_timeout);

        let resolved = match DescriptorResolver::new(&mut client, self.config.max_closure_rounds)
            .with_extra_files([file])
            .resolve(&BTreeSet::new())
            .await
        {
            Ok(resolved) => resolved,
            Err(ResolveError::Reflection(ReflectionError::Server {
                code: NOT_FOUND, ..
            })) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let registry = TypeRegistry::from_encoded(resolved.files.into_values())?;
        Ok(ServerMeta::from_registry(&registry))
    }

    /// Drops the cached schema of `address` if the server now reports a different meta than
    /// the one it was resolved under. Returns `true` if an entry was dropped.
    pub async fn refresh_if_outdated(&self, address: &str) -> Result<bool, SessionError> {
        let Some(cached) = self.cache.get(address).await else {
            return Ok(false);
        };

        let live = self.server_meta(address).await?;
        if live.as_ref() == cached.server_meta() {
            return Ok(false);
        }

        info!(
            %address,
            cached = ?cached.server_meta().map(|m| &m.server_version),
            live = ?live.as_ref().map(|m| &m.server_version),
            "server version changed, dropping cached schema"
        );
        Ok(self.cache.remove(address).await)
    }

    async fn resolve_uncached(
        &self,
        address: &str,
        roots: BTreeSet<String>,
    ) -> Result<ResolvedSchema, SessionError> {
        let service = self.connector.connect(address).await?;
        let mut client =
            ReflectionClient::new(service).with_timeout(self.config.reflection_timeout);

        let resolved = DescriptorResolver::new(&mut client, self.config.max_closure_rounds)
            .with_extra_files(self.config.server_meta_file.clone())
            .resolve(&roots)
            .await?;
        debug!(
            %address,
            files = resolved.files.len(),
            rounds = resolved.rounds,
            "resolved descriptor closure"
        );

        let registry = TypeRegistry::from_encoded(resolved.files.into_values())?;
        Ok(ResolvedSchema::new(roots, registry))
    }

    /// Validates `args` against the tool's input type, then calls the tool.
    ///
    /// # Returns
    /// * `Ok(Ok(Value))` - The decoded response.
    /// * `Ok(Err(Status))` - The call reached the server, which returned an error.
    /// * `Err(ToolCallError)` - The call could not be made.
    pub async fn call_tool(
        &self,
        address: &str,
        tool: &ToolDescriptor,
        args: &Value,
        headers: Vec<(String, String)>,
    ) -> Result<Result<Value, tonic::Status>, ToolCallError> {
        let schema = self.resolve_types(address, tool.symbols()).await?;
        let method = schema.registry().lookup_method(&tool.service, &tool.method)?;

        if method.input().full_name() != tool.input_type
            || method.output().full_name() != tool.output_type
        {
            return Err(ToolCallError::SignatureMismatch {
                tool: tool.name.clone(),
                declared_input: tool.input_type.clone(),
                declared_output: tool.output_type.clone(),
                actual_input: method.input().full_name().to_string(),
                actual_output: method.output().full_name().to_string(),
            });
        }

        let violations = schema.validate(&tool.input_type, args);
        if !violations.is_empty() {
            return Err(ToolCallError::InvalidArguments(violations));
        }

        let request = schema.codec().to_message(&tool.input_type, args)?;
        let size = request.encoded_len();
        if size > self.config.max_message_bytes {
            return Err(ToolCallError::MessageTooLarge {
                size,
                limit: self.config.max_message_bytes,
            });
        }

        let service = self.connector.connect(address).await?;
        let mut client = GrpcClient::new(service);
        debug!(tool = %tool.name, %address, "invoking tool");

        match client.unary(&method, request, headers).await? {
            Ok(response) => Ok(Ok(codec::message_to_value(&response))),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Like [`call_tool`](Self::call_tool), with the arguments packed in an `Any` envelope.
    ///
    /// The envelope must be addressed to the tool's input type.
    pub async fn call_tool_with_any(
        &self,
        address: &str,
        tool: &ToolDescriptor,
        envelope: &AnyEnvelope,
        headers: Vec<(String, String)>,
    ) -> Result<Result<Value, tonic::Status>, ToolCallError> {
        let type_name = codec::any::type_name_from_url(&envelope.type_url)?;
        if type_name != tool.input_type {
            return Err(ToolCallError::TypeUrlMismatch {
                type_url: envelope.type_url.clone(),
                expected: tool.input_type.clone(),
            });
        }

        if envelope.value.len() > self.config.max_message_bytes {
            return Err(ToolCallError::MessageTooLarge {
                size: envelope.value.len(),
                limit: self.config.max_message_bytes,
            });
        }

        let schema = self.resolve_types(address, tool.symbols()).await?;
        let args = schema.decode_any(envelope)?;

        self.call_tool(address, tool, &args, headers).await
    }
}
