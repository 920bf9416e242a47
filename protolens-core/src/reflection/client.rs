//! # Reflection Client
//!
//! A client implementation for `grpc.reflection.v1`.
//!
//! Every call opens one `ServerReflectionInfo` stream, writes all of its requests up-front,
//! half-closes the request side and then drains the responses. Responses are keyed by the
//! file name found inside each `FileDescriptorProto`, so the order in which the server answers
//! does not matter.
//!
//! A server may answer some requests of a batch and fail others. Whatever was collected before
//! an `error_response`, a failed stream or the batch deadline is returned as a partial
//! [`DescriptorBatch`]; only a batch that collected nothing is an error. Malformed or
//! unexpected frames are skipped the same way.
//!
//! The deadline covers the whole exchange, from waiting for the service to be ready and for
//! the response headers to the last message.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use super::proto::{
    SERVER_REFLECTION_INFO_PATH, ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_request::MessageRequest, server_reflection_response::MessageResponse,
};
use crate::BoxError;
use crate::config::DEFAULT_REFLECTION_TIMEOUT;
use crate::wire::{FileHeader, WireError};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::uri::PathAndQuery;
use http_body::Body as HttpBody;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tonic::client::GrpcService;
use tonic::transport::Channel;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionError {
    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    StreamInit(#[source] tonic::Status),

    #[error("The server stream returned an error status: '{0}'")]
    Stream(#[source] tonic::Status),

    #[error("Server returned reflection error code {code}: {message}")]
    Server { code: i32, message: String },

    #[error("No descriptor was received within {0:?}")]
    TimedOut(Duration),

    #[error("Reflection stream closed before any response was received")]
    StreamClosed,

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponse(String),

    #[error("Received a malformed FileDescriptorProto: {0}")]
    Wire(#[from] WireError),
}

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
// So we won't enforce it from the user.
const EMPTY_HOST: &str = "";

/// One lookup within a reflection batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorRequest {
    /// `file_containing_symbol`: a message, enum, service or method name.
    Symbol(String),
    /// `file_by_filename`: a file name as listed in a `dependency` entry.
    File(String),
}

impl From<DescriptorRequest> for ServerReflectionRequest {
    fn from(request: DescriptorRequest) -> Self {
        let message_request = match request {
            DescriptorRequest::Symbol(symbol) => MessageRequest::FileContainingSymbol(symbol),
            DescriptorRequest::File(name) => MessageRequest::FileByFilename(name),
        };

        ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(message_request),
        }
    }
}

/// Raw `FileDescriptorProto` bytes collected by one reflection batch, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct DescriptorBatch {
    files: BTreeMap<String, Bytes>,
    failures: Vec<String>,
}

impl DescriptorBatch {
    /// Adds an encoded file. The first bytes seen for a given name win.
    ///
    /// Returns `true` if the file was not present yet.
    pub fn insert(&mut self, raw: Bytes) -> Result<bool, WireError> {
        let header = FileHeader::parse(&raw)?;
        if self.files.contains_key(&header.name) {
            return Ok(false);
        }
        self.files.insert(header.name, raw);
        Ok(true)
    }

    pub fn files(&self) -> &BTreeMap<String, Bytes> {
        &self.files
    }

    pub fn into_files(self) -> BTreeMap<String, Bytes> {
        self.files
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Errors reported by the server that were tolerated because some descriptors had
    /// already been collected.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }
}

/// A generic client for the gRPC Server Reflection Protocol.
#[derive(Debug, Clone)]
pub struct ReflectionClient<S = Channel> {
    client: tonic::client::Grpc<S>,
    timeout: Duration,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            client: tonic::client::Grpc::new(service),
            timeout: DEFAULT_REFLECTION_TIMEOUT,
        }
    }

    /// Sets the wall-clock budget of every batch issued by this client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionError> {
        let deadline = Instant::now() + self.timeout;
        let timeout = self.timeout;

        tokio::time::timeout_at(deadline, self.list_services_inner(deadline))
            .await
            .map_err(|_| ReflectionError::TimedOut(timeout))?
    }

    async fn list_services_inner(
        &mut self,
        deadline: Instant,
    ) -> Result<Vec<String>, ReflectionError> {
        let request = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(MessageRequest::ListServices(String::new())),
        };

        let mut response_stream = self.open_stream(vec![request], deadline).await?;

        let response = response_stream
            .message()
            .await
            .map_err(ReflectionError::Stream)?
            .ok_or(ReflectionError::StreamClosed)?;

        match response.message_response {
            Some(MessageResponse::ListServicesResponse(resp)) => {
                Ok(resp.service.into_iter().map(|s| s.name).collect())
            }
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionError::Server {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(other) => Err(ReflectionError::UnexpectedResponse(format!("{other:?}"))),
            None => Err(ReflectionError::UnexpectedResponse("Empty Message".into())),
        }
    }

    /// Fetches the files answering every request of the batch over a single stream.
    ///
    /// # Returns
    ///
    /// * `Ok(batch)` - At least one descriptor was collected (possibly a partial answer).
    /// * `Err(ReflectionError)` - The stream could not be opened, or it failed before any
    ///   descriptor was received.
    pub async fn fetch_descriptors(
        &mut self,
        requests: &[DescriptorRequest],
    ) -> Result<DescriptorBatch, ReflectionError> {
        if requests.is_empty() {
            return Ok(DescriptorBatch::default());
        }

        debug!(requests = requests.len(), "opening reflection batch");

        let deadline = Instant::now() + self.timeout;
        let messages = requests.iter().cloned().map(Into::into).collect();
        let response_stream = self.open_stream(messages, deadline).await?;

        collect_until(response_stream, deadline, self.timeout).await
    }

    async fn open_stream(
        &mut self,
        requests: Vec<ServerReflectionRequest>,
        deadline: Instant,
    ) -> Result<tonic::Streaming<ServerReflectionResponse>, ReflectionError> {
        let timeout = self.timeout;
        let timed_out = move |_: tokio::time::error::Elapsed| ReflectionError::TimedOut(timeout);

        tokio::time::timeout_at(deadline, self.client.ready())
            .await
            .map_err(timed_out)?
            .map_err(|e| {
                let e: BoxError = e.into();
                ReflectionError::StreamInit(tonic::Status::unavailable(format!(
                    "Service was not ready: {e}"
                )))
            })?;

        let codec = tonic_prost::ProstCodec::default();
        let path = PathAndQuery::from_static(SERVER_REFLECTION_INFO_PATH);

        // A finite request stream: the request side is half-closed once all messages are written.
        let request = tonic::Request::new(tokio_stream::iter(requests));

        let response = tokio::time::timeout_at(deadline, self.client.streaming(request, path, codec))
            .await
            .map_err(timed_out)?
            .map_err(ReflectionError::StreamInit)?;

        Ok(response.into_inner())
    }
}

/// Drains a reflection response stream into a [`DescriptorBatch`].
///
/// Stops at end-of-stream, at the first stream error or when `timeout` elapses. Server-side
/// `error_response`s do not stop the collection, since later responses may still answer other
/// requests of the same batch.
pub async fn collect_batch<St>(
    stream: St,
    timeout: Duration,
) -> Result<DescriptorBatch, ReflectionError>
where
    St: Stream<Item = Result<ServerReflectionResponse, tonic::Status>>,
{
    collect_until(stream, Instant::now() + timeout, timeout).await
}

async fn collect_until<St>(
    stream: St,
    deadline: Instant,
    timeout: Duration,
) -> Result<DescriptorBatch, ReflectionError>
where
    St: Stream<Item = Result<ServerReflectionResponse, tonic::Status>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut batch = DescriptorBatch::default();
    let mut first_error = None;

    loop {
        let next = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) if batch.is_empty() => return Err(ReflectionError::TimedOut(timeout)),
            Err(_) => {
                warn!(
                    collected = batch.len(),
                    "reflection batch timed out, keeping partial result"
                );
                break;
            }
        };

        let response = match next {
            None => break,
            Some(Ok(response)) => response,
            Some(Err(status)) if batch.is_empty() => return Err(ReflectionError::Stream(status)),
            Some(Err(status)) => {
                warn!(
                    collected = batch.len(),
                    %status,
                    "reflection stream failed, keeping partial result"
                );
                batch.failures.push(status.message().to_string());
                break;
            }
        };

        let error = match response.message_response {
            Some(MessageResponse::FileDescriptorResponse(res)) => {
                for raw in res.file_descriptor_proto {
                    if let Err(error) = batch.insert(raw) {
                        warn!(%error, "skipping malformed FileDescriptorProto");
                        batch.failures.push(error.to_string());
                        first_error.get_or_insert(ReflectionError::Wire(error));
                    }
                }
                continue;
            }
            Some(MessageResponse::ErrorResponse(e)) => {
                debug!(code = e.error_code, message = %e.error_message, "reflection error response");
                ReflectionError::Server {
                    code: e.error_code,
                    message: e.error_message,
                }
            }
            Some(other) => {
                let error = ReflectionError::UnexpectedResponse(format!("{other:?}"));
                warn!(%error, "skipping reflection response");
                error
            }
            None => {
                let error = ReflectionError::UnexpectedResponse("Empty Message".into());
                warn!(%error, "skipping reflection response");
                error
            }
        };

        batch.failures.push(match &error {
            ReflectionError::Server { message, .. } => message.clone(),
            other => other.to_string(),
        });
        first_error.get_or_insert(error);
    }

    match first_error {
        Some(err) if batch.is_empty() => Err(err),
        _ => Ok(batch),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reflection::proto::{ErrorResponse, FileDescriptorResponse, ListServiceResponse};
    use prost::Message;
    use prost_types::FileDescriptorProto;

    fn file(name: &str) -> Bytes {
        FileDescriptorProto {
            name: Some(name.to_string()),
            ..Default::default()
        }
        .encode_to_vec()
        .into()
    }

    fn files(raw: Vec<Bytes>) -> Result<ServerReflectionResponse, tonic::Status> {
        Ok(ServerReflectionResponse {
            message_response: Some(MessageResponse::FileDescriptorResponse(
                FileDescriptorResponse {
                    file_descriptor_proto: raw,
                },
            )),
            ..Default::default()
        })
    }

    fn error(code: i32, message: &str) -> Result<ServerReflectionResponse, tonic::Status> {
        Ok(ServerReflectionResponse {
            message_response: Some(MessageResponse::ErrorResponse(ErrorResponse {
                error_code: code,
                error_message: message.to_string(),
            })),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn first_seen_file_wins() {
        let first = file("a.proto");
        let second = FileDescriptorProto {
            name: Some("a.proto".to_string()),
            package: Some("other".to_string()),
            ..Default::default()
        }
        .encode_to_vec();

        let stream = tokio_stream::iter(vec![
            files(vec![first.clone()]),
            files(vec![second.into(), file("b.proto")]),
        ]);

        let batch = collect_batch(stream, Duration::from_secs(1)).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.files()["a.proto"], first);
    }

    #[tokio::test]
    async fn error_response_after_descriptors_keeps_partial_result() {
        let stream = tokio_stream::iter(vec![
            files(vec![file("a.proto")]),
            files(vec![file("b.proto")]),
            error(5, "symbol not found: c.C"),
        ]);

        let batch = collect_batch(stream, Duration::from_secs(1)).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.failures(), ["symbol not found: c.C"]);
    }

    #[tokio::test]
    async fn error_response_before_descriptors_is_not_fatal_when_others_succeed() {
        let stream = tokio_stream::iter(vec![
            error(5, "symbol not found: c.C"),
            files(vec![file("a.proto")]),
        ]);

        let batch = collect_batch(stream, Duration::from_secs(1)).await.unwrap();

        assert!(batch.contains("a.proto"));
    }

    #[tokio::test]
    async fn error_response_without_descriptors_fails() {
        let stream = tokio_stream::iter(vec![error(5, "symbol not found: c.C")]);

        let result = collect_batch(stream, Duration::from_secs(1)).await;

        assert!(matches!(
            result,
            Err(ReflectionError::Server { code: 5, .. })
        ));
    }

    #[tokio::test]
    async fn stream_failure_after_descriptors_keeps_partial_result() {
        let stream = tokio_stream::iter(vec![
            files(vec![file("a.proto")]),
            Err(tonic::Status::unavailable("connection reset")),
            files(vec![file("never.proto")]),
        ]);

        let batch = collect_batch(stream, Duration::from_secs(1)).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert!(!batch.contains("never.proto"));
    }

    #[tokio::test]
    async fn stream_failure_without_descriptors_fails() {
        let stream = tokio_stream::iter(vec![Err(tonic::Status::not_found("nope"))]);

        let result = collect_batch(stream, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(ReflectionError::Stream(status)) if status.code() == tonic::Code::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_what_was_collected() {
        let stream = tokio_stream::iter(vec![files(vec![file("a.proto")])])
            .chain(futures_util::stream::pending());

        let batch = collect_batch(stream, Duration::from_secs(5)).await.unwrap();

        assert!(batch.contains("a.proto"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_descriptors_fails() {
        let stream = futures_util::stream::pending::<Result<ServerReflectionResponse, tonic::Status>>();

        let result = collect_batch(stream, Duration::from_secs(5)).await;

        assert!(matches!(result, Err(ReflectionError::TimedOut(_))));
    }

    #[tokio::test]
    async fn malformed_descriptor_is_skipped() {
        let stream = tokio_stream::iter(vec![
            files(vec![file("a.proto")]),
            files(vec![Bytes::from_static(&[0x0a, 0x10, b'b']), file("c.proto")]),
        ]);

        let batch = collect_batch(stream, Duration::from_secs(1)).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert!(batch.contains("a.proto"));
        assert!(batch.contains("c.proto"));
        assert_eq!(batch.failures().len(), 1);
    }

    #[tokio::test]
    async fn malformed_descriptor_alone_fails() {
        let stream = tokio_stream::iter(vec![files(vec![Bytes::from_static(&[0x0a, 0x10])])]);

        let result = collect_batch(stream, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(ReflectionError::Wire(_))));
    }

    #[tokio::test]
    async fn unexpected_response_after_descriptors_keeps_partial_result() {
        let stream = tokio_stream::iter(vec![
            files(vec![file("a.proto")]),
            Ok(ServerReflectionResponse::default()),
            files(vec![file("b.proto")]),
        ]);

        let batch = collect_batch(stream, Duration::from_secs(1)).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.failures().len(), 1);
    }

    #[tokio::test]
    async fn unexpected_response_type_is_an_error() {
        let stream = tokio_stream::iter(vec![Ok(ServerReflectionResponse {
            message_response: Some(MessageResponse::ListServicesResponse(
                ListServiceResponse::default(),
            )),
            ..Default::default()
        })]);

        let result = collect_batch(stream, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(ReflectionError::UnexpectedResponse(_))));
    }
}
