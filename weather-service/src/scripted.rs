//! A reflection server with canned answers.
//!
//! Serves raw descriptor bytes verbatim (custom options included), answers selected requests
//! with an `error_response`, and can end its stream abnormally. Every opened stream is counted.
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1::{
    ErrorResponse, FileDescriptorResponse, ListServiceResponse, ServerReflectionRequest,
    ServerReflectionResponse, ServiceResponse,
};
use tonic_reflection::server::v1::{ServerReflection, ServerReflectionServer};

/// How a stream ends once every canned answer has been sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamEnding {
    #[default]
    Complete,
    /// Fails the stream with `UNAVAILABLE`.
    Abort,
    /// Never ends the stream.
    Hang,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedReflection {
    files: HashMap<String, Vec<u8>>,
    symbols: HashMap<String, String>,
    services: Vec<String>,
    failing: HashSet<String>,
    ending: StreamEnding,
    streams: Arc<AtomicUsize>,
}

impl ScriptedReflection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `raw` under `name`, as the file defining each of `symbols`.
    pub fn with_file(mut self, name: &str, raw: Vec<u8>, symbols: &[&str]) -> Self {
        for symbol in symbols {
            self.symbols.insert(symbol.to_string(), name.to_string());
        }
        self.files.insert(name.to_string(), raw);
        self
    }

    pub fn with_services(mut self, services: &[&str]) -> Self {
        self.services = services.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Answers requests for `target` (a symbol or a file name) with `NOT_FOUND`.
    pub fn failing(mut self, target: &str) -> Self {
        self.failing.insert(target.to_string());
        self
    }

    pub fn ending(mut self, ending: StreamEnding) -> Self {
        self.ending = ending;
        self
    }

    /// A handle on the number of streams opened so far, shared by every clone.
    pub fn stream_counter(&self) -> Arc<AtomicUsize> {
        self.streams.clone()
    }

    pub fn into_service(self) -> ServerReflectionServer<Self> {
        ServerReflectionServer::new(self)
    }

    fn answer(&self, request: ServerReflectionRequest) -> ServerReflectionResponse {
        let message_response = match &request.message_request {
            Some(MessageRequest::ListServices(_)) => {
                MessageResponse::ListServicesResponse(ListServiceResponse {
                    service: self
                        .services
                        .iter()
                        .map(|name| ServiceResponse { name: name.clone() })
                        .collect(),
                })
            }
            Some(MessageRequest::FileContainingSymbol(symbol)) => {
                self.file_response(symbol, self.symbols.get(symbol))
            }
            Some(MessageRequest::FileByFilename(name)) => {
                self.file_response(name, self.files.contains_key(name).then_some(name))
            }
            _ => not_found("unsupported request"),
        };

        ServerReflectionResponse {
            valid_host: request.host.clone(),
            original_request: Some(request),
            message_response: Some(message_response),
        }
    }

    fn file_response(&self, target: &str, file: Option<&String>) -> MessageResponse {
        if self.failing.contains(target) {
            return not_found(&format!("'{target}' is not available"));
        }

        match file.and_then(|name| self.files.get(name)) {
            Some(raw) => MessageResponse::FileDescriptorResponse(FileDescriptorResponse {
                file_descriptor_proto: vec![raw.clone()],
            }),
            None => not_found(&format!("'{target}' not found")),
        }
    }
}

fn not_found(message: &str) -> MessageResponse {
    MessageResponse::ErrorResponse(ErrorResponse {
        error_code: tonic::Code::NotFound as i32,
        error_message: message.to_string(),
    })
}

type ResponseStream = Pin<Box<dyn Stream<Item = Result<ServerReflectionResponse, Status>> + Send>>;

#[tonic::async_trait]
impl ServerReflection for ScriptedReflection {
    type ServerReflectionInfoStream = ResponseStream;

    async fn server_reflection_info(
        &self,
        request: Request<Streaming<ServerReflectionRequest>>,
    ) -> Result<Response<Self::ServerReflectionInfoStream>, Status> {
        self.streams.fetch_add(1, Ordering::SeqCst);

        let mut inbound = request.into_inner();
        let mut answers = Vec::new();
        while let Some(request) = inbound.message().await? {
            answers.push(Ok(self.answer(request)));
        }

        let answers = tokio_stream::iter(answers);
        let stream: ResponseStream = match self.ending {
            StreamEnding::Complete => Box::pin(answers),
            StreamEnding::Abort => Box::pin(answers.chain(tokio_stream::once(Err(
                Status::unavailable("reflection backend went away"),
            )))),
            StreamEnding::Hang => Box::pin(answers.chain(tokio_stream::pending())),
        };

        Ok(Response::new(stream))
    }
}
