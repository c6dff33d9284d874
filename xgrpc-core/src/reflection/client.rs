//! # Reflection Client
//!
//! A client implementation for `grpc.reflection.v1`.
//!
//! This client is responsible for building a complete `FileDescriptorSet` by querying
//! a server that supports reflection. It handles the complexity of dependency management by inspecting
//! imports and recursively fetching missing files until the entire schema tree for a
//! requested symbol is resolved.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use futures_util::stream::once;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Streaming, client::GrpcService};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),
}

// The host field of reflection requests is optional and servers ignore it in practice.
const EMPTY_HOST: &str = "";

const REFLECTION_PACKAGE_PREFIX: &str = "grpc.reflection.";

/// A generic client for the gRPC Server Reflection Protocol.
pub struct ReflectionClient<T = Channel> {
    client: ServerReflectionClient<T>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(channel: S) -> Self {
        let client = ServerReflectionClient::new(channel);
        Self { client }
    }

    /// Fetches the schema of every service the server exposes, reflection itself excluded.
    ///
    /// All lookups share one reflection stream and one set of collected files, so a file
    /// imported by several services is only transferred once.
    pub async fn file_descriptor_set(&mut self) -> Result<FileDescriptorSet, ReflectionResolveError> {
        let services: Vec<String> = self
            .list_services()
            .await?
            .into_iter()
            .filter(|s| !s.starts_with(REFLECTION_PACKAGE_PREFIX))
            .collect();

        let mut stream = self.open_stream().await?;
        let mut collector = FileCollector::default();

        for service in &services {
            collector.resolve_symbol(&mut stream, service).await?;
        }

        debug!(
            services = services.len(),
            files = collector.collected.len(),
            "Resolved server schema through reflection"
        );

        Ok(collector.into_set())
    }

    /// Asks the reflection service for the file containing the requested symbol (e.g., `my.package.MyService`).
    ///
    /// **Recursive Resolution**:
    ///    - The server returns a `FileDescriptorProto`.
    ///    - The client inspects the imports (dependencies) of that file.
    ///    - It recursively requests any missing dependencies until the full `FileDescriptorSet` is built.
    ///
    /// # Returns
    ///
    /// * `Ok(fd_set)` - Successful reflection requests execution.
    /// * `Err(ReflectionResolveError)` - Failed to request file descriptors to the reflection service.
    pub async fn file_descriptor_set_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<FileDescriptorSet, ReflectionResolveError> {
        let mut stream = self.open_stream().await?;
        let mut collector = FileCollector::default();

        collector.resolve_symbol(&mut stream, symbol).await?;

        Ok(collector.into_set())
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        let req = request(MessageRequest::ListServices(String::new()));

        let mut response_stream = self
            .client
            .server_reflection_info(once(async { req }))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        let response = response_stream
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)?;

        match response.message_response {
            Some(MessageResponse::ListServicesResponse(resp)) => {
                let services = resp.service.into_iter().map(|s| s.name).collect();
                Ok(services)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn open_stream(&mut self) -> Result<ReflectionStream, ReflectionResolveError> {
        let (tx, rx) = mpsc::channel(100);

        let responses = self
            .client
            .server_reflection_info(ReceiverStream::new(rx))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        Ok(ReflectionStream { tx, responses })
    }
}

struct ReflectionStream {
    tx: mpsc::Sender<ServerReflectionRequest>,
    responses: Streaming<ServerReflectionResponse>,
}

impl ReflectionStream {
    async fn send(&self, message: MessageRequest) -> Result<(), ReflectionResolveError> {
        self.tx
            .send(request(message))
            .await
            .map_err(|_| ReflectionResolveError::SendFailed)
    }

    async fn next(&mut self) -> Result<ServerReflectionResponse, ReflectionResolveError> {
        self.responses
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)
    }
}

#[derive(Default)]
struct FileCollector {
    collected: HashMap<String, FileDescriptorProto>,
    requested: HashSet<String>,
}

impl FileCollector {
    async fn resolve_symbol(
        &mut self,
        stream: &mut ReflectionStream,
        symbol: &str,
    ) -> Result<(), ReflectionResolveError> {
        stream
            .send(MessageRequest::FileContainingSymbol(symbol.to_string()))
            .await?;

        let mut inflight = 1;

        while inflight > 0 {
            let response = stream.next().await?;
            inflight -= 1;

            match response.message_response {
                Some(MessageResponse::FileDescriptorResponse(res)) => {
                    inflight += self.process_batch(res.file_descriptor_proto, stream).await?;
                }
                other => return Err(unexpected(other)),
            }
        }

        Ok(())
    }

    /// Stores every new file of a response and requests the imports not seen yet.
    ///
    /// Returns how many requests were sent.
    async fn process_batch(
        &mut self,
        raw_protos: Vec<Vec<u8>>,
        stream: &ReflectionStream,
    ) -> Result<usize, ReflectionResolveError> {
        let mut sent_count = 0;

        for raw in raw_protos {
            let fd = FileDescriptorProto::decode(raw.as_ref())?;
            let name = fd.name().to_string();

            if self.collected.contains_key(&name) {
                continue;
            }
            self.requested.insert(name.clone());

            for dep in &fd.dependency {
                if !self.collected.contains_key(dep) && self.requested.insert(dep.clone()) {
                    stream
                        .send(MessageRequest::FileByFilename(dep.clone()))
                        .await?;
                    sent_count += 1;
                }
            }

            self.collected.insert(name, fd);
        }

        Ok(sent_count)
    }

    fn into_set(self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.collected.into_values().collect(),
        }
    }
}

fn request(message: MessageRequest) -> ServerReflectionRequest {
    ServerReflectionRequest {
        host: EMPTY_HOST.to_string(),
        message_request: Some(message),
    }
}

fn unexpected(response: Option<MessageResponse>) -> ReflectionResolveError {
    match response {
        Some(MessageResponse::ErrorResponse(e)) => ReflectionResolveError::ServerError {
            code: e.error_code,
            message: e.error_message,
        },
        Some(other) => ReflectionResolveError::UnexpectedResponseType(format!("{other:?}")),
        None => ReflectionResolveError::UnexpectedResponseType("Empty Message".into()),
    }
}
