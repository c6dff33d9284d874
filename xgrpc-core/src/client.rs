//! # xgrpc Client
//!
//! The [`Client`] is one session: it owns a [`DescriptorStore`] that grows with every load call,
//! a [`DynamicCodec`] and, once connected, a handle to a [`Connection`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use xgrpc_core::{Environment, client::{Client, InvokeOptions}, connection::ConnectOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = Client::new(Environment::new());
//! client.load_files(&["protos"], &["protos/echo.proto"])?;
//!
//! let options = ConnectOptions { plaintext: true, ..Default::default() };
//! client.connect("localhost:50051", options).await?;
//!
//! let response = client
//!     .invoke(
//!         "echo.EchoService/UnaryEcho",
//!         serde_json::json!({ "message": "hi" }),
//!         InvokeOptions::new().with_metadata("x-request-id", "42"),
//!     )
//!     .await?;
//!
//! println!("{:?}", response.message);
//! # Ok(())
//! # }
//! ```
mod options;
mod response;

pub use options::InvokeOptions;
pub use response::{Response, StatusError};

use crate::{
    BoxError, Environment,
    codec::{CodecError, DynamicCodec},
    config::ConfigError,
    connection::{ConnectError, ConnectOptions, Connection},
    descriptor::{DescriptorStore, MethodInfo, SchemaError},
    grpc::{GrpcClient, GrpcRequestError, UnaryResponse, metadata_to_map},
    observe::{CallOutcome, CallTags},
    reflection::ReflectionClient,
};
use bytes::Bytes;
use http_body::Body as HttpBody;
use std::fmt::{self, Debug};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tonic::{Code, Status, client::GrpcService, transport::Channel};
use tracing::{Instrument, debug, info_span};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("No gRPC connection, call connect first")]
    NotConnected,
    #[error("Method to invoke cannot be empty")]
    EmptyMethod,
    #[error("Method '{0}' not found in the loaded descriptors")]
    MethodNotFound(String),
    #[error("Method '{0}' is a streaming method, only unary calls are supported")]
    Streaming(String),
    #[error("Invalid invoke options: '{0}'")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
    #[error("Failed to encode the request: '{0}'")]
    Encode(#[source] CodecError),
    #[error("Failed to decode the response: '{0}'")]
    Decode(#[source] CodecError),
    #[error("Transport failure: '{0}'")]
    Transport(#[source] Status),
    #[error("Deadline exceeded: '{0}'")]
    DeadlineExceeded(#[source] Status),
}

impl InvokeError {
    /// The status code a call failing with this error is reported with.
    pub fn code(&self) -> Code {
        match self {
            InvokeError::Transport(status) | InvokeError::DeadlineExceeded(status) => status.code(),
            InvokeError::Decode(_) => Code::Internal,
            InvokeError::Request(GrpcRequestError::ClientNotReady(_)) => Code::Unavailable,
            _ => Code::InvalidArgument,
        }
    }
}

/// A dynamic gRPC session.
///
/// `S` is the transport service, a tonic [`Channel`] unless the session is attached to
/// something else (an in-process server, a tower stack).
pub struct Client<S = Channel> {
    env: Environment,
    store: DescriptorStore,
    codec: DynamicCodec,
    connection: Option<Arc<Connection<S>>>,
    shared: bool,
}

impl<S> Client<S> {
    pub fn new(env: Environment) -> Self {
        let codec = DynamicCodec::new(env.unknown_fields());
        Self {
            env,
            store: DescriptorStore::new(),
            codec,
            connection: None,
            shared: false,
        }
    }

    /// Loads a binary encoded `FileDescriptorSet`.
    pub fn load(&mut self, bytes: &[u8]) -> Result<Vec<MethodInfo>, SchemaError> {
        self.store.load(bytes)
    }

    /// Loads a base64 encoded `FileDescriptorSet`.
    pub fn load_base64(&mut self, encoded: &str) -> Result<Vec<MethodInfo>, SchemaError> {
        self.store.load_base64(encoded)
    }

    /// Loads a protoset file through the environment's file system.
    pub fn load_protoset(&mut self, path: impl AsRef<Path>) -> Result<Vec<MethodInfo>, SchemaError> {
        self.store.load_protoset(self.env.file_system(), path)
    }

    /// Compiles and loads `.proto` files.
    pub fn load_files<P, F>(
        &mut self,
        import_paths: &[P],
        filenames: &[F],
    ) -> Result<Vec<MethodInfo>, SchemaError>
    where
        P: AsRef<Path>,
        F: AsRef<Path>,
    {
        self.store.load_files(import_paths, filenames)
    }

    /// Every method loaded so far.
    pub fn methods(&self) -> Vec<MethodInfo> {
        self.store.methods()
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Uses `connection` for subsequent calls. A shared connection is left open on
    /// [`Client::close`].
    pub fn attach(&mut self, connection: Arc<Connection<S>>, shared: bool) {
        self.connection = Some(connection);
        self.shared = shared;
    }

    pub fn connection(&self) -> Option<&Arc<Connection<S>>> {
        self.connection.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Drops the session's connection. Exclusive connections also stop their resolver; shared
    /// ones stay in the pool for other sessions. Loaded descriptors are kept.
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if !self.shared {
                connection.close().await;
            }
            debug!(target = connection.target(), shared = self.shared, "Closed session connection");
        }
        self.shared = false;
    }
}

impl Client<Channel> {
    /// Connects the session to `target`, replacing any previous connection.
    ///
    /// With `reflect` set, the server's schema is loaded through reflection afterwards. A
    /// reflection failure is returned as an error but the connection stays usable.
    pub async fn connect(
        &mut self,
        target: &str,
        options: ConnectOptions,
    ) -> Result<(), ConnectError> {
        self.close().await;

        let connection = self.env.connector().connect(target, &options).await?;
        self.attach(connection, options.share_conn);

        if options.reflect {
            self.load_reflection(options.timeout).await?;
        }

        Ok(())
    }

    /// Like [`Client::connect`], with the options given as a JSON object.
    pub async fn connect_with_value(
        &mut self,
        target: &str,
        options: serde_json::Value,
    ) -> Result<(), ConnectError> {
        let options = ConnectOptions::from_value(options)?;
        self.connect(target, options).await
    }
}

impl<S> Client<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Loads every service the connected server exposes through reflection.
    pub async fn load_reflection(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<MethodInfo>, ConnectError> {
        let connection = self.connection.as_ref().ok_or(ConnectError::NotConnected)?;
        let mut reflection = ReflectionClient::new(connection.service());

        let fd_set = tokio::time::timeout(timeout, reflection.file_descriptor_set())
            .await
            .map_err(|_| ConnectError::ReflectionTimeout(timeout))??;

        Ok(self.store.load_file_descriptor_set(fd_set)?)
    }

    /// Performs a unary call.
    ///
    /// # Arguments
    ///
    /// * `method` - `package.Service/Method`, with or without the leading `/`.
    /// * `request` - The request message as JSON.
    /// * `options` - Metadata, deadline and tags of the call.
    ///
    /// # Returns
    ///
    /// * `Ok(Response)` - The server answered. Non-OK statuses are reported in the response.
    /// * `Err(InvokeError)` - The call couldn't be made, failed in transport or ran out of time.
    pub async fn invoke(
        &self,
        method: &str,
        request: serde_json::Value,
        options: InvokeOptions,
    ) -> Result<Response, InvokeError> {
        let connection = self.connection.as_ref().ok_or(InvokeError::NotConnected)?;
        let path = normalize_method(method)?;

        let descriptor = self
            .store
            .method(&path)
            .cloned()
            .ok_or_else(|| InvokeError::MethodNotFound(path.clone()))?;

        if descriptor.is_client_streaming() || descriptor.is_server_streaming() {
            return Err(InvokeError::Streaming(path));
        }

        let payload = self
            .codec
            .encode(request, &descriptor.input())
            .map_err(InvokeError::Encode)?;

        let tags = CallTags::new(connection.target(), &path, &options.tags);
        let span = info_span!(
            "grpc.invoke",
            url = %tags.url,
            service = %tags.service,
            method = %tags.method,
            name = %tags.name,
            tags = ?tags.user,
        );

        let started = Instant::now();
        let result = async {
            let reply = execute(connection, &path, payload, &options).await?;
            let response = Response {
                status: Code::Ok,
                message: Some(
                    self.codec
                        .decode(reply.message, &descriptor.output())
                        .map_err(InvokeError::Decode)?,
                ),
                headers: metadata_to_map(&reply.headers),
                trailers: metadata_to_map(&reply.trailers),
                error: None,
            };
            Ok::<_, ExecuteError>(response)
        }
        .instrument(span.clone())
        .await
        .or_else(|e| match e {
            ExecuteError::Status(status) => Ok(Response::from_status(&status)),
            ExecuteError::Invoke(e) => Err(e),
        });

        let outcome = CallOutcome {
            status: match &result {
                Ok(response) => response.status,
                Err(e) => e.code(),
            },
            duration: started.elapsed(),
        };
        span.in_scope(|| debug!(status = ?outcome.status, duration = ?outcome.duration, "Call finished"));
        self.env.observer().observe(&tags, &outcome);

        result
    }

    /// Like [`Client::invoke`], with the options given as a JSON object.
    pub async fn invoke_with_value(
        &self,
        method: &str,
        request: serde_json::Value,
        options: serde_json::Value,
    ) -> Result<Response, InvokeError> {
        let options = InvokeOptions::from_value(options)?;
        self.invoke(method, request, options).await
    }
}

/// Internal split between statuses reported by the server and failures of the call itself.
enum ExecuteError {
    Status(Status),
    Invoke(InvokeError),
}

impl From<InvokeError> for ExecuteError {
    fn from(e: InvokeError) -> Self {
        ExecuteError::Invoke(e)
    }
}

async fn execute<S>(
    connection: &Connection<S>,
    path: &str,
    payload: Bytes,
    options: &InvokeOptions,
) -> Result<UnaryResponse, ExecuteError>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let mut client = GrpcClient::with_limits(connection.service(), connection.limits());

    let call = client.unary(path, payload, &options.metadata, Some(options.timeout));
    let result = tokio::time::timeout(options.timeout, call)
        .await
        .map_err(|_| {
            InvokeError::DeadlineExceeded(Status::deadline_exceeded(format!(
                "Deadline of {:?} exceeded",
                options.timeout
            )))
        })?
        .map_err(InvokeError::Request)?;

    match result {
        Ok(reply) => Ok(reply),
        Err(status) if status.code() == Code::DeadlineExceeded => {
            Err(InvokeError::DeadlineExceeded(status).into())
        }
        // Statuses synthesized from a local error (connection refused, reset, ...) keep it as
        // their source; statuses sent by the server don't have one.
        Err(status) if std::error::Error::source(&status).is_some() => {
            Err(InvokeError::Transport(status).into())
        }
        Err(status) => Err(ExecuteError::Status(status)),
    }
}

fn normalize_method(method: &str) -> Result<String, InvokeError> {
    let method = method.trim();
    if method.is_empty() {
        return Err(InvokeError::EmptyMethod);
    }

    if method.starts_with('/') {
        Ok(method.to_string())
    } else {
        Ok(format!("/{method}"))
    }
}

impl<S> Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("methods", &self.store.methods().len())
            .field("connection", &self.connection)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}
