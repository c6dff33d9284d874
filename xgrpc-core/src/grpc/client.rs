//! # Generic gRPC Client
//!
//! Wraps a `tonic::client::Grpc` so that calls can be made to any path with already-encoded
//! payloads. The client doesn't know anything about the messages it carries; it only builds
//! the request (path, metadata, deadline), waits for the service to be ready and splits the
//! reply into headers, message and trailers.
use super::codec::BytesCodec;
use crate::BoxError;
use base64::{Engine, prelude::BASE64_STANDARD};
use bytes::Bytes;
use http_body::Body as HttpBody;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tonic::{
    Status,
    client::GrpcService,
    metadata::{
        AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue,
        KeyAndValueRef, MetadataMap,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
    #[error("Invalid method path '{0}'")]
    InvalidPath(String),
}

/// Maximum message sizes applied to every call made through a [`GrpcClient`].
///
/// `None` keeps tonic's defaults (4MiB when decoding, unlimited when encoding).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageLimits {
    pub max_receive_size: Option<usize>,
    pub max_send_size: Option<usize>,
}

/// The parts of a successful unary reply.
#[derive(Debug, Clone)]
pub struct UnaryResponse {
    pub headers: MetadataMap,
    pub message: Bytes,
    pub trailers: MetadataMap,
}

pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    pub fn with_limits(service: S, limits: MessageLimits) -> Self {
        let mut client = tonic::client::Grpc::new(service);
        if let Some(limit) = limits.max_receive_size {
            client = client.max_decoding_message_size(limit);
        }
        if let Some(limit) = limits.max_send_size {
            client = client.max_encoding_message_size(limit);
        }
        Self { client }
    }

    /// Performs a unary call to `path` with an encoded `payload`.
    ///
    /// The call is made as a server stream so the headers, the single message and the trailers
    /// can be read separately.
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(UnaryResponse))` - The server answered with a message and an OK status.
    /// * `Ok(Err(Status))` - The call was sent but finished with a non-OK status. Connection
    ///   problems also surface here, as statuses carrying a source error.
    /// * `Err(GrpcRequestError)` - The request couldn't be built or the client never became ready.
    pub async fn unary(
        &mut self,
        path: &str,
        payload: Bytes,
        metadata: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<Result<UnaryResponse, Status>, GrpcRequestError> {
        let path = http::uri::PathAndQuery::from_str(path)
            .map_err(|_| GrpcRequestError::InvalidPath(path.to_string()))?;

        let mut request = build_request(payload, metadata)?;
        if let Some(timeout) = timeout {
            request.set_timeout(timeout);
        }

        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;

        let response = match self.client.server_streaming(request, path, BytesCodec).await {
            Ok(response) => response,
            Err(status) => return Ok(Err(status)),
        };

        let (headers, mut stream, _) = response.into_parts();

        let message = match stream.message().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Ok(Err(Status::internal(
                    "Server closed the stream without sending a response message",
                )));
            }
            Err(status) => return Ok(Err(status)),
        };

        let trailers = match stream.trailers().await {
            Ok(trailers) => trailers.unwrap_or_default(),
            Err(status) => return Ok(Err(status)),
        };

        Ok(Ok(UnaryResponse {
            headers,
            message,
            trailers,
        }))
    }
}

/// Builds a request carrying `metadata` as call headers.
///
/// Keys ending in `-bin` are sent as binary metadata with the value's raw bytes.
fn build_request<T>(
    payload: T,
    metadata: &[(String, String)],
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    for (k, v) in metadata {
        if k.ends_with("-bin") {
            let key = BinaryMetadataKey::from_str(k).map_err(|source| {
                GrpcRequestError::InvalidMetadataKey {
                    key: k.clone(),
                    source,
                }
            })?;
            let val = BinaryMetadataValue::from_bytes(v.as_bytes());
            request.metadata_mut().append_bin(key, val);
        } else {
            let key = AsciiMetadataKey::from_str(k).map_err(|source| {
                GrpcRequestError::InvalidMetadataKey {
                    key: k.clone(),
                    source,
                }
            })?;
            let val = AsciiMetadataValue::from_str(v).map_err(|source| {
                GrpcRequestError::InvalidMetadataValue {
                    key: k.clone(),
                    source,
                }
            })?;
            request.metadata_mut().append(key, val);
        }
    }
    Ok(request)
}

/// Flattens a `MetadataMap` into a sorted multimap. Binary values are base64 encoded.
pub fn metadata_to_map(metadata: &MetadataMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in metadata.iter() {
        match entry {
            KeyAndValueRef::Ascii(key, value) => {
                let value = match value.to_str() {
                    Ok(text) => text.to_string(),
                    Err(_) => BASE64_STANDARD.encode(value.as_encoded_bytes()),
                };
                map.entry(key.as_str().to_string()).or_default().push(value);
            }
            KeyAndValueRef::Binary(key, value) => {
                let value = match value.to_bytes() {
                    Ok(bytes) => BASE64_STANDARD.encode(bytes),
                    Err(_) => BASE64_STANDARD.encode(value.as_encoded_bytes()),
                };
                map.entry(key.as_str().to_string()).or_default().push(value);
            }
        }
    }
    map
}
