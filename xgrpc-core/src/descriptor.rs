//! # Descriptor Store
//!
//! Runtime schema handling. Every ingestion path (encoded descriptor sets, protoset files,
//! `.proto` sources, server reflection) is normalized into a `FileDescriptorSet`, flattened in
//! dependency order and merged into a single [`DescriptorStore`].
mod fs;
mod graph;
mod store;

pub use fs::{FileSystem, OsFileSystem};
pub use graph::flatten;
pub use store::DescriptorStore;

use prost_reflect::MethodDescriptor;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to decode file descriptor set: '{0}'")]
    Decode(#[from] prost::DecodeError),
    #[error("Descriptor set is not valid base64: '{0}'")]
    Base64(#[from] base64::DecodeError),
    #[error("Couldn't read descriptor set file '{path}': '{source}'")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Couldn't determine the working directory: '{0}'")]
    WorkingDirectory(#[source] std::io::Error),
    #[error("Failed to compile proto files: '{0}'")]
    Compile(#[from] protox::Error),
    #[error("File '{file}' imports '{import}', which was not provided")]
    UnresolvedImport { file: String, import: String },
    #[error("File '{0}' was already loaded with different definitions")]
    ConflictingFile(String),
    #[error("Invalid descriptor: '{0}'")]
    Descriptor(#[from] prost_reflect::DescriptorError),
}

/// Summary of a method made available by a load call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodInfo {
    /// Protobuf package of the file declaring the service (e.g. `echo`).
    pub package: String,
    /// Short service name (e.g. `EchoService`).
    pub service: String,
    /// Method name (e.g. `UnaryEcho`).
    pub name: String,
    /// Invocation path (e.g. `/echo.EchoService/UnaryEcho`).
    pub full_method: String,
    pub is_client_streaming: bool,
    pub is_server_streaming: bool,
}

impl MethodInfo {
    pub fn from_descriptor(method: &MethodDescriptor) -> Self {
        let service = method.parent_service();
        Self {
            package: service.package_name().to_string(),
            service: service.name().to_string(),
            name: method.name().to_string(),
            full_method: method_path(method),
            is_client_streaming: method.is_client_streaming(),
            is_server_streaming: method.is_server_streaming(),
        }
    }
}

/// Builds the `/package.Service/Method` path used both as method key and as HTTP/2 path.
pub fn method_path(method: &MethodDescriptor) -> String {
    format!("/{}/{}", method.parent_service().full_name(), method.name())
}
