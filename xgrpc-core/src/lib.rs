//! # xgrpc Core
//!
//! `xgrpc-core` is a dynamic gRPC client library. It invokes RPCs against schemas that are only
//! known at runtime, and it resolves call targets through a pluggable service-discovery backend.
//!
//! ## Key Components
//!
//! * **[`DescriptorStore`](descriptor::DescriptorStore):** Loads descriptor sets (raw bytes,
//!   base64, protoset files, `.proto` sources or server reflection), flattens their import graph
//!   and indexes every method by its `/package.Service/Method` path.
//! * **[`DynamicCodec`](codec::DynamicCodec):** Transcodes JSON values to Protobuf bytes and back
//!   using the protobuf-JSON mapping.
//! * **[`Connector`](connection::Connector):** Dials targets, optionally sharing connections
//!   through a [`ConnectionPool`](connection::ConnectionPool).
//! * **[`Client`](client::Client):** A session that owns its descriptors and connection and
//!   performs unary calls with metadata, deadlines and observability tags.
//! * **[`DiscoveryResolver`](discovery::DiscoveryResolver):** Subscribes to a naming registry and
//!   keeps a balance channel's endpoint set in sync with the healthy instances of a service.
//!
//! ## Shared state
//!
//! Nothing in this crate is process-global. Connection pools, resolver registries and
//! subscription tables are plain values bundled in an [`Environment`] and shared by cloning it.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod discovery;
pub mod environment;
pub mod grpc;
pub mod observe;
pub mod reflection;

pub use environment::Environment;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
