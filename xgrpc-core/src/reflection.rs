//! # Server Reflection
//!
//! Talks the gRPC Server Reflection Protocol (`grpc.reflection.v1`) so a session can learn a
//! server's schema at connect time instead of loading descriptors up front.
pub mod client;

pub use client::{ReflectionClient, ReflectionResolveError};
