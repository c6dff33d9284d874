//! # Generic gRPC Transport
//!
//! Low-level building blocks for calls whose message types are only known at runtime: a
//! pass-through codec for encoded payloads and a client generic over any tonic service.
pub mod client;
pub mod codec;

pub use client::{GrpcClient, GrpcRequestError, MessageLimits, UnaryResponse, metadata_to_map};
