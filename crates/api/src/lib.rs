//! HTTP and gRPC APIs: routing, authentication, and request/response mapping.

pub mod app;
pub mod context;
pub mod grpc;
pub mod middleware;
