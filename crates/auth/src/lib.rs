//! `fundguard-auth`: API-key authentication boundary.
//!
//! This crate is intentionally decoupled from HTTP. Storage-backed key stores
//! implement [`ApiKeyValidator`] in the infrastructure layer.

pub mod api_key;
pub mod principal;

pub use api_key::{ApiKey, ApiKeyError, ApiKeyValidator, StaticApiKeys};
pub use principal::ServicePrincipal;
