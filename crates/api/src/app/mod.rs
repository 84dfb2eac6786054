//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: engine and key-store wiring (Postgres or in-memory)
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: AppServices) -> Router {
    let auth_state = middleware::AuthState {
        api_keys: services.api_keys.clone(),
    };
    let services = Arc::new(services);

    // Protected routes: require a known API key.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/docs", get(routes::system::docs))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(
            middleware::request_id_middleware,
        )))
}
