use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, error};
use uuid::Uuid;

use fundguard_auth::{ApiKey, ApiKeyError, ApiKeyValidator};

use crate::app::errors::json_error;
use crate::context::CallerContext;

const API_KEY_HEADER: &str = "x-api-key";
const API_KEY_FALLBACK_HEADER: &str = "api_key";
const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct AuthState {
    pub api_keys: Arc<dyn ApiKeyValidator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let key = match extract_api_key(req.headers()) {
        Ok(key) => key,
        Err(e) => return json_error(StatusCode::UNAUTHORIZED, "unauthorized", e.to_string()),
    };

    let principal = match state.api_keys.resolve(&key).await {
        Ok(p) => p,
        Err(ApiKeyError::Backend(msg)) => {
            error!(error = %msg, "api key store failure");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "auth_unavailable",
                "authentication backend unavailable",
            );
        }
        Err(e) => return json_error(StatusCode::UNAUTHORIZED, "unauthorized", e.to_string()),
    };

    tracing::Span::current().record("caller", tracing::field::display(principal));
    req.extensions_mut().insert(CallerContext::new(principal));

    next.run(req).await
}

fn extract_api_key(headers: &HeaderMap) -> Result<ApiKey, ApiKeyError> {
    let raw = headers
        .get(API_KEY_HEADER)
        .or_else(|| headers.get(API_KEY_FALLBACK_HEADER))
        .ok_or(ApiKeyError::Missing)?;

    let raw = raw.to_str().map_err(|_| ApiKeyError::Unknown)?;
    ApiKey::parse(raw)
}

/// Assign (or accept) a request id and run the request inside a span carrying it.
pub async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
        caller = tracing::field::Empty,
    );

    let mut res = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        res.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    res
}
