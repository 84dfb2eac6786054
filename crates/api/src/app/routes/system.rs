use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::context::CallerContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Static description of the HTTP surface.
pub async fn docs() -> impl IntoResponse {
    Json(json!({
        "service": "fundguard",
        "auth": {
            "header": "X-API-Key",
            "fallback_header": "api_key",
            "owner_header": "X-Owner-Service-ID",
        },
        "endpoints": [
            {"method": "GET", "path": "/health", "auth": false},
            {"method": "GET", "path": "/docs", "auth": false},
            {"method": "GET", "path": "/whoami", "auth": true},
            {"method": "GET", "path": "/accounts/{id}", "auth": true},
            {"method": "PUT", "path": "/accounts/{id}/limit", "auth": true, "body": {"delta": "i64"}},
            {"method": "PUT", "path": "/accounts/{id}/balance", "auth": true, "body": {"delta": "i64"}},
            {
                "method": "POST",
                "path": "/accounts/{id}/reservation",
                "auth": true,
                "body": {
                    "owner_service_id": "i64 (optional)",
                    "amount": "i64",
                    "idempotency_key": "string",
                    "timeout_seconds": "u64",
                },
            },
            {"method": "GET", "path": "/reservations/{id}", "auth": true},
            {"method": "POST", "path": "/reservations/{id}/confirm", "auth": true},
            {"method": "POST", "path": "/reservations/{id}/cancel", "auth": true},
        ],
        "errors": {
            "not_found": 404,
            "insufficient_funds": 422,
            "invalid_state": 409,
            "expired": 410,
            "validation_error": 400,
            "invalid_id": 400,
            "unauthorized": 401,
            "store_error": 500,
        },
    }))
}

pub async fn whoami(Extension(caller): Extension<CallerContext>) -> impl IntoResponse {
    Json(json!({
        "service_id": caller.service_id(),
        "principal": caller.principal().to_string(),
    }))
}
