use core::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use fundguard_core::DomainError;
use fundguard_infra::balance::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::Domain(e) => domain_error_to_response(e),
        EngineError::Storage(msg) => {
            error!(error = %msg, "storage failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                "storage failure",
            )
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::InsufficientFunds => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "insufficient_funds", message)
        }
        DomainError::InvalidState(_) => json_error(StatusCode::CONFLICT, "invalid_state", message),
        DomainError::Expired => json_error(StatusCode::GONE, "expired", message),
        DomainError::Validation(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::InvariantViolation(_) => {
            error!(error = %message, "invariant violation");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "invariant_violation",
                message,
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path or header id, answering 400 `invalid_id` on failure.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(domain_error_to_response)
}
