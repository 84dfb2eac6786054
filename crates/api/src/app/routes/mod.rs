use axum::{http::HeaderMap, response::Response, routing::get, Router};

use fundguard_core::OwnerServiceId;

use crate::app::errors;
use crate::context::CallerContext;

pub mod accounts;
pub mod reservations;
pub mod system;

/// Header naming the owner service a reservation call acts for.
pub const OWNER_HEADER: &str = "x-owner-service-id";

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/accounts", accounts::router())
        .nest("/reservations", reservations::router())
}

/// Owner from `X-Owner-Service-ID`, else the authenticated caller.
pub(crate) fn owner_from_headers(
    headers: &HeaderMap,
    caller: &CallerContext,
) -> Result<OwnerServiceId, Response> {
    match headers.get(OWNER_HEADER) {
        None => Ok(caller.service_id()),
        Some(value) => {
            let raw = value.to_str().map_err(|_| {
                errors::json_error(
                    axum::http::StatusCode::BAD_REQUEST,
                    "invalid_id",
                    "owner service id header is not valid text",
                )
            })?;
            errors::parse_id(raw)
        }
    }
}
