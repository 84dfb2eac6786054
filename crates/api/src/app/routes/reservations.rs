use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use fundguard_core::{ReservationId, ReservationStatus};

use crate::app::routes::owner_from_headers;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_reservation))
        .route("/:id/confirm", post(confirm_reservation))
        .route("/:id/cancel", post(cancel_reservation))
}

pub async fn get_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> axum::response::Response {
    let reservation_id: ReservationId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let owner = match owner_from_headers(&headers, &caller) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.engine.reservation(reservation_id, owner).await {
        Ok(r) => (StatusCode::OK, Json(dto::reservation_to_json(&r))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn confirm_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> axum::response::Response {
    let reservation_id: ReservationId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let owner = match owner_from_headers(&headers, &caller) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.engine.confirm_reservation(reservation_id, owner).await {
        Ok(()) => transitioned(reservation_id, ReservationStatus::Confirmed),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn cancel_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> axum::response::Response {
    let reservation_id: ReservationId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let owner = match owner_from_headers(&headers, &caller) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.engine.cancel_reservation(reservation_id, owner).await {
        Ok(()) => transitioned(reservation_id, ReservationStatus::Cancelled),
        Err(e) => errors::engine_error_to_response(e),
    }
}

fn transitioned(id: ReservationId, status: ReservationStatus) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({"id": id, "status": status.as_str()})),
    )
        .into_response()
}
