use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use fundguard_core::{AccountId, OpenReservation, OwnerServiceId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_account))
        .route("/:id/limit", put(update_limit))
        .route("/:id/balance", put(update_balance))
        .route("/:id/reservation", post(open_reservation))
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let account_id: AccountId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.engine.account(account_id).await {
        Ok(account) => (StatusCode::OK, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn update_limit(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateDeltaRequest>,
) -> axum::response::Response {
    let account_id: AccountId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.engine.update_limit(account_id, body.delta).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"account_id": account_id, "status": "ok"})),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn update_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateDeltaRequest>,
) -> axum::response::Response {
    let account_id: AccountId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.engine.update_balance(account_id, body.delta).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"account_id": account_id, "status": "ok"})),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn open_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::OpenReservationRequest>,
) -> axum::response::Response {
    let account_id: AccountId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    let request = OpenReservation {
        owner_service_id: body
            .owner_service_id
            .map(OwnerServiceId::new)
            .unwrap_or_else(|| caller.service_id()),
        account_id,
        amount: body.amount,
        idempotency_key: body.idempotency_key,
        timeout: Duration::from_secs(body.timeout_seconds),
    };

    match services.engine.open_reservation(request).await {
        Ok(reservation) => {
            (StatusCode::OK, Json(dto::reservation_to_json(&reservation))).into_response()
        }
        Err(e) => errors::engine_error_to_response(e),
    }
}
