use serde::Deserialize;
use serde_json::{json, Value};

use fundguard_core::{Account, Reservation};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct UpdateDeltaRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct OpenReservationRequest {
    /// Defaults to the authenticated caller.
    #[serde(default)]
    pub owner_service_id: Option<i64>,
    pub amount: i64,
    pub idempotency_key: String,
    pub timeout_seconds: u64,
}

// -------------------------
// Response mapping
// -------------------------

pub fn account_to_json(account: &Account) -> Value {
    json!({
        "id": account.id,
        "user_id": account.user_id,
        "current_amount": account.current_amount,
        "max_amount": account.max_amount,
        "reserved_amount": account.reserved_amount,
        "available": account.available(),
    })
}

pub fn reservation_to_json(reservation: &Reservation) -> Value {
    json!({
        "id": reservation.id,
        "account_id": reservation.account_id,
        "owner_service_id": reservation.owner_service_id,
        "amount": reservation.amount,
        "status": reservation.status.as_str(),
        "idempotency_key": reservation.idempotency_key,
        "expires_at": reservation.expires_at.to_rfc3339(),
        "created_at": reservation.created_at.to_rfc3339(),
    })
}
