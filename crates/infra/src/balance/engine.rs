use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use fundguard_core::{
    Account, AccountId, DomainError, OpenReservation, OwnerServiceId, Reservation, ReservationId,
};

/// Balance engine operation error.
///
/// Business outcomes travel as [`DomainError`]; `Storage` covers everything the
/// caller cannot act on (connection loss, unexpected SQL failures, poisoned
/// locks).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// Atomic operations over accounts and reservations.
///
/// Implementations must:
/// - run every multi-step operation as one unit that is fully applied or not at all
/// - serialize operations touching the same account (or reservation) row
/// - return the stored reservation for a repeated `(owner_service_id, idempotency_key)`
///   whatever its status or the retry's terms, without reserving funds again
/// - treat a reservation owned by another service as absent (`NotFound`)
#[async_trait]
pub trait BalanceEngine: Send + Sync {
    /// Add `delta` to `max_amount`. No bound validation.
    async fn update_limit(&self, account_id: AccountId, delta: i64) -> Result<(), EngineError>;

    /// Add `delta` to `current_amount` if the result stays within `[0, max_amount]`.
    async fn update_balance(&self, account_id: AccountId, delta: i64) -> Result<(), EngineError>;

    /// Put funds on hold, or return the reservation already opened with this key.
    async fn open_reservation(&self, request: OpenReservation) -> Result<Reservation, EngineError>;

    /// Spend an active, unexpired hold.
    async fn confirm_reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<(), EngineError>;

    /// Release an active hold (expired or not).
    async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<(), EngineError>;

    async fn account(&self, account_id: AccountId) -> Result<Account, EngineError>;

    async fn reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<Reservation, EngineError>;
}

#[async_trait]
impl<E> BalanceEngine for Arc<E>
where
    E: BalanceEngine + ?Sized,
{
    async fn update_limit(&self, account_id: AccountId, delta: i64) -> Result<(), EngineError> {
        (**self).update_limit(account_id, delta).await
    }

    async fn update_balance(&self, account_id: AccountId, delta: i64) -> Result<(), EngineError> {
        (**self).update_balance(account_id, delta).await
    }

    async fn open_reservation(&self, request: OpenReservation) -> Result<Reservation, EngineError> {
        (**self).open_reservation(request).await
    }

    async fn confirm_reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<(), EngineError> {
        (**self)
            .confirm_reservation(reservation_id, owner_service_id)
            .await
    }

    async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<(), EngineError> {
        (**self)
            .cancel_reservation(reservation_id, owner_service_id)
            .await
    }

    async fn account(&self, account_id: AccountId) -> Result<Account, EngineError> {
        (**self).account(account_id).await
    }

    async fn reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<Reservation, EngineError> {
        (**self).reservation(reservation_id, owner_service_id).await
    }
}
