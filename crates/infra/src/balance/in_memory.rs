use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, instrument};

use fundguard_core::{
    Account, AccountId, Clock, DomainError, OpenReservation, OwnerServiceId, Reservation,
    ReservationId, ReservationStatus, SystemClock, UserId,
};

use super::engine::{BalanceEngine, EngineError};

type Row<T> = Arc<Mutex<T>>;
type KeySlot = Row<Option<ReservationId>>;

/// In-memory balance engine.
///
/// Intended for tests/dev. Each account, reservation and idempotency key has
/// its own mutex, so work on different accounts runs in parallel while work on
/// the same row serializes. Lock order matches the Postgres engine:
/// idempotency key or reservation first, then account. The maps themselves
/// are only locked long enough to clone a row handle.
///
/// Changes are computed on copies and written back only when every step
/// succeeded.
#[derive(Debug)]
pub struct InMemoryBalanceEngine {
    accounts: RwLock<HashMap<AccountId, Row<Account>>>,
    reservations: RwLock<HashMap<ReservationId, Row<Reservation>>>,
    keys: Mutex<HashMap<(OwnerServiceId, String), KeySlot>>,
    next_account_id: AtomicI64,
    next_reservation_id: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryBalanceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBalanceEngine {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            reservations: RwLock::new(HashMap::new()),
            keys: Mutex::new(HashMap::new()),
            next_account_id: AtomicI64::new(0),
            next_reservation_id: AtomicI64::new(0),
            clock,
        }
    }

    /// Seed an account. Ids are assigned sequentially from 1.
    pub fn create_account(
        &self,
        user_id: UserId,
        current_amount: i64,
        max_amount: i64,
    ) -> Result<Account, EngineError> {
        if current_amount < 0 || current_amount > max_amount {
            return Err(DomainError::validation(
                "current_amount must be within [0, max_amount]",
            )
            .into());
        }

        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let id = AccountId::new(self.next_account_id.fetch_add(1, Ordering::Relaxed) + 1);
        let account = Account::new(id, user_id, current_amount, max_amount);
        accounts.insert(id, Arc::new(Mutex::new(account.clone())));
        Ok(account)
    }

    /// Sum of `ACTIVE` reservation amounts held against `account_id`.
    pub fn active_hold_total(&self, account_id: AccountId) -> Result<i64, EngineError> {
        let rows: Vec<Row<Reservation>> = self
            .reservations
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();

        let mut total = 0;
        for row in rows {
            let r = row.lock().map_err(poisoned)?;
            if r.account_id == account_id && r.status == ReservationStatus::Active {
                total += r.amount;
            }
        }
        Ok(total)
    }

    fn account_row(&self, account_id: AccountId) -> Result<Option<Row<Account>>, EngineError> {
        Ok(self
            .accounts
            .read()
            .map_err(poisoned)?
            .get(&account_id)
            .cloned())
    }

    fn reservation_row(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Row<Reservation>>, EngineError> {
        Ok(self
            .reservations
            .read()
            .map_err(poisoned)?
            .get(&reservation_id)
            .cloned())
    }

    /// Slot serializing opens that share `(owner, key)`. Holds the reservation
    /// id once one has been created under that key.
    fn key_slot(&self, owner_service_id: OwnerServiceId, key: &str) -> Result<KeySlot, EngineError> {
        let mut keys = self.keys.lock().map_err(poisoned)?;
        Ok(keys
            .entry((owner_service_id, key.to_string()))
            .or_default()
            .clone())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> EngineError {
    EngineError::storage("lock poisoned")
}

fn rejected(operation: &'static str, err: DomainError) -> EngineError {
    debug!(operation, error = %err, "operation rejected");
    EngineError::Domain(err)
}

fn missing_account(reservation: &Reservation) -> EngineError {
    EngineError::Domain(DomainError::invariant(format!(
        "reservation {} references missing account {}",
        reservation.id, reservation.account_id
    )))
}

fn ensure_owner(
    reservation: &Reservation,
    owner_service_id: OwnerServiceId,
) -> Result<(), DomainError> {
    if reservation.owner_service_id != owner_service_id {
        return Err(DomainError::NotFound);
    }
    Ok(())
}

#[async_trait]
impl BalanceEngine for InMemoryBalanceEngine {
    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn update_limit(&self, account_id: AccountId, delta: i64) -> Result<(), EngineError> {
        let row = self
            .account_row(account_id)?
            .ok_or_else(|| rejected("update_limit", DomainError::NotFound))?;
        let mut account = row.lock().map_err(poisoned)?;

        let mut next = account.clone();
        next.adjust_limit(delta)
            .map_err(|e| rejected("update_limit", e))?;
        *account = next;
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn update_balance(&self, account_id: AccountId, delta: i64) -> Result<(), EngineError> {
        let row = self
            .account_row(account_id)?
            .ok_or_else(|| rejected("update_balance", DomainError::NotFound))?;
        let mut account = row.lock().map_err(poisoned)?;

        let mut next = account.clone();
        next.adjust_balance(delta)
            .map_err(|e| rejected("update_balance", e))?;
        *account = next;
        Ok(())
    }

    #[instrument(
        skip(self, request),
        fields(
            account_id = %request.account_id,
            owner_service_id = %request.owner_service_id,
            amount = request.amount
        )
    )]
    async fn open_reservation(&self, request: OpenReservation) -> Result<Reservation, EngineError> {
        request
            .validate_key()
            .map_err(|e| rejected("open_reservation", e))?;

        let slot = self.key_slot(request.owner_service_id, &request.idempotency_key)?;
        let mut claimed = slot.lock().map_err(poisoned)?;

        if let Some(existing_id) = *claimed {
            let row = self.reservation_row(existing_id)?.ok_or_else(|| {
                EngineError::storage(format!(
                    "idempotency index points at missing reservation {existing_id}"
                ))
            })?;
            let existing = row.lock().map_err(poisoned)?.clone();
            debug!(reservation_id = %existing.id, "idempotent replay");
            return Ok(existing);
        }

        request
            .validate_terms()
            .map_err(|e| rejected("open_reservation", e))?;

        let row = self
            .account_row(request.account_id)?
            .ok_or_else(|| rejected("open_reservation", DomainError::NotFound))?;
        let mut account = row.lock().map_err(poisoned)?;

        let mut next = account.clone();
        next.hold(request.amount)
            .map_err(|e| rejected("open_reservation", e))?;

        let now = self.clock.now();
        let expires_at = request
            .expires_at(now)
            .map_err(|e| rejected("open_reservation", e))?;

        let reservation = Reservation {
            id: ReservationId::new(self.next_reservation_id.fetch_add(1, Ordering::Relaxed) + 1),
            account_id: request.account_id,
            owner_service_id: request.owner_service_id,
            amount: request.amount,
            status: ReservationStatus::Active,
            idempotency_key: request.idempotency_key,
            expires_at,
            created_at: now,
        };

        self.reservations
            .write()
            .map_err(poisoned)?
            .insert(reservation.id, Arc::new(Mutex::new(reservation.clone())));
        *account = next;
        *claimed = Some(reservation.id);
        Ok(reservation)
    }

    #[instrument(
        skip(self),
        fields(reservation_id = %reservation_id, owner_service_id = %owner_service_id)
    )]
    async fn confirm_reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<(), EngineError> {
        let row = self
            .reservation_row(reservation_id)?
            .ok_or_else(|| rejected("confirm_reservation", DomainError::NotFound))?;
        let mut reservation = row.lock().map_err(poisoned)?;
        ensure_owner(&reservation, owner_service_id)
            .map_err(|e| rejected("confirm_reservation", e))?;

        let mut confirmed = reservation.clone();
        confirmed
            .confirm(self.clock.now())
            .map_err(|e| rejected("confirm_reservation", e))?;

        let account_row = self
            .account_row(confirmed.account_id)?
            .ok_or_else(|| missing_account(&confirmed))?;
        let mut account = account_row.lock().map_err(poisoned)?;

        let mut settled = account.clone();
        settled
            .settle(confirmed.amount)
            .map_err(|e| rejected("confirm_reservation", e))?;

        *account = settled;
        *reservation = confirmed;
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(reservation_id = %reservation_id, owner_service_id = %owner_service_id)
    )]
    async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<(), EngineError> {
        let row = self
            .reservation_row(reservation_id)?
            .ok_or_else(|| rejected("cancel_reservation", DomainError::NotFound))?;
        let mut reservation = row.lock().map_err(poisoned)?;
        ensure_owner(&reservation, owner_service_id)
            .map_err(|e| rejected("cancel_reservation", e))?;

        let mut cancelled = reservation.clone();
        cancelled
            .cancel()
            .map_err(|e| rejected("cancel_reservation", e))?;

        let account_row = self
            .account_row(cancelled.account_id)?
            .ok_or_else(|| missing_account(&cancelled))?;
        let mut account = account_row.lock().map_err(poisoned)?;

        let mut released = account.clone();
        released.release(cancelled.amount)?;

        *account = released;
        *reservation = cancelled;
        Ok(())
    }

    async fn account(&self, account_id: AccountId) -> Result<Account, EngineError> {
        let row = self
            .account_row(account_id)?
            .ok_or(EngineError::Domain(DomainError::NotFound))?;
        let account = row.lock().map_err(poisoned)?.clone();
        Ok(account)
    }

    async fn reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<Reservation, EngineError> {
        let row = self
            .reservation_row(reservation_id)?
            .ok_or(EngineError::Domain(DomainError::NotFound))?;
        let reservation = row.lock().map_err(poisoned)?.clone();
        ensure_owner(&reservation, owner_service_id)?;
        Ok(reservation)
    }
}
