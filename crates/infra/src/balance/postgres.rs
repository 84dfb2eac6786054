//! Postgres-backed balance engine.
//!
//! Every mutating operation runs inside one `sqlx::Transaction`. Rows are
//! locked with `SELECT ... FOR UPDATE`, the rules from `fundguard-core` are
//! applied to the locked copies, and the results are written back before
//! commit. Any early return drops the transaction, which rolls it back.
//!
//! Lock order is reservation, then account. Opening takes a transaction-scoped
//! advisory lock on `(owner_service_id, idempotency_key)` and then the account,
//! and never a reservation row, so there is no cycle.
//!
//! Time comes from the database (`now()`), read in the same statement that
//! takes the row lock.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EngineError |
//! |------------|----------------------|-------------|
//! | Database (numeric out of range) | `22003` | `Domain(Validation)` |
//! | Database (check constraint violation) | `23514` | `Domain(InvariantViolation)` |
//! | Database (unique violation) | `23505` | `Storage` (opens sharing a key are serialized first) |
//! | Database (other) | Any other | `Storage` |
//! | RowNotFound | N/A | `Domain(NotFound)` |
//! | Other | N/A | `Storage` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, error, instrument};

use fundguard_core::{
    Account, AccountId, DomainError, OpenReservation, OwnerServiceId, Reservation, ReservationId,
    ReservationStatus, UserId,
};

use super::engine::{BalanceEngine, EngineError};

const ACCOUNT_COLUMNS: &str = "id, user_id, current_amount, max_amount, reserved_amount";
const RESERVATION_COLUMNS: &str =
    "id, account_id, owner_service_id, amount, status, idempotency_key, expires_at, created_at";

/// Balance engine over the `accounts` and `reservations` tables.
#[derive(Debug, Clone)]
pub struct PostgresBalanceEngine {
    pool: PgPool,
}

impl PostgresBalanceEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Provision an account row. Accounts are otherwise created outside this
    /// service; this exists for bootstrap and tests.
    #[instrument(skip(self))]
    pub async fn insert_account(
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

        let row = sqlx::query(&format!(
            "INSERT INTO accounts (user_id, current_amount, max_amount, reserved_amount) \
             VALUES ($1, $2, $3, 0) RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(user_id.get())
        .bind(current_amount)
        .bind(max_amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;

        Ok(AccountRow::from_row(&row)
            .map_err(|e| map_sqlx_error("decode_account", e))?
            .into())
    }

    async fn account_exists(&self, account_id: AccountId) -> Result<bool, EngineError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
            .bind(account_id.get())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("account_exists", e))
    }
}

#[async_trait]
impl BalanceEngine for PostgresBalanceEngine {
    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn update_limit(&self, account_id: AccountId, delta: i64) -> Result<(), EngineError> {
        let result = sqlx::query("UPDATE accounts SET max_amount = max_amount + $1 WHERE id = $2")
            .bind(delta)
            .bind(account_id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_limit", e))?;

        if result.rows_affected() == 0 {
            return Err(rejected("update_limit", DomainError::NotFound));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn update_balance(&self, account_id: AccountId, delta: i64) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET current_amount = current_amount + $1
            WHERE id = $2
              AND current_amount + $1 >= 0
              AND current_amount + $1 <= max_amount
            "#,
        )
        .bind(delta)
        .bind(account_id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            // The sum overflowed bigint, so it cannot be within bounds.
            if is_numeric_overflow(&e) {
                rejected("update_balance", DomainError::InsufficientFunds)
            } else {
                map_sqlx_error("update_balance", e)
            }
        })?;

        if result.rows_affected() == 0 {
            let err = if self.account_exists(account_id).await? {
                DomainError::InsufficientFunds
            } else {
                DomainError::NotFound
            };
            return Err(rejected("update_balance", err));
        }
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        lock_idempotency_key(&mut tx, request.owner_service_id, &request.idempotency_key).await?;

        if let Some(existing) =
            find_by_key(&mut tx, request.owner_service_id, &request.idempotency_key).await?
        {
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))?;
            debug!(reservation_id = %existing.id, "idempotent replay");
            return Ok(existing);
        }

        request
            .validate_terms()
            .map_err(|e| rejected("open_reservation", e))?;

        let (mut account, db_now) = lock_account(&mut tx, request.account_id)
            .await?
            .ok_or_else(|| rejected("open_reservation", DomainError::NotFound))?;
        account
            .hold(request.amount)
            .map_err(|e| rejected("open_reservation", e))?;
        let expires_at = request
            .expires_at(db_now)
            .map_err(|e| rejected("open_reservation", e))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO reservations
                (account_id, owner_service_id, amount, status, idempotency_key, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(request.account_id.get())
        .bind(request.owner_service_id.get())
        .bind(request.amount)
        .bind(ReservationStatus::Active.as_str())
        .bind(&request.idempotency_key)
        .bind(expires_at)
        .bind(db_now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_reservation", e))?;
        let reservation = decode_reservation(&row)?;

        write_reserved(&mut tx, &account).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
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
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (mut reservation, db_now) = lock_reservation(&mut tx, reservation_id, owner_service_id)
            .await?
            .ok_or_else(|| rejected("confirm_reservation", DomainError::NotFound))?;
        reservation
            .confirm(db_now)
            .map_err(|e| rejected("confirm_reservation", e))?;

        let (mut account, _) = lock_account(&mut tx, reservation.account_id)
            .await?
            .ok_or_else(|| missing_account(&reservation))?;
        account
            .settle(reservation.amount)
            .map_err(|e| rejected("confirm_reservation", e))?;

        sqlx::query(
            "UPDATE accounts SET current_amount = $1, reserved_amount = $2 WHERE id = $3",
        )
        .bind(account.current_amount)
        .bind(account.reserved_amount)
        .bind(account.id.get())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("settle_account", e))?;

        write_status(&mut tx, &reservation).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
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
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (mut reservation, _) = lock_reservation(&mut tx, reservation_id, owner_service_id)
            .await?
            .ok_or_else(|| rejected("cancel_reservation", DomainError::NotFound))?;
        reservation
            .cancel()
            .map_err(|e| rejected("cancel_reservation", e))?;

        let (mut account, _) = lock_account(&mut tx, reservation.account_id)
            .await?
            .ok_or_else(|| missing_account(&reservation))?;
        account.release(reservation.amount)?;

        write_reserved(&mut tx, &account).await?;
        write_status(&mut tx, &reservation).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn account(&self, account_id: AccountId) -> Result<Account, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(account_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_account", e))?
        .ok_or(EngineError::Domain(DomainError::NotFound))?;

        Ok(AccountRow::from_row(&row)
            .map_err(|e| map_sqlx_error("decode_account", e))?
            .into())
    }

    async fn reservation(
        &self,
        reservation_id: ReservationId,
        owner_service_id: OwnerServiceId,
    ) -> Result<Reservation, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 AND owner_service_id = $2"
        ))
        .bind(reservation_id.get())
        .bind(owner_service_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_reservation", e))?
        .ok_or(EngineError::Domain(DomainError::NotFound))?;

        decode_reservation(&row)
    }
}

/// Serialize opens sharing `(owner_service_id, idempotency_key)` until the
/// transaction ends.
async fn lock_idempotency_key(
    tx: &mut Transaction<'_, Postgres>,
    owner_service_id: OwnerServiceId,
    idempotency_key: &str,
) -> Result<(), EngineError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("{owner_service_id}:{idempotency_key}"))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_idempotency_key", e))?;
    Ok(())
}

async fn find_by_key(
    tx: &mut Transaction<'_, Postgres>,
    owner_service_id: OwnerServiceId,
    idempotency_key: &str,
) -> Result<Option<Reservation>, EngineError> {
    let row = sqlx::query(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations \
         WHERE owner_service_id = $1 AND idempotency_key = $2"
    ))
    .bind(owner_service_id.get())
    .bind(idempotency_key)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("find_by_key", e))?;

    row.map(|row| decode_reservation(&row)).transpose()
}

/// Lock an account row and read the database clock.
async fn lock_account(
    tx: &mut Transaction<'_, Postgres>,
    account_id: AccountId,
) -> Result<Option<(Account, DateTime<Utc>)>, EngineError> {
    let row = sqlx::query(&format!(
        "SELECT {ACCOUNT_COLUMNS}, now() AS db_now FROM accounts WHERE id = $1 FOR UPDATE"
    ))
    .bind(account_id.get())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_account", e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let account: Account = AccountRow::from_row(&row)
        .map_err(|e| map_sqlx_error("decode_account", e))?
        .into();
    let db_now: DateTime<Utc> = row
        .try_get("db_now")
        .map_err(|e| map_sqlx_error("decode_db_now", e))?;
    Ok(Some((account, db_now)))
}

/// Lock a reservation row visible to `owner_service_id` and read the database clock.
async fn lock_reservation(
    tx: &mut Transaction<'_, Postgres>,
    reservation_id: ReservationId,
    owner_service_id: OwnerServiceId,
) -> Result<Option<(Reservation, DateTime<Utc>)>, EngineError> {
    let row = sqlx::query(&format!(
        "SELECT {RESERVATION_COLUMNS}, now() AS db_now FROM reservations \
         WHERE id = $1 AND owner_service_id = $2 FOR UPDATE"
    ))
    .bind(reservation_id.get())
    .bind(owner_service_id.get())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_reservation", e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let reservation = decode_reservation(&row)?;
    let db_now: DateTime<Utc> = row
        .try_get("db_now")
        .map_err(|e| map_sqlx_error("decode_db_now", e))?;
    Ok(Some((reservation, db_now)))
}

async fn write_reserved(
    tx: &mut Transaction<'_, Postgres>,
    account: &Account,
) -> Result<(), EngineError> {
    sqlx::query("UPDATE accounts SET reserved_amount = $1 WHERE id = $2")
        .bind(account.reserved_amount)
        .bind(account.id.get())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_reserved", e))?;
    Ok(())
}

async fn write_status(
    tx: &mut Transaction<'_, Postgres>,
    reservation: &Reservation,
) -> Result<(), EngineError> {
    sqlx::query("UPDATE reservations SET status = $1 WHERE id = $2")
        .bind(reservation.status.as_str())
        .bind(reservation.id.get())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_status", e))?;
    Ok(())
}

fn missing_account(reservation: &Reservation) -> EngineError {
    EngineError::Domain(DomainError::invariant(format!(
        "reservation {} references missing account {}",
        reservation.id, reservation.account_id
    )))
}

fn rejected(operation: &'static str, err: DomainError) -> EngineError {
    debug!(operation, error = %err, "operation rejected");
    EngineError::Domain(err)
}

fn decode_reservation(row: &sqlx::postgres::PgRow) -> Result<Reservation, EngineError> {
    ReservationRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_reservation", e))?
        .try_into()
}

/// Check if an error is PostgreSQL's numeric out-of-range (`22003`).
fn is_numeric_overflow(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("22003"))
}

/// Map SQLx errors to engine errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EngineError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("22003") => {
                    // Numeric value out of range
                    DomainError::validation(format!("{operation}: value out of range")).into()
                }
                Some("23514") => {
                    // Check constraint violation
                    DomainError::invariant(msg).into()
                }
                _ => {
                    error!(operation, error = %msg, "database error");
                    EngineError::Storage(msg)
                }
            }
        }
        sqlx::Error::RowNotFound => DomainError::NotFound.into(),
        sqlx::Error::PoolClosed => {
            error!(operation, "connection pool closed");
            EngineError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => {
            error!(operation, error = %err, "sqlx error");
            EngineError::Storage(format!("sqlx error in {}: {}", operation, err))
        }
    }
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: i64,
    user_id: i64,
    current_amount: i64,
    max_amount: i64,
    reserved_amount: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AccountRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            current_amount: row.try_get("current_amount")?,
            max_amount: row.try_get("max_amount")?,
            reserved_amount: row.try_get("reserved_amount")?,
        })
    }
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: AccountId::new(row.id),
            user_id: UserId::new(row.user_id),
            current_amount: row.current_amount,
            max_amount: row.max_amount,
            reserved_amount: row.reserved_amount,
        }
    }
}

#[derive(Debug)]
struct ReservationRow {
    id: i64,
    account_id: i64,
    owner_service_id: i64,
    amount: i64,
    status: String,
    idempotency_key: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ReservationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ReservationRow {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            owner_service_id: row.try_get("owner_service_id")?,
            amount: row.try_get("amount")?,
            status: row.try_get("status")?,
            idempotency_key: row.try_get("idempotency_key")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = EngineError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<ReservationStatus>().map_err(|e| {
            EngineError::storage(format!("reservation {} has bad status: {e}", row.id))
        })?;
        Ok(Reservation {
            id: ReservationId::new(row.id),
            account_id: AccountId::new(row.account_id),
            owner_service_id: OwnerServiceId::new(row.owner_service_id),
            amount: row.amount,
            status,
            idempotency_key: row.idempotency_key,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}
