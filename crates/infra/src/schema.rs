//! Idempotent schema bootstrap for the Postgres stores.

use sqlx::PgPool;
use tracing::info;

const STATEMENTS: &[(&str, &str)] = &[
    (
        "accounts",
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id              BIGSERIAL PRIMARY KEY,
            user_id         BIGINT NOT NULL,
            current_amount  BIGINT NOT NULL DEFAULT 0,
            max_amount      BIGINT NOT NULL DEFAULT 0,
            reserved_amount BIGINT NOT NULL DEFAULT 0,
            CONSTRAINT accounts_current_non_negative CHECK (current_amount >= 0),
            CONSTRAINT accounts_reserved_non_negative CHECK (reserved_amount >= 0)
        )
        "#,
    ),
    (
        "reservations",
        r#"
        CREATE TABLE IF NOT EXISTS reservations (
            id               BIGSERIAL PRIMARY KEY,
            account_id       BIGINT NOT NULL REFERENCES accounts (id),
            owner_service_id BIGINT NOT NULL,
            amount           BIGINT NOT NULL CHECK (amount > 0),
            status           TEXT NOT NULL CHECK (status IN ('ACTIVE', 'CONFIRMED', 'CANCELLED')),
            idempotency_key  TEXT NOT NULL,
            expires_at       TIMESTAMPTZ NOT NULL,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            CONSTRAINT reservations_owner_key_unique UNIQUE (owner_service_id, idempotency_key)
        )
        "#,
    ),
    (
        "reservations_active_idx",
        r#"
        CREATE INDEX IF NOT EXISTS reservations_active_account_idx
            ON reservations (account_id)
            WHERE status = 'ACTIVE'
        "#,
    ),
    (
        "services",
        r#"
        CREATE TABLE IF NOT EXISTS services (
            id         BIGSERIAL PRIMARY KEY,
            name       TEXT UNIQUE NOT NULL,
            api_key    TEXT UNIQUE NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
];

/// Create the `accounts`, `reservations` and `services` tables if missing.
///
/// Safe to run on every startup.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (name, sql) in STATEMENTS {
        sqlx::query(sql).execute(pool).await?;
        info!(object = *name, "schema object ensured");
    }
    Ok(())
}
