//! API-key lookup against the `services` table.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{error, instrument};

use fundguard_auth::{ApiKey, ApiKeyError, ApiKeyValidator, ServicePrincipal};
use fundguard_core::OwnerServiceId;

/// Resolves API keys to service ids via `services.api_key`.
#[derive(Debug, Clone)]
pub struct PostgresApiKeyStore {
    pool: PgPool,
}

impl PostgresApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a service and its key. Returns the new service id.
    pub async fn register(&self, name: &str, key: &ApiKey) -> Result<OwnerServiceId, ApiKeyError> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO services (name, api_key) VALUES ($1, $2) RETURNING id")
                .bind(name)
                .bind(key.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ApiKeyError::Backend(format!("register service: {e}")))?;
        Ok(OwnerServiceId::new(id))
    }
}

#[async_trait]
impl ApiKeyValidator for PostgresApiKeyStore {
    #[instrument(skip_all)]
    async fn resolve(&self, key: &ApiKey) -> Result<ServicePrincipal, ApiKeyError> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM services WHERE api_key = $1 LIMIT 1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!(error = %e, "api key lookup failed");
                    ApiKeyError::Backend(e.to_string())
                })?;

        id.map(|id| ServicePrincipal::new(OwnerServiceId::new(id)))
            .ok_or(ApiKeyError::Unknown)
    }
}

#[cfg(test)]
mod tests {
    //! Runs against a real database only when `FUNDGUARD_TEST_DATABASE_URL` is set.

    use super::*;
    use crate::schema::ensure_schema;

    #[tokio::test]
    async fn registered_key_resolves_to_service() {
        let Ok(url) = std::env::var("FUNDGUARD_TEST_DATABASE_URL") else {
            return;
        };
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        ensure_schema(&pool).await.expect("bootstrap schema");
        let store = PostgresApiKeyStore::new(pool);

        let suffix = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let key = ApiKey::parse(&format!("key-{suffix}")).unwrap();
        let id = store.register(&format!("svc-{suffix}"), &key).await.unwrap();

        let principal = store.resolve(&key).await.unwrap();
        assert_eq!(principal.service_id(), id);

        let unknown = ApiKey::parse(&format!("missing-{suffix}")).unwrap();
        assert_eq!(store.resolve(&unknown).await, Err(ApiKeyError::Unknown));
    }
}
