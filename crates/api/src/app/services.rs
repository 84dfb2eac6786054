use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use fundguard_auth::{ApiKeyValidator, StaticApiKeys};
use fundguard_infra::{
    api_keys::PostgresApiKeyStore,
    balance::{BalanceEngine, InMemoryBalanceEngine, PostgresBalanceEngine},
    config::AppConfig,
    schema::ensure_schema,
};

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppServices {
    pub engine: Arc<dyn BalanceEngine>,
    pub api_keys: Arc<dyn ApiKeyValidator>,
}

impl AppServices {
    pub fn new(engine: Arc<dyn BalanceEngine>, api_keys: Arc<dyn ApiKeyValidator>) -> Self {
        Self { engine, api_keys }
    }
}

/// Wire the engine and key store selected by configuration.
pub async fn build_services(cfg: &AppConfig) -> anyhow::Result<AppServices> {
    if cfg.database.use_persistent_stores {
        return build_persistent_services(cfg).await;
    }
    build_in_memory_services(cfg)
}

fn build_in_memory_services(cfg: &AppConfig) -> anyhow::Result<AppServices> {
    let keys = cfg.static_api_keys()?;
    if keys.is_empty() {
        tracing::warn!("no api keys configured; every protected request will be rejected");
    }
    tracing::warn!("using in-memory balance engine; state is lost on restart");

    Ok(AppServices::new(
        Arc::new(InMemoryBalanceEngine::new()),
        Arc::new(keys),
    ))
}

async fn build_persistent_services(cfg: &AppConfig) -> anyhow::Result<AppServices> {
    let database_url = cfg
        .database
        .url
        .as_deref()
        .context("database.url must be set when persistent stores are enabled")?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    ensure_schema(&pool)
        .await
        .context("failed to bootstrap schema")?;

    let static_keys: StaticApiKeys = cfg.static_api_keys()?;
    let api_keys: Arc<dyn ApiKeyValidator> = if static_keys.is_empty() {
        Arc::new(PostgresApiKeyStore::new(pool.clone()))
    } else {
        tracing::info!(
            keys = static_keys.len(),
            "static api keys configured; services table is not consulted"
        );
        Arc::new(static_keys)
    };

    Ok(AppServices::new(
        Arc::new(PostgresBalanceEngine::new(pool)),
        api_keys,
    ))
}
