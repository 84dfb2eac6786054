//! Process configuration.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. optional file named by `CONFIG_FILE` (toml)
//! 3. `FUNDGUARD__<SECTION>__<KEY>` environment variables
//! 4. the conventional `DATABASE_URL`, `REST_ADDR`, `GRPC_ADDR` and
//!    `USE_PERSISTENT_STORES`

use std::collections::HashMap;
use std::net::SocketAddr;

use config::{Environment, File};
use serde::Deserialize;
use thiserror::Error;

use fundguard_auth::StaticApiKeys;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub addr: String,
    pub grpc_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub use_persistent_stores: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// `key=service_id` entries for the in-memory key table.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub format: LogFormat,
    pub filter: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    /// Load from an explicit variable map instead of the process environment.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.addr", "0.0.0.0:8080")?
            .set_default("server.grpc_addr", "0.0.0.0:9090")?
            .set_default("database.max_connections", 10)?
            .set_default("database.use_persistent_stores", false)?
            .set_default("auth.api_keys", Vec::<String>::new())?
            .set_default("log.format", "json")?
            .set_default("log.filter", "info")?;

        if let Some(config_file) = vars.get("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(config_file).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("FUNDGUARD")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.api_keys")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

        if let Some(url) = vars.get("DATABASE_URL") {
            builder = builder.set_override("database.url", url.as_str())?;
        }
        if let Some(addr) = vars.get("REST_ADDR") {
            builder = builder.set_override("server.addr", addr.as_str())?;
        }
        if let Some(addr) = vars.get("GRPC_ADDR") {
            builder = builder.set_override("server.grpc_addr", addr.as_str())?;
        }
        if let Some(flag) = vars.get("USE_PERSISTENT_STORES") {
            builder = builder.set_override("database.use_persistent_stores", flag.as_str())?;
        }

        let cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        self.grpc_socket_addr()?;

        if self.database.use_persistent_stores {
            let has_url = self
                .database
                .url
                .as_deref()
                .is_some_and(|url| !url.trim().is_empty());
            if !has_url {
                return Err(ConfigError::Invalid(
                    "database.url is required when persistent stores are enabled".to_string(),
                ));
            }
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be positive".to_string(),
            ));
        }

        self.static_api_keys()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.addr.parse().map_err(|e| {
            ConfigError::Invalid(format!("server.addr '{}': {e}", self.server.addr))
        })
    }

    pub fn grpc_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.grpc_addr.parse().map_err(|e| {
            ConfigError::Invalid(format!("server.grpc_addr '{}': {e}", self.server.grpc_addr))
        })
    }

    pub fn static_api_keys(&self) -> Result<StaticApiKeys, ConfigError> {
        StaticApiKeys::from_entries(&self.auth.api_keys)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = AppConfig::from_env_map(HashMap::new()).unwrap();
        assert_eq!(cfg.server.addr, "0.0.0.0:8080");
        assert_eq!(cfg.server.grpc_addr, "0.0.0.0:9090");
        assert_eq!(cfg.database.max_connections, 10);
        assert!(!cfg.database.use_persistent_stores);
        assert!(cfg.database.url.is_none());
        assert!(cfg.auth.api_keys.is_empty());
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.log.filter, "info");
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let cfg = AppConfig::from_env_map(vars(&[
            ("FUNDGUARD__SERVER__ADDR", "127.0.0.1:9000"),
            ("FUNDGUARD__DATABASE__MAX_CONNECTIONS", "4"),
            ("FUNDGUARD__LOG__FORMAT", "pretty"),
            ("FUNDGUARD__AUTH__API_KEYS", "alpha=1,beta=2"),
        ]))
        .unwrap();

        assert_eq!(cfg.server.addr, "127.0.0.1:9000");
        assert_eq!(cfg.database.max_connections, 4);
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        assert_eq!(cfg.auth.api_keys, vec!["alpha=1", "beta=2"]);
        assert_eq!(cfg.static_api_keys().unwrap().len(), 2);
    }

    #[test]
    fn conventional_variables_win() {
        let cfg = AppConfig::from_env_map(vars(&[
            ("FUNDGUARD__SERVER__ADDR", "127.0.0.1:9000"),
            ("REST_ADDR", "127.0.0.1:9100"),
            ("FUNDGUARD__SERVER__GRPC_ADDR", "127.0.0.1:9200"),
            ("GRPC_ADDR", "127.0.0.1:9300"),
            ("DATABASE_URL", "postgres://localhost/fundguard"),
            ("USE_PERSISTENT_STORES", "true"),
        ]))
        .unwrap();

        assert_eq!(cfg.server.addr, "127.0.0.1:9100");
        assert_eq!(cfg.grpc_socket_addr().unwrap().port(), 9300);
        assert_eq!(
            cfg.database.url.as_deref(),
            Some("postgres://localhost/fundguard")
        );
        assert!(cfg.database.use_persistent_stores);
    }

    #[test]
    fn persistent_mode_requires_database_url() {
        let err = AppConfig::from_env_map(vars(&[("USE_PERSISTENT_STORES", "true")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let err = AppConfig::from_env_map(vars(&[("REST_ADDR", "not-an-addr")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_env_map(vars(&[("GRPC_ADDR", ":9090")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_api_key_entry_is_rejected() {
        let err = AppConfig::from_env_map(vars(&[("FUNDGUARD__AUTH__API_KEYS", "no-separator")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
