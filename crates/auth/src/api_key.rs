use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use fundguard_core::OwnerServiceId;

use crate::ServicePrincipal;

/// Secret presented by a caller service.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn parse(raw: &str) -> Result<Self, ApiKeyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ApiKeyError::Missing);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiKeyError {
    #[error("api key missing")]
    Missing,

    #[error("api key not recognized")]
    Unknown,

    #[error("malformed api key entry '{0}' (expected key=service_id)")]
    Malformed(String),

    /// The key store itself failed; not the caller's fault.
    #[error("api key store failure: {0}")]
    Backend(String),
}

/// Resolves an API key to the caller identity.
#[async_trait]
pub trait ApiKeyValidator: Send + Sync {
    async fn resolve(&self, key: &ApiKey) -> Result<ServicePrincipal, ApiKeyError>;
}

#[async_trait]
impl<V> ApiKeyValidator for Arc<V>
where
    V: ApiKeyValidator + ?Sized,
{
    async fn resolve(&self, key: &ApiKey) -> Result<ServicePrincipal, ApiKeyError> {
        (**self).resolve(key).await
    }
}

/// Fixed key table, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeys {
    keys: HashMap<String, OwnerServiceId>,
}

impl StaticApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>, service_id: OwnerServiceId) -> Self {
        self.keys.insert(key.into(), service_id);
        self
    }

    /// Parse `key=service_id` entries.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, ApiKeyError> {
        let mut keys = HashMap::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            let (key, id) = entry
                .split_once('=')
                .ok_or_else(|| ApiKeyError::Malformed(redact(entry)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ApiKeyError::Malformed(redact(entry)));
            }
            let service_id: OwnerServiceId = id
                .parse()
                .map_err(|_| ApiKeyError::Malformed(redact(entry)))?;
            keys.insert(key.to_string(), service_id);
        }
        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl ApiKeyValidator for StaticApiKeys {
    async fn resolve(&self, key: &ApiKey) -> Result<ServicePrincipal, ApiKeyError> {
        self.keys
            .get(key.as_str())
            .copied()
            .map(ServicePrincipal::new)
            .ok_or(ApiKeyError::Unknown)
    }
}

// Keep only the service id half of an entry in error messages.
fn redact(entry: &str) -> String {
    match entry.split_once('=') {
        Some((_, id)) => format!("***={id}"),
        None => "***".to_string(),
    }
}
