//! Storage configuration and backend selection.

use std::sync::Arc;

use figment::providers::{Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::artifact::ArtifactStore;
use crate::error::StoreError;
use crate::table::TableService;

/// Environment variable naming the metadata-store connection string.
pub const STORAGE_CONN_STRING_KEY: &str = "CRA_STORAGE_CONN_STRING";

/// Default application configuration file.
const CONFIG_FILE: &str = "cra.toml";

/// Storage configuration.
///
/// The connection string is resolved from the application
/// configuration file first, then from the environment. When neither
/// provides one, the in-memory backend is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Connection string for the backing store.
    pub conn_string: Option<String>,
    /// Maximum pooled connections for network backends.
    pub pool_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            conn_string: None,
            pool_size: 10,
        }
    }
}

impl StorageConfig {
    /// Loads configuration from `cra.toml`, falling back to the
    /// `CRA_STORAGE_CONN_STRING` environment variable.
    pub fn load(path: Option<&str>) -> Result<Self, StoreError> {
        let mut config: Self = Figment::new()
            .merge(Toml::file(path.unwrap_or(CONFIG_FILE)))
            .extract()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;

        if config.conn_string.is_none() {
            config.conn_string = std::env::var(STORAGE_CONN_STRING_KEY).ok();
        }

        Ok(config)
    }
}

/// Builds table-service and artifact-store handles from configuration.
#[derive(Debug, Clone)]
pub struct StorageProvider;

impl StorageProvider {
    /// Connects to the configured backend.
    #[allow(unused_variables)]
    pub async fn connect(
        config: &StorageConfig,
    ) -> Result<(Arc<dyn TableService>, Arc<dyn ArtifactStore>), StoreError> {
        match &config.conn_string {
            #[cfg(feature = "valkey")]
            Some(url) => {
                let tables = crate::valkey::ValkeyTableService::new(url, config.pool_size).await?;
                let artifacts =
                    crate::valkey::ValkeyArtifactStore::new(url, config.pool_size).await?;
                Ok((Arc::new(tables), Arc::new(artifacts)))
            }
            #[cfg(not(feature = "valkey"))]
            Some(url) => Err(StoreError::Configuration(format!(
                "no backend available for connection string {url:?}"
            ))),
            #[cfg(feature = "memory")]
            None => Ok((
                Arc::new(crate::memory::MemoryTableService::new()),
                Arc::new(crate::memory::MemoryArtifactStore::new()),
            )),
            #[cfg(not(feature = "memory"))]
            None => Err(StoreError::Configuration(
                "no connection string and the memory backend is disabled".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StorageConfig::default();
        assert!(config.conn_string.is_none());
        assert_eq!(config.pool_size, 10);
    }

    #[tokio::test]
    async fn memory_backend_without_conn_string() {
        let config = StorageConfig::default();
        let (tables, artifacts) = StorageProvider::connect(&config).await.unwrap();

        tables.upsert("t", "p", "r", b"v").await.unwrap();
        assert!(tables.get("t", "p", "r").await.unwrap().is_some());

        artifacts.upload("echo", b"bin").await.unwrap();
        assert!(artifacts.download("echo").await.unwrap().is_some());
    }
}
