use std::sync::Arc;

use tracing::info;

use crate::config::{StoreConfig, StoreSettings};
use crate::error::StoreError;
use crate::migration::MigrationOutcome;
use crate::redaction::Redactor;
use crate::traits::BrokerStore;

#[cfg(feature = "credhub")]
use crate::credhub::CredhubStore;
#[cfg(feature = "file")]
use crate::file::FileStore;
#[cfg(feature = "sql")]
use crate::sql::SqlStore;

/// Builds the configured store and hands it out as a trait object.
#[derive(Clone)]
pub struct StoreProvider {
    store: Arc<dyn BrokerStore>,
    migration: Option<MigrationOutcome>,
}

impl StoreProvider {
    pub fn new(store: Arc<dyn BrokerStore>) -> Self {
        Self {
            store,
            migration: None,
        }
    }

    /// Connects to the configured backend.
    ///
    /// A file store is restored from disk before it is returned. When
    /// `migrate_from` is set, the database is drained into the CredHub store
    /// first.
    pub async fn from_config(settings: &StoreSettings) -> Result<Self, StoreError> {
        settings.validate()?;
        let redactor = Redactor::new(settings.redaction)?;

        match &settings.store {
            #[cfg(feature = "sql")]
            StoreConfig::Sql(config) => {
                let store = SqlStore::from_config(config, redactor).await?;
                info!(driver = %config.driver, database = %config.database, "using sql store");
                Ok(Self::new(Arc::new(store)))
            }

            #[cfg(feature = "credhub")]
            StoreConfig::Credhub(config) => {
                let store = CredhubStore::from_config(config, redactor.clone())?;
                info!(store_id = %config.store_id, "using credhub store");

                #[cfg(feature = "sql")]
                {
                    if let Some(source) = &settings.migrate_from {
                        let migration = Self::migrate_from_sql(source, &store, redactor).await?;
                        info!(?migration, "startup migration finished");
                        return Ok(Self {
                            store: Arc::new(store),
                            migration: Some(migration),
                        });
                    }
                }

                Ok(Self::new(Arc::new(store)))
            }

            #[cfg(feature = "file")]
            StoreConfig::File(config) => {
                let store = FileStore::new(&config.path, redactor);
                store.restore().await?;
                info!(path = %config.path.display(), "using file store");
                Ok(Self::new(Arc::new(store)))
            }

            #[allow(unreachable_patterns)]
            _ => Err(StoreError::UnsupportedBackend(format!(
                "{} backend not enabled",
                settings.store.backend()
            ))),
        }
    }

    #[cfg(all(feature = "sql", feature = "credhub"))]
    async fn migrate_from_sql(
        source: &crate::config::SqlConfig,
        target: &CredhubStore,
        redactor: Redactor,
    ) -> Result<MigrationOutcome, StoreError> {
        let sql = SqlStore::from_config(source, redactor).await?;
        let outcome = crate::migration::migrate(&sql, target).await;
        sql.cleanup().await?;
        outcome
    }

    pub fn store(&self) -> Arc<dyn BrokerStore> {
        Arc::clone(&self.store)
    }

    /// What the startup migration did, if one was configured.
    pub fn migration(&self) -> Option<MigrationOutcome> {
        self.migration
    }
}

impl std::fmt::Debug for StoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreProvider")
            .field("migration", &self.migration)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "file", feature = "credhub", feature = "sql"))]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::{CredhubConfig, FileConfig};
    use crate::error::Redacted;
    use crate::redaction::RedactionCost;
    use crate::types::ServiceInstance;

    fn settings(store: StoreConfig) -> StoreSettings {
        let mut settings = StoreSettings::new(store);
        settings.redaction = RedactionCost::minimal();
        settings
    }

    #[tokio::test]
    async fn file_store_is_restored_on_creation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let config = settings(StoreConfig::File(FileConfig { path: path.clone() }));

        let first = StoreProvider::from_config(&config).await.unwrap().store();
        first
            .create_instance_details("instance-1", &ServiceInstance::new("s", "p", "o", "sp"))
            .await
            .unwrap();
        first.save().await.unwrap();

        let second = StoreProvider::from_config(&config).await.unwrap();
        assert!(second.migration().is_none());
        assert!(second
            .store()
            .retrieve_instance_details("instance-1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn invalid_credhub_config_is_rejected() {
        let config = settings(StoreConfig::Credhub(CredhubConfig {
            url: "credhub.example.com".to_string(),
            client_id: "broker".to_string(),
            client_secret: Redacted::new("secret".to_string()),
            ca_cert: None,
            store_id: "store".to_string(),
            timeout_secs: 5,
        }));

        let err = StoreProvider::from_config(&config).await.unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[tokio::test]
    async fn invalid_redaction_cost_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = settings(StoreConfig::File(FileConfig {
            path: dir.path().join("state.json"),
        }));
        config.redaction.memory_kib = 1;

        let err = StoreProvider::from_config(&config).await.unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }
}
