//! Store configuration.
//!
//! ```toml
//! [store]
//! backend = "credhub"
//! url = "https://credhub.service.internal:8844"
//! client_id = "broker"
//! client_secret = "..."
//! store_id = "my-broker"
//!
//! [migrate_from]
//! driver = "postgres"
//! username = "broker"
//! password = "..."
//! host = "db.service.internal"
//! port = 5432
//! database = "broker"
//! ```

#[cfg(feature = "config")]
use std::path::Path;

use serde::Deserialize;

use crate::error::StoreError;
#[cfg(any(feature = "sql", feature = "credhub"))]
use crate::error::Redacted;
use crate::redaction::RedactionCost;
#[cfg(feature = "sql")]
use crate::sql::{PoolSettings, SqlCredentials, SqlDriver};

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    pub store: StoreConfig,

    /// A database to drain into `store` on startup. Only valid when `store`
    /// is CredHub.
    #[cfg(feature = "sql")]
    #[serde(default)]
    pub migrate_from: Option<SqlConfig>,

    #[serde(default)]
    pub redaction: RedactionCost,
}

impl StoreSettings {
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            #[cfg(feature = "sql")]
            migrate_from: None,
            redaction: RedactionCost::default(),
        }
    }

    /// Loads `broker-store.toml`, then `path` if given, then `BROKER_STORE_*`
    /// environment variables (`__` separates nested keys).
    #[cfg(feature = "config")]
    pub fn load(path: Option<&Path>) -> Result<Self, StoreError> {
        use figment::providers::{Env, Format, Toml};
        use figment::Figment;

        let mut figment = Figment::new().merge(Toml::file("broker-store.toml"));

        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        }

        let settings: Self = figment
            .merge(Env::prefixed("BROKER_STORE_").split("__"))
            .extract()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        match &self.store {
            #[cfg(feature = "sql")]
            StoreConfig::Sql(config) => config.validate()?,
            #[cfg(feature = "credhub")]
            StoreConfig::Credhub(config) => config.validate()?,
            #[cfg(feature = "file")]
            StoreConfig::File(config) => config.validate()?,
        }

        #[cfg(feature = "sql")]
        {
            if let Some(source) = &self.migrate_from {
                source.validate()?;
                if self.store.backend() != "credhub" {
                    return Err(StoreError::Configuration(format!(
                        "migrate_from requires the credhub backend, not {}",
                        self.store.backend()
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    #[cfg(feature = "sql")]
    Sql(SqlConfig),
    #[cfg(feature = "credhub")]
    Credhub(CredhubConfig),
    #[cfg(feature = "file")]
    File(FileConfig),
}

impl StoreConfig {
    pub fn backend(&self) -> &'static str {
        match self {
            #[cfg(feature = "sql")]
            Self::Sql(_) => "sql",
            #[cfg(feature = "credhub")]
            Self::Credhub(_) => "credhub",
            #[cfg(feature = "file")]
            Self::File(_) => "file",
        }
    }
}

#[cfg(feature = "sql")]
#[derive(Debug, Clone, Deserialize)]
pub struct SqlConfig {
    pub driver: SqlDriver,
    pub username: String,
    pub password: Redacted<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// PEM CA bundle. TLS is disabled when absent.
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// MySQL only: verify the chain but not the server name.
    #[serde(default)]
    pub skip_hostname_validation: bool,
    #[serde(default)]
    pub pool: PoolSettings,
}

#[cfg(feature = "sql")]
impl SqlConfig {
    pub fn credentials(&self) -> SqlCredentials {
        SqlCredentials {
            username: self.username.clone(),
            password: self.password.clone(),
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        require("sql username", &self.username)?;
        require("sql host", &self.host)?;
        require("sql database", &self.database)?;
        if self.port == 0 {
            return Err(StoreError::Configuration("sql port must be set".to_string()));
        }
        if self.pool.max_open_connections == 0 {
            return Err(StoreError::Configuration(
                "pool.max_open_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "credhub")]
#[derive(Debug, Clone, Deserialize)]
pub struct CredhubConfig {
    pub url: String,
    pub client_id: String,
    pub client_secret: Redacted<String>,
    /// PEM CA bundle trusted in addition to the system roots.
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// Prefix under which every record is stored.
    pub store_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[cfg(feature = "credhub")]
impl CredhubConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        require("credhub url", &self.url)?;
        if !(self.url.starts_with("https://") || self.url.starts_with("http://")) {
            return Err(StoreError::Configuration(format!(
                "credhub url must be http(s): {}",
                self.url
            )));
        }
        require("credhub client_id", &self.client_id)?;
        require("credhub store_id", &self.store_id)?;
        Ok(())
    }
}

#[cfg(feature = "credhub")]
fn default_timeout_secs() -> u64 {
    30
}

#[cfg(feature = "file")]
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub path: std::path::PathBuf,
}

#[cfg(feature = "file")]
impl FileConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Configuration("file path must be set".to_string()));
        }
        Ok(())
    }
}

fn require(what: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Configuration(format!("{what} must be set")));
    }
    Ok(())
}
