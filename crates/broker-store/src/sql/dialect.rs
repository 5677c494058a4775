//! Driver-specific connection setup and query adaptation.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::debug;
use url::Url;

use super::connection::{PoolSettings, SqlPool};
use crate::error::{Redacted, StoreError};
use crate::tls::CaBundle;

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDriver {
    Mysql,
    Postgres,
}

impl fmt::Display for SqlDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mysql => f.write_str("mysql"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct SqlCredentials {
    pub username: String,
    pub password: Redacted<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl SqlCredentials {
    fn url(&self, scheme: &str) -> Result<Url, StoreError> {
        let invalid = || {
            StoreError::Configuration(format!(
                "cannot build {scheme} connection string for {}",
                self.database
            ))
        };

        let mut url = Url::parse(&format!("{scheme}://localhost")).map_err(|_| invalid())?;
        url.set_host(Some(&self.host)).map_err(|_| invalid())?;
        url.set_port(Some(self.port)).map_err(|_| invalid())?;
        url.set_username(&self.username).map_err(|_| invalid())?;
        url.set_password(Some(self.password.expose()))
            .map_err(|_| invalid())?;
        url.set_path(&format!("/{}", self.database));
        Ok(url)
    }
}

/// Per-database behaviour of the SQL store.
#[async_trait]
pub trait SqlDialect: Send + Sync + fmt::Debug {
    fn driver(&self) -> SqlDriver;

    /// Name of the database, used in logs and errors.
    fn database(&self) -> &str;

    /// The driver connection string, password included.
    fn connection_string(&self) -> Result<String, StoreError>;

    /// Rewrites `?` placeholders into the driver's own syntax.
    fn flavorify(&self, query: &str) -> String;

    async fn connect(&self, pool: &PoolSettings) -> Result<SqlPool, StoreError>;
}

/// Returns `connection_string` with the password masked.
pub fn masked(connection_string: &str) -> String {
    match Url::parse(connection_string) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => "<unparseable>".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct MySqlDialect {
    credentials: SqlCredentials,
    ca: Option<CaBundle>,
    skip_hostname_validation: bool,
}

impl MySqlDialect {
    pub fn new(
        credentials: SqlCredentials,
        ca_cert: Option<&str>,
        skip_hostname_validation: bool,
    ) -> Result<Self, StoreError> {
        let ca = ca_cert
            .filter(|pem| !pem.trim().is_empty())
            .map(|pem| CaBundle::parse(pem, &credentials.database))
            .transpose()?;

        Ok(Self {
            credentials,
            ca,
            skip_hostname_validation,
        })
    }

    fn ssl_mode(&self) -> MySqlSslMode {
        match (&self.ca, self.skip_hostname_validation) {
            (None, _) => MySqlSslMode::Disabled,
            (Some(_), true) => MySqlSslMode::VerifyCa,
            (Some(_), false) => MySqlSslMode::VerifyIdentity,
        }
    }

    fn ssl_mode_name(&self) -> &'static str {
        match self.ssl_mode() {
            MySqlSslMode::VerifyCa => "VERIFY_CA",
            MySqlSslMode::VerifyIdentity => "VERIFY_IDENTITY",
            _ => "DISABLED",
        }
    }
}

#[async_trait]
impl SqlDialect for MySqlDialect {
    fn driver(&self) -> SqlDriver {
        SqlDriver::Mysql
    }

    fn database(&self) -> &str {
        &self.credentials.database
    }

    fn connection_string(&self) -> Result<String, StoreError> {
        let mut url = self.credentials.url("mysql")?;
        url.query_pairs_mut()
            .append_pair("ssl-mode", self.ssl_mode_name());
        Ok(url.to_string())
    }

    fn flavorify(&self, query: &str) -> String {
        query.to_string()
    }

    async fn connect(&self, pool: &PoolSettings) -> Result<SqlPool, StoreError> {
        let connection_string = self.connection_string()?;
        debug!(connection = %masked(&connection_string), "connecting to mysql");

        let mut options = MySqlConnectOptions::from_str(&connection_string)
            .map_err(|e| StoreError::Configuration(e.to_string()))?
            .ssl_mode(self.ssl_mode());
        if let Some(ca) = &self.ca {
            options = options.ssl_ca_from_pem(ca.pem().to_vec());
        }

        let pool = pool
            .apply(MySqlPoolOptions::new())
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(SqlPool::MySql(pool))
    }
}

#[derive(Debug, Clone)]
pub struct PostgresDialect {
    credentials: SqlCredentials,
    ca: Option<CaBundle>,
}

impl PostgresDialect {
    pub fn new(credentials: SqlCredentials, ca_cert: Option<&str>) -> Result<Self, StoreError> {
        let ca = ca_cert
            .filter(|pem| !pem.trim().is_empty())
            .map(|pem| CaBundle::parse(pem, &credentials.database))
            .transpose()?;

        Ok(Self { credentials, ca })
    }
}

#[async_trait]
impl SqlDialect for PostgresDialect {
    fn driver(&self) -> SqlDriver {
        SqlDriver::Postgres
    }

    fn database(&self) -> &str {
        &self.credentials.database
    }

    fn connection_string(&self) -> Result<String, StoreError> {
        let mut url = self.credentials.url("postgres")?;
        let mode = if self.ca.is_some() {
            "verify-ca"
        } else {
            "disable"
        };
        url.query_pairs_mut().append_pair("sslmode", mode);
        Ok(url.to_string())
    }

    fn flavorify(&self, query: &str) -> String {
        let mut out = String::with_capacity(query.len() + 8);
        let mut position = 0;
        for c in query.chars() {
            if c == '?' {
                position += 1;
                out.push('$');
                out.push_str(&position.to_string());
            } else {
                out.push(c);
            }
        }
        out
    }

    async fn connect(&self, pool: &PoolSettings) -> Result<SqlPool, StoreError> {
        let connection_string = self.connection_string()?;
        debug!(connection = %masked(&connection_string), "connecting to postgres");

        let mut options = PgConnectOptions::from_str(&connection_string)
            .map_err(|e| StoreError::Configuration(e.to_string()))?;
        if let Some(ca) = &self.ca {
            options = options.ssl_root_cert_from_pem(ca.pem().to_vec());
        }

        let pool = pool
            .apply(PgPoolOptions::new())
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(SqlPool::Postgres(pool))
    }
}
