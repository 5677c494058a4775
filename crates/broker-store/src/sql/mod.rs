//! Relational backend for MySQL and PostgreSQL.
//!
//! Each record is one row in `service_instances` or `service_bindings`, with
//! the JSON encoding of the record in the `value` column.

mod connection;
mod dialect;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

pub use connection::{PoolSettings, SqlConnection, SqlPool};
pub use dialect::{masked, MySqlDialect, PostgresDialect, SqlCredentials, SqlDialect, SqlDriver};

use crate::config::SqlConfig;
use crate::document::{ensure_no_secrets, ensure_not_reserved};
use crate::error::StoreError;
use crate::redaction::Redactor;
use crate::traits::{BrokerStore, MigrationSource};
use crate::types::{BindingDetails, ServiceInstance};

/// ID of the row that marks a database as migrated away.
pub const MIGRATION_MARKER: &str = "migrated-to-credhub";

const CREATE_INSTANCES_TABLE: &str = "CREATE TABLE IF NOT EXISTS service_instances(
    id VARCHAR(255) PRIMARY KEY,
    value VARCHAR(4096)
)";

const CREATE_BINDINGS_TABLE: &str = "CREATE TABLE IF NOT EXISTS service_bindings(
    id VARCHAR(255) PRIMARY KEY,
    value VARCHAR(4096)
)";

const SELECT_INSTANCE: &str = "SELECT id, value FROM service_instances WHERE id = ?";
const SELECT_ALL_INSTANCES: &str = "SELECT id, value FROM service_instances WHERE id <> ?";
const INSERT_INSTANCE: &str = "INSERT INTO service_instances (id, value) VALUES (?, ?)";
const INSERT_BINDING: &str = "INSERT INTO service_bindings (id, value) VALUES (?, ?)";

/// Maps a DELETE that matched nothing to `NotFound`.
fn ensure_deleted(affected: u64, missing: impl FnOnce() -> StoreError) -> Result<(), StoreError> {
    if affected == 0 {
        return Err(missing());
    }
    Ok(())
}

/// Builds the dialect described by `config`.
pub fn dialect_for(config: &SqlConfig) -> Result<Arc<dyn SqlDialect>, StoreError> {
    let credentials = config.credentials();
    let ca_cert = config.ca_cert.as_deref();

    let dialect: Arc<dyn SqlDialect> = match config.driver {
        SqlDriver::Mysql => Arc::new(MySqlDialect::new(
            credentials,
            ca_cert,
            config.skip_hostname_validation,
        )?),
        SqlDriver::Postgres => Arc::new(PostgresDialect::new(credentials, ca_cert)?),
    };
    Ok(dialect)
}

/// SQL-backed [`BrokerStore`].
#[derive(Debug, Clone)]
pub struct SqlStore {
    conn: SqlConnection,
    redactor: Redactor,
}

impl SqlStore {
    /// Connects with the given dialect and creates the tables if needed.
    pub async fn new(
        dialect: Arc<dyn SqlDialect>,
        pool: &PoolSettings,
        redactor: Redactor,
    ) -> Result<Self, StoreError> {
        let conn = SqlConnection::connect(dialect, pool).await?;
        let store = Self { conn, redactor };
        store.ensure_tables().await?;
        Ok(store)
    }

    pub async fn from_config(config: &SqlConfig, redactor: Redactor) -> Result<Self, StoreError> {
        config.validate()?;
        Self::new(dialect_for(config)?, &config.pool, redactor).await
    }

    async fn ensure_tables(&self) -> Result<(), StoreError> {
        self.conn.exec(CREATE_INSTANCES_TABLE, &[]).await?;
        self.conn.exec(CREATE_BINDINGS_TABLE, &[]).await?;
        debug!(database = self.conn.dialect().database(), "tables ready");
        Ok(())
    }

    pub fn connection(&self) -> &SqlConnection {
        &self.conn
    }
}

#[async_trait]
impl BrokerStore for SqlStore {
    #[instrument(skip(self))]
    async fn retrieve_instance_details(&self, id: &str) -> Result<ServiceInstance, StoreError> {
        let row = self.conn.query_row(SELECT_INSTANCE, &[id]).await?;

        match row {
            Some((_, value)) => Ok(serde_json::from_str(&value)?),
            None => Err(StoreError::instance_not_found(id)),
        }
    }

    #[instrument(skip(self))]
    async fn retrieve_binding_details(&self, id: &str) -> Result<BindingDetails, StoreError> {
        let row = self
            .conn
            .query_row("SELECT id, value FROM service_bindings WHERE id = ?", &[id])
            .await?;

        match row {
            Some((_, value)) => Ok(serde_json::from_str(&value)?),
            None => Err(StoreError::binding_not_found(id)),
        }
    }

    #[instrument(skip(self, details))]
    async fn create_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), StoreError> {
        ensure_not_reserved(id, MIGRATION_MARKER)?;
        ensure_no_secrets(&details.service_fingerprint)?;
        let value = serde_json::to_string(details)?;

        self.conn.exec(INSERT_INSTANCE, &[id, value.as_str()]).await?;
        Ok(())
    }

    #[instrument(skip(self, details))]
    async fn create_binding_details(
        &self,
        id: &str,
        details: &BindingDetails,
    ) -> Result<(), StoreError> {
        ensure_not_reserved(id, MIGRATION_MARKER)?;
        let redacted = self.redactor.redact(details)?;
        let value = serde_json::to_string(&redacted)?;

        self.conn.exec(INSERT_BINDING, &[id, value.as_str()]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_instance_details(&self, id: &str) -> Result<(), StoreError> {
        let affected = self
            .conn
            .exec("DELETE FROM service_instances WHERE id = ?", &[id])
            .await?;

        ensure_deleted(affected, || StoreError::instance_not_found(id))
    }

    #[instrument(skip(self))]
    async fn delete_binding_details(&self, id: &str) -> Result<(), StoreError> {
        let affected = self
            .conn
            .exec("DELETE FROM service_bindings WHERE id = ?", &[id])
            .await?;

        ensure_deleted(affected, || StoreError::binding_not_found(id))
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        self.conn.close().await;
        Ok(())
    }
}

#[async_trait]
impl MigrationSource for SqlStore {
    #[instrument(skip(self))]
    async fn retrieve_all_instance_details(
        &self,
    ) -> Result<HashMap<String, ServiceInstance>, StoreError> {
        let rows = self
            .conn
            .query(SELECT_ALL_INSTANCES, &[MIGRATION_MARKER])
            .await?;

        rows.into_iter()
            .map(|(id, value)| -> Result<_, StoreError> {
                Ok((id, serde_json::from_str(&value)?))
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn retrieve_all_binding_details(
        &self,
    ) -> Result<HashMap<String, BindingDetails>, StoreError> {
        let rows = self
            .conn
            .query("SELECT id, value FROM service_bindings", &[])
            .await?;

        rows.into_iter()
            .map(|(id, value)| -> Result<_, StoreError> {
                Ok((id, serde_json::from_str(&value)?))
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn retire(&self) -> Result<(), StoreError> {
        if self.is_retired().await? {
            return Ok(());
        }

        self.conn
            .exec(INSERT_INSTANCE, &[MIGRATION_MARKER, "true"])
            .await?;
        debug!("database retired");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn is_retired(&self) -> Result<bool, StoreError> {
        let row = self
            .conn
            .query_row(SELECT_INSTANCE, &[MIGRATION_MARKER])
            .await?;

        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Redacted;

    fn credentials() -> SqlCredentials {
        SqlCredentials {
            username: "broker".to_string(),
            password: Redacted::new("secret".to_string()),
            host: "localhost".to_string(),
            port: 5432,
            database: "broker".to_string(),
        }
    }

    #[test]
    fn empty_delete_is_not_found() {
        let err = ensure_deleted(0, || StoreError::instance_not_found("instance-1")).unwrap_err();
        assert_eq!(err.to_string(), "service instance not found: instance-1");

        assert!(ensure_deleted(1, || StoreError::binding_not_found("binding-1")).is_ok());
    }

    #[test]
    fn statements_use_postgres_placeholders() {
        let dialect = PostgresDialect::new(credentials(), None).unwrap();
        assert_eq!(
            dialect.flavorify(SELECT_ALL_INSTANCES),
            "SELECT id, value FROM service_instances WHERE id <> $1"
        );
        assert_eq!(
            dialect.flavorify(INSERT_INSTANCE),
            "INSERT INTO service_instances (id, value) VALUES ($1, $2)"
        );
    }

    #[test]
    fn statements_are_unchanged_for_mysql() {
        let dialect = MySqlDialect::new(credentials(), None, false).unwrap();
        assert_eq!(dialect.flavorify(INSERT_BINDING), INSERT_BINDING);
    }
}
