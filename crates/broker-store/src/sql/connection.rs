//! A pooled connection that speaks `?` placeholders to either driver.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::mysql::MySqlPool;
use sqlx::pool::PoolOptions;
use sqlx::postgres::PgPool;
use sqlx::Connection as _;
use tracing::debug;

use super::dialect::SqlDialect;
use crate::error::StoreError;

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_open_connections: u32,
    pub min_idle_connections: u32,
    /// Maximum lifetime of a pooled connection. Unlimited when unset.
    pub max_lifetime_secs: Option<u64>,
    /// How long to wait for a connection before giving up.
    pub acquire_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open_connections: 10,
            min_idle_connections: 0,
            max_lifetime_secs: None,
            acquire_timeout_secs: 30,
        }
    }
}

impl PoolSettings {
    pub(crate) fn apply<DB: sqlx::Database>(&self, options: PoolOptions<DB>) -> PoolOptions<DB> {
        options
            .max_connections(self.max_open_connections)
            .min_connections(self.min_idle_connections)
            .max_lifetime(self.max_lifetime_secs.map(Duration::from_secs))
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
    }
}

/// The pool for whichever driver the dialect connected with.
#[derive(Debug, Clone)]
pub enum SqlPool {
    MySql(MySqlPool),
    Postgres(PgPool),
}

/// Executes queries written with `?` placeholders, rewriting them for the
/// underlying driver first.
#[derive(Debug, Clone)]
pub struct SqlConnection {
    pool: SqlPool,
    dialect: Arc<dyn SqlDialect>,
}

impl SqlConnection {
    /// Connects and checks the database is reachable.
    pub async fn connect(
        dialect: Arc<dyn SqlDialect>,
        settings: &PoolSettings,
    ) -> Result<Self, StoreError> {
        let pool = dialect.connect(settings).await?;
        let conn = Self { pool, dialect };
        conn.ping().await?;
        debug!(driver = %conn.dialect.driver(), database = conn.dialect.database(), "connected");
        Ok(conn)
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let result = match &self.pool {
            SqlPool::MySql(pool) => match pool.acquire().await {
                Ok(mut conn) => conn.ping().await,
                Err(e) => Err(e),
            },
            SqlPool::Postgres(pool) => match pool.acquire().await {
                Ok(mut conn) => conn.ping().await,
                Err(e) => Err(e),
            },
        };

        result.map_err(|e| {
            StoreError::Connection(format!(
                "unable to reach {} database {}: {e}",
                self.dialect.driver(),
                self.dialect.database()
            ))
        })
    }

    /// Runs a statement and returns the number of affected rows.
    pub async fn exec(&self, query: &str, args: &[&str]) -> Result<u64, StoreError> {
        let query = self.dialect.flavorify(query);

        let result = match &self.pool {
            SqlPool::MySql(pool) => {
                let mut q = sqlx::query(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                q.execute(pool).await.map(|r| r.rows_affected())
            }
            SqlPool::Postgres(pool) => {
                let mut q = sqlx::query(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                q.execute(pool).await.map(|r| r.rows_affected())
            }
        };

        result.map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Fetches at most one `(id, value)` row.
    pub async fn query_row(
        &self,
        query: &str,
        args: &[&str],
    ) -> Result<Option<(String, String)>, StoreError> {
        let query = self.dialect.flavorify(query);

        let result = match &self.pool {
            SqlPool::MySql(pool) => {
                let mut q = sqlx::query_as::<_, (String, String)>(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                q.fetch_optional(pool).await
            }
            SqlPool::Postgres(pool) => {
                let mut q = sqlx::query_as::<_, (String, String)>(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                q.fetch_optional(pool).await
            }
        };

        result.map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Fetches every `(id, value)` row.
    pub async fn query(
        &self,
        query: &str,
        args: &[&str],
    ) -> Result<Vec<(String, String)>, StoreError> {
        let query = self.dialect.flavorify(query);

        let result = match &self.pool {
            SqlPool::MySql(pool) => {
                let mut q = sqlx::query_as::<_, (String, String)>(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                q.fetch_all(pool).await
            }
            SqlPool::Postgres(pool) => {
                let mut q = sqlx::query_as::<_, (String, String)>(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                q.fetch_all(pool).await
            }
        };

        result.map_err(|e| StoreError::Backend(e.to_string()))
    }

    pub async fn close(&self) {
        match &self.pool {
            SqlPool::MySql(pool) => pool.close().await,
            SqlPool::Postgres(pool) => pool.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_settings_default_to_a_small_pool() {
        let settings = PoolSettings::default();
        assert_eq!(settings.max_open_connections, 10);
        assert_eq!(settings.min_idle_connections, 0);
        assert_eq!(settings.max_lifetime_secs, None);
        assert_eq!(settings.acquire_timeout_secs, 30);
    }

    #[test]
    fn pool_settings_fill_missing_fields() {
        let settings: PoolSettings =
            serde_json::from_value(serde_json::json!({"max_lifetime_secs": 300})).unwrap();
        assert_eq!(settings.max_open_connections, 10);
        assert_eq!(settings.max_lifetime_secs, Some(300));
    }
}
