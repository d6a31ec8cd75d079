//! PostgreSQL storage backend (sqlx).
//!
//! The direct pool targets the configured database; the administrative pool
//! targets the `postgres` maintenance database and is only opened when the
//! target database has to be created.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::storage::{SqlValue, Storage, StorageError};

/// SQLSTATE for "database does not exist".
const INVALID_CATALOG_NAME: &str = "3D000";
/// SQLSTATE for a unique-constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug)]
pub struct PgStorage {
    config: DatabaseConfig,
    pool: Option<PgPool>,
    admin_pool: Option<PgPool>,
}

impl PgStorage {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: None,
            admin_pool: None,
        }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database(&self.config.name);
        if let Some(user) = &self.config.user {
            options = options.username(user);
        }
        if let Some(password) = &self.config.password {
            options = options.password(password);
        }
        options
    }

    fn admin_connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database("postgres")
            .username(&self.config.admin_user);
        if let Some(password) = &self.config.admin_password {
            options = options.password(password);
        }
        options
    }

    fn pool(&self) -> Result<&PgPool, StorageError> {
        self.pool
            .as_ref()
            .ok_or_else(|| StorageError::Connection("not connected".to_string()))
    }

    fn admin_pool(&self) -> Result<&PgPool, StorageError> {
        self.admin_pool
            .as_ref()
            .ok_or_else(|| StorageError::Connection("not administratively connected".to_string()))
    }
}

/// Split connection failures into "database absent" and everything else, so
/// the bootstrap fallback is only taken when creation can actually help.
fn classify_connect_error(name: &str, e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some(INVALID_CATALOG_NAME) {
            return StorageError::DatabaseAbsent(name.to_string());
        }
    }
    StorageError::Connection(e.to_string())
}

fn classify_execute_error(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StorageError::Conflict(e.to_string());
        }
    }
    StorageError::Sql(e.to_string())
}

#[async_trait]
impl Storage for PgStorage {
    fn product(&self) -> &str {
        "postgresql"
    }

    async fn connect(&mut self) -> Result<(), StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(self.connect_options())
            .await
            .map_err(|e| classify_connect_error(&self.config.name, e))?;
        self.pool = Some(pool);
        Ok(())
    }

    async fn admin_connect(&mut self) -> Result<(), StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(self.admin_connect_options())
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        self.admin_pool = Some(pool);
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1)",
        )
        .bind(name)
        .fetch_one(self.admin_pool()?)
        .await
        .map_err(classify_execute_error)?;
        Ok(exists)
    }

    async fn create_database(&self, name: &str) -> Result<(), StorageError> {
        // Identifiers cannot be bound; the name was validated against the
        // identifier allow-list at config load.
        sqlx::query(&format!("CREATE DATABASE \"{}\"", name))
            .execute(self.admin_pool()?)
            .await
            .map_err(classify_execute_error)?;
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_catalog = current_database() AND table_name = $1)",
        )
        .bind(name)
        .fetch_one(self.pool()?)
        .await
        .map_err(classify_execute_error)?;
        Ok(exists)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
        debug!(sql, "executing statement");
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlValue::Int(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.clone()),
            };
        }
        let result = query
            .execute(self.pool()?)
            .await
            .map_err(classify_execute_error)?;
        Ok(result.rows_affected())
    }
}
