//! Storage abstraction for the import pipeline.
//!
//! The [`Storage`] trait is the narrow capability a backend must provide:
//! connect, administratively connect, existence checks, database creation,
//! and parameterized statement execution. The schema bootstrap and the
//! idempotent writer are built entirely on top of it, so tests can run
//! against [`MemoryStorage`](crate::storage_mem::MemoryStorage) and
//! additional backends are added by implementing the trait.

use std::fmt;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::schema;
use crate::storage_pg::PgStorage;

/// A bound statement parameter. Values always travel through here, never
/// through string interpolation.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

/// Failures surfaced by a storage backend.
#[derive(Debug)]
pub enum StorageError {
    /// The configured database product has no registered implementation.
    UnsupportedBackend(String),
    /// The server is reachable but the target database does not exist.
    /// This is the only variant on which the create-database fallback in
    /// [`prepare`] is taken.
    DatabaseAbsent(String),
    /// Any other connection failure (credentials, network, permissions).
    Connection(String),
    /// The engine reported a natural-key collision; retryable.
    Conflict(String),
    /// Statement execution failed.
    Sql(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::UnsupportedBackend(product) => {
                write!(f, "unsupported database product: {}", product)
            }
            StorageError::DatabaseAbsent(name) => {
                write!(f, "database {} does not exist", name)
            }
            StorageError::Connection(e) => write!(f, "cannot connect to database: {}", e),
            StorageError::Conflict(e) => write!(f, "natural-key conflict: {}", e),
            StorageError::Sql(e) => write!(f, "statement failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Abstract storage backend.
///
/// Connections are scoped to one full import run: [`connect`](Storage::connect)
/// is called once at startup and the session is reused for every insert.
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// The backend product name (e.g. `"postgresql"`).
    fn product(&self) -> &str;

    /// Connect directly to the target database.
    ///
    /// Fails with [`StorageError::DatabaseAbsent`] when the server answers
    /// but the database is missing, and [`StorageError::Connection`] for
    /// every other cause.
    async fn connect(&mut self) -> Result<(), StorageError>;

    /// Connect with elevated credentials to the maintenance database. Only
    /// used when the target database has to be created.
    async fn admin_connect(&mut self) -> Result<(), StorageError>;

    /// Whether a database with this name exists. Requires an administrative
    /// connection.
    async fn database_exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Issue a CREATE DATABASE over the administrative connection.
    async fn create_database(&self, name: &str) -> Result<(), StorageError>;

    /// Whether a table exists in the current catalog.
    async fn table_exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Execute one parameterized statement; returns the affected row count.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError>;
}

/// Resolve the configured product to a concrete backend.
pub fn open_storage(config: &DatabaseConfig) -> Result<Box<dyn Storage>, StorageError> {
    match config.product.as_str() {
        "postgresql" => Ok(Box::new(PgStorage::new(config.clone()))),
        other => Err(StorageError::UnsupportedBackend(other.to_string())),
    }
}

/// Bootstrap protocol: connect, creating the database on first use, then
/// ensure the schema.
///
/// The create-database fallback is taken only on [`StorageError::DatabaseAbsent`].
/// If the administrative catalog claims the database exists even though the
/// direct connection failed, that is a permissions or naming problem and the
/// run aborts rather than issuing a duplicate CREATE DATABASE.
pub async fn prepare(storage: &mut dyn Storage, config: &DatabaseConfig, lang: &str) -> Result<(), StorageError> {
    match storage.connect().await {
        Ok(()) => {}
        Err(StorageError::DatabaseAbsent(_)) => {
            warn!(database = %config.name, "database absent, connecting administratively");
            storage.admin_connect().await?;
            if storage.database_exists(&config.name).await? {
                return Err(StorageError::Connection(format!(
                    "database {} exists but is not connectable; check credentials and naming",
                    config.name
                )));
            }
            info!(database = %config.name, "creating database");
            storage.create_database(&config.name).await?;
            storage.connect().await?;
        }
        Err(e) => return Err(e),
    }

    // Safe on every startup: each table is existence-checked first.
    schema::ensure_tables(storage, lang).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(product: &str) -> DatabaseConfig {
        DatabaseConfig {
            product: product.to_string(),
            name: "opensubtitle".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
            admin_user: "postgres".to_string(),
            admin_password: None,
        }
    }

    #[test]
    fn postgresql_is_a_registered_backend() {
        let storage = open_storage(&config("postgresql")).unwrap();
        assert_eq!(storage.product(), "postgresql");
    }

    #[test]
    fn unknown_products_are_rejected_before_any_work() {
        let err = open_storage(&config("mysql")).unwrap_err();
        match err {
            StorageError::UnsupportedBackend(product) => assert_eq!(product, "mysql"),
            other => panic!("expected UnsupportedBackend, got {}", other),
        }
    }
}
