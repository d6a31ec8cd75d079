//! In-memory [`Storage`] implementation for tests.
//!
//! Recognizes exactly the statement shapes this crate issues (CREATE TABLE,
//! ALTER TABLE … ADD PRIMARY KEY, INSERT … ON CONFLICT DO NOTHING) and
//! enforces natural-key dedup the way a primary key would, so idempotence
//! and bootstrap behavior can be asserted without a running server. Every
//! executed statement is recorded for call-count assertions.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::storage::{SqlValue, Storage, StorageError};

#[derive(Debug, Default)]
struct Table {
    key_width: Option<usize>,
    rows: Vec<Vec<SqlValue>>,
}

#[derive(Debug)]
struct Inner {
    database_present: bool,
    /// What the administrative catalog reports, independently of whether a
    /// direct connection succeeds. Lets tests model a database that exists
    /// but is not connectable.
    catalog_reports_present: bool,
    connected: bool,
    admin_connected: bool,
    tables: BTreeMap<String, Table>,
    log: Vec<String>,
    conflicts_to_inject: u32,
}

#[derive(Debug)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_state(true, true)
    }

    /// The target database does not exist yet; a bootstrap must create it.
    pub fn without_database() -> Self {
        Self::with_state(false, false)
    }

    /// The catalog says the database exists, but direct connections fail.
    /// This is the permissions/naming case the bootstrap must treat as fatal.
    pub fn unreachable_database() -> Self {
        Self::with_state(false, true)
    }

    fn with_state(database_present: bool, catalog_reports_present: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                database_present,
                catalog_reports_present,
                connected: false,
                admin_connected: false,
                tables: BTreeMap::new(),
                log: Vec::new(),
                conflicts_to_inject: 0,
            }),
        }
    }

    /// Make the next `n` `execute` calls fail with a conflict, simulating a
    /// concurrent writer racing on the same natural key.
    pub fn inject_conflicts(&self, n: u32) {
        self.inner.lock().unwrap().conflicts_to_inject = n;
    }

    /// All statements executed so far, in order.
    pub fn statement_log(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }

    /// Count of DDL statements (CREATE/ALTER) executed so far.
    pub fn ddl_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|sql| sql.starts_with("CREATE") || sql.starts_with("ALTER"))
            .count()
    }

    pub fn rows(&self, table: &str) -> Vec<Vec<SqlValue>> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier following `prefix` in `sql`, clipped at whitespace or '('.
fn identifier_after<'a>(sql: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = sql.strip_prefix(prefix)?.trim_start();
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

#[async_trait]
impl Storage for MemoryStorage {
    fn product(&self) -> &str {
        "memory"
    }

    async fn connect(&mut self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.database_present {
            return Err(StorageError::DatabaseAbsent("memory".to_string()));
        }
        inner.connected = true;
        Ok(())
    }

    async fn admin_connect(&mut self) -> Result<(), StorageError> {
        self.inner.lock().unwrap().admin_connected = true;
        Ok(())
    }

    async fn database_exists(&self, _name: &str) -> Result<bool, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.database_present || inner.catalog_reports_present)
    }

    async fn create_database(&self, name: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.admin_connected {
            return Err(StorageError::Connection(
                "create_database requires an administrative connection".to_string(),
            ));
        }
        inner.database_present = true;
        inner.log.push(format!("CREATE DATABASE {}", name));
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.inner.lock().unwrap().tables.contains_key(name))
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.conflicts_to_inject > 0 {
            inner.conflicts_to_inject -= 1;
            return Err(StorageError::Conflict("injected conflict".to_string()));
        }
        inner.log.push(sql.to_string());

        if let Some(name) = identifier_after(sql, "CREATE TABLE") {
            inner.tables.insert(name.to_string(), Table::default());
            return Ok(0);
        }

        if let Some(name) = identifier_after(sql, "ALTER TABLE") {
            let key_width = sql
                .rfind('(')
                .and_then(|open| sql[open..].find(')').map(|close| &sql[open + 1..open + close]))
                .map(|cols| cols.split(',').count());
            let table = inner
                .tables
                .get_mut(name)
                .ok_or_else(|| StorageError::Sql(format!("no such table: {}", name)))?;
            table.key_width = key_width;
            return Ok(0);
        }

        if let Some(name) = identifier_after(sql, "INSERT INTO") {
            let name = name.to_string();
            let table = inner
                .tables
                .get_mut(&name)
                .ok_or_else(|| StorageError::Sql(format!("no such table: {}", name)))?;
            if let Some(width) = table.key_width {
                let duplicate = table
                    .rows
                    .iter()
                    .any(|row| row.len() >= width && row[..width] == params[..width.min(params.len())]);
                if duplicate {
                    return Ok(0);
                }
            }
            table.rows.push(params.to_vec());
            return Ok(1);
        }

        Err(StorageError::Sql(format!("unrecognized statement: {}", sql)))
    }
}
