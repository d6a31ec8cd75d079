//! Schema bootstrap for the three import tables.
//!
//! Each table is existence-checked before any DDL is issued, so the
//! bootstrap is safe to run on every startup. Table names are the only
//! interpolated identifiers and are derived from the language code, which
//! is validated at config load.

use tracing::info;

use crate::storage::{Storage, StorageError};

pub fn words_table(lang: &str) -> String {
    format!("words_{}", lang)
}

pub fn time_table(lang: &str) -> String {
    format!("time_{}", lang)
}

pub const META_TABLE: &str = "meta";

/// Create any of the three tables that are missing, with their composite
/// primary keys. No DDL is issued for tables that already exist.
pub async fn ensure_tables(storage: &dyn Storage, lang: &str) -> Result<(), StorageError> {
    let words = words_table(lang);
    ensure_table(
        storage,
        &words,
        &format!(
            "CREATE TABLE {} (\
             DocumentId int NOT NULL, \
             SentenceId int NOT NULL, \
             WordId int NOT NULL, \
             Word varchar(255) NOT NULL)",
            words
        ),
        &format!(
            "ALTER TABLE {} ADD PRIMARY KEY (DocumentId, SentenceId, WordId)",
            words
        ),
    )
    .await?;

    ensure_table(
        storage,
        META_TABLE,
        &format!(
            "CREATE TABLE {} (\
             DocumentId int NOT NULL, \
             Key varchar(255) NOT NULL, \
             Value varchar(255) NOT NULL)",
            META_TABLE
        ),
        &format!("ALTER TABLE {} ADD PRIMARY KEY (DocumentId, Key)", META_TABLE),
    )
    .await?;

    let time = time_table(lang);
    ensure_table(
        storage,
        &time,
        &format!(
            "CREATE TABLE {} (\
             DocumentId int NOT NULL, \
             TimeId int NOT NULL, \
             StartSentenceId int NOT NULL, \
             StartWordId int NOT NULL, \
             StartTime interval NOT NULL, \
             EndSentenceId int NOT NULL, \
             EndWordId int NOT NULL, \
             EndTime interval NOT NULL)",
            time
        ),
        &format!(
            "ALTER TABLE {} ADD PRIMARY KEY (DocumentId, TimeId, StartSentenceId)",
            time
        ),
    )
    .await
}

async fn ensure_table(
    storage: &dyn Storage,
    name: &str,
    create_sql: &str,
    primary_key_sql: &str,
) -> Result<(), StorageError> {
    if storage.table_exists(name).await? {
        return Ok(());
    }
    info!(table = name, "table not present, creating");
    storage.execute(create_sql, &[]).await?;
    storage.execute(primary_key_sql, &[]).await?;
    Ok(())
}
