//! Idempotent insert primitives for the three entity types.
//!
//! Each insert is a single `INSERT … ON CONFLICT (<natural key>) DO NOTHING`
//! statement: the non-existence check and the insert are evaluated by the
//! engine as one atomic statement, so re-inserting an existing key is a
//! no-op rather than an error. A conflict raised anyway (two writers racing
//! on the same key) is retried once, then propagated.

use tracing::warn;

use crate::models::{MetaEntry, TimeSpan, WordRow};
use crate::schema::{self, META_TABLE};
use crate::storage::{SqlValue, Storage, StorageError};

pub struct Writer<'a> {
    storage: &'a dyn Storage,
    words_table: String,
    time_table: String,
}

impl<'a> Writer<'a> {
    pub fn new(storage: &'a dyn Storage, lang: &str) -> Self {
        Self {
            storage,
            words_table: schema::words_table(lang),
            time_table: schema::time_table(lang),
        }
    }

    /// Insert a word row; returns 1 when a row was written, 0 when the
    /// natural key already existed.
    pub async fn insert_word(&self, word: &WordRow) -> Result<u64, StorageError> {
        let sql = format!(
            "INSERT INTO {} (DocumentId, SentenceId, WordId, Word) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (DocumentId, SentenceId, WordId) DO NOTHING",
            self.words_table
        );
        self.execute_once_retried(
            &sql,
            &[
                word.document_id.into(),
                word.sentence_id.into(),
                word.word_id.into(),
                word.text.as_str().into(),
            ],
        )
        .await
    }

    pub async fn insert_meta(&self, entry: &MetaEntry) -> Result<u64, StorageError> {
        let sql = format!(
            "INSERT INTO {} (DocumentId, Key, Value) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (DocumentId, Key) DO NOTHING",
            META_TABLE
        );
        self.execute_once_retried(
            &sql,
            &[
                entry.document_id.into(),
                entry.key.as_str().into(),
                entry.value.as_str().into(),
            ],
        )
        .await
    }

    pub async fn insert_time_span(&self, span: &TimeSpan) -> Result<u64, StorageError> {
        let sql = format!(
            "INSERT INTO {} (DocumentId, TimeId, StartSentenceId, StartWordId, StartTime, \
             EndSentenceId, EndWordId, EndTime) \
             VALUES ($1, $2, $3, $4, $5::interval, $6, $7, $8::interval) \
             ON CONFLICT (DocumentId, TimeId, StartSentenceId) DO NOTHING",
            self.time_table
        );
        self.execute_once_retried(
            &sql,
            &[
                span.document_id.into(),
                span.time_id.into(),
                span.start_sentence_id.into(),
                span.start_word_id.into(),
                span.start_time.to_string().into(),
                span.end_sentence_id.into(),
                span.end_word_id.into(),
                span.end_time.to_string().into(),
            ],
        )
        .await
    }

    async fn execute_once_retried(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<u64, StorageError> {
        match self.storage.execute(sql, params).await {
            Err(StorageError::Conflict(detail)) => {
                warn!(detail = %detail, "natural-key conflict, retrying once");
                self.storage.execute(sql, params).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ensure_tables;
    use crate::storage_mem::MemoryStorage;

    fn word(document_id: i64, sentence_id: i64, word_id: i64, text: &str) -> WordRow {
        WordRow {
            document_id,
            sentence_id,
            word_id,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_word_key_is_a_no_op() {
        let storage = MemoryStorage::new();
        ensure_tables(&storage, "en").await.unwrap();
        let writer = Writer::new(&storage, "en");

        assert_eq!(writer.insert_word(&word(1, 1, 1, "Hello")).await.unwrap(), 1);
        assert_eq!(writer.insert_word(&word(1, 1, 1, "Hello")).await.unwrap(), 0);
        assert_eq!(storage.row_count("words_en"), 1);

        // A different natural key is a distinct row even with the same text.
        assert_eq!(writer.insert_word(&word(1, 1, 2, "Hello")).await.unwrap(), 1);
        assert_eq!(storage.row_count("words_en"), 2);
    }

    #[tokio::test]
    async fn duplicate_meta_key_is_a_no_op() {
        let storage = MemoryStorage::new();
        ensure_tables(&storage, "en").await.unwrap();
        let writer = Writer::new(&storage, "en");

        let entry = MetaEntry {
            document_id: 7,
            key: "title".to_string(),
            value: "Foo".to_string(),
        };
        assert_eq!(writer.insert_meta(&entry).await.unwrap(), 1);
        assert_eq!(writer.insert_meta(&entry).await.unwrap(), 0);
        assert_eq!(storage.row_count("meta"), 1);
    }

    #[tokio::test]
    async fn conflict_is_retried_once() {
        let storage = MemoryStorage::new();
        ensure_tables(&storage, "en").await.unwrap();
        let writer = Writer::new(&storage, "en");

        storage.inject_conflicts(1);
        assert_eq!(writer.insert_word(&word(1, 1, 1, "Hello")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn persistent_conflict_is_surfaced() {
        let storage = MemoryStorage::new();
        ensure_tables(&storage, "en").await.unwrap();
        let writer = Writer::new(&storage, "en");

        storage.inject_conflicts(2);
        let err = writer.insert_word(&word(1, 1, 1, "Hello")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }
}
