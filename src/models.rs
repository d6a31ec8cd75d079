//! Row types produced by the traversal and persisted by the writer.
//!
//! All three are write-once: rows are only ever inserted, keyed by their
//! natural key, and never updated or deleted by this crate.

use crate::timecode::TimeCode;

/// One token of subtitle text, addressed by `(document, sentence, word)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WordRow {
    pub document_id: i64,
    pub sentence_id: i64,
    pub word_id: i64,
    pub text: String,
}

/// One free-form metadata entry under a document's `meta` subtree.
///
/// `key` is the leaf tag name; natural key is `(document_id, key)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaEntry {
    pub document_id: i64,
    pub key: String,
    pub value: String,
}

/// A start/end pairing of playback timestamps anchored to word positions.
///
/// Assembled from a time-open half (`id` suffixed `S`) and the matching
/// close half; only complete pairs are ever persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSpan {
    pub document_id: i64,
    pub time_id: i64,
    pub start_sentence_id: i64,
    pub start_word_id: i64,
    pub start_time: TimeCode,
    pub end_sentence_id: i64,
    pub end_word_id: i64,
    pub end_time: TimeCode,
}
