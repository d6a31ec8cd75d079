//! # osdb
//!
//! Imports aligned-subtitle XML corpora into a relational store.
//!
//! Each input file carries one `document` tree of nested sentences (`s`),
//! words (`w`), timing marks (`time`), and a free-form `meta` subtree. The
//! importer walks the tree in pre-order and projects it into three tables
//! (`words_<lang>`, `meta`, `time_<lang>`), using natural-key-guarded
//! inserts so that re-running an import over the same or overlapping input
//! never produces duplicate rows.
//!
//! ## Pipeline
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌────────────┐
//! │ *.xml(.gz) │──▶│  Traversal  │──▶│  Storage   │
//! │ source dir │   │ words/spans │   │ PostgreSQL │
//! └────────────┘   └─────────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Row types |
//! | [`timecode`] | Timestamp parsing and normalization |
//! | [`storage`] | Backend capability trait and bootstrap protocol |
//! | [`storage_pg`] | PostgreSQL backend |
//! | [`storage_mem`] | In-memory backend for tests |
//! | [`schema`] | Table bootstrap |
//! | [`writer`] | Idempotent insert primitives |
//! | [`traverse`] | Per-file XML traversal |
//! | [`ingest`] | Batch orchestration |

pub mod config;
pub mod ingest;
pub mod models;
pub mod schema;
pub mod storage;
pub mod storage_mem;
pub mod storage_pg;
pub mod timecode;
pub mod traverse;
pub mod writer;
