//! End-to-end import scenarios against the in-memory storage backend.

use std::io::Write;

use osdb::config::{Config, DatabaseConfig, ImportConfig};
use osdb::ingest;
use osdb::storage::StorageError;
use osdb::schema::ensure_tables;
use osdb::storage::{prepare, SqlValue, Storage};
use osdb::storage_mem::MemoryStorage;
use osdb::traverse::{import_document, FileStats, MalformedNodeError};

async fn ready_storage() -> MemoryStorage {
    let storage = MemoryStorage::new();
    ensure_tables(&storage, "en").await.unwrap();
    storage
}

async fn import(storage: &MemoryStorage, xml: &str) -> anyhow::Result<FileStats> {
    import_document(storage, "en", "test.xml", xml.as_bytes()).await
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

const ALIGNED_DOCUMENT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<document id="42">
  <s id="1">
    <time id="1S" value="0:00:01,000" />
    <w id="1.1">Hello</w>
    <w id="1.2">world</w>
    <time id="1E" value="0:00:02,500" />
  </s>
</document>
"#;

#[tokio::test]
async fn aligned_document_produces_words_and_one_span() {
    let storage = ready_storage().await;
    let stats = import(&storage, ALIGNED_DOCUMENT).await.unwrap();

    assert_eq!(stats.words, 2);
    assert_eq!(stats.time_spans, 1);
    assert_eq!(stats.duplicates, 0);

    assert_eq!(
        storage.rows("words_en"),
        vec![
            vec![SqlValue::Int(42), SqlValue::Int(1), SqlValue::Int(1), text("Hello")],
            vec![SqlValue::Int(42), SqlValue::Int(1), SqlValue::Int(2), text("world")],
        ]
    );
    assert_eq!(
        storage.rows("time_en"),
        vec![vec![
            SqlValue::Int(42),
            SqlValue::Int(1),
            SqlValue::Int(1),
            SqlValue::Int(1),
            text("0:00:01.000"),
            SqlValue::Int(1),
            SqlValue::Int(2),
            text("0:00:02.500"),
        ]]
    );
}

#[tokio::test]
async fn span_start_never_follows_its_end_in_document_order() {
    let storage = ready_storage().await;
    import(&storage, ALIGNED_DOCUMENT).await.unwrap();

    for row in storage.rows("time_en") {
        let (start_s, start_w, end_s, end_w) = match (&row[2], &row[3], &row[5], &row[6]) {
            (
                SqlValue::Int(start_s),
                SqlValue::Int(start_w),
                SqlValue::Int(end_s),
                SqlValue::Int(end_w),
            ) => (*start_s, *start_w, *end_s, *end_w),
            other => panic!("unexpected span position columns: {:?}", other),
        };
        assert!(
            (start_s, start_w) <= (end_s, end_w),
            "span start ({},{}) is after end ({},{})",
            start_s,
            start_w,
            end_s,
            end_w
        );
    }
}

#[tokio::test]
async fn reimporting_the_same_file_leaves_row_counts_unchanged() {
    let storage = ready_storage().await;
    let first = import(&storage, ALIGNED_DOCUMENT).await.unwrap();
    assert_eq!(first.words, 2);

    let words_before = storage.row_count("words_en");
    let spans_before = storage.row_count("time_en");

    let second = import(&storage, ALIGNED_DOCUMENT).await.unwrap();
    assert_eq!(second.words, 0);
    assert_eq!(second.time_spans, 0);
    assert_eq!(second.duplicates, 3);

    assert_eq!(storage.row_count("words_en"), words_before);
    assert_eq!(storage.row_count("time_en"), spans_before);
}

#[tokio::test]
async fn meta_leaves_become_entries_and_empty_text_is_skipped() {
    let storage = ready_storage().await;
    let stats = import(
        &storage,
        r#"<document id="7">
             <meta>
               <title>Foo</title>
               <subtitle></subtitle>
               <source><site>osdb</site></source>
             </meta>
           </document>"#,
    )
    .await
    .unwrap();

    assert_eq!(stats.meta_entries, 2);
    assert_eq!(
        storage.rows("meta"),
        vec![
            vec![SqlValue::Int(7), text("title"), text("Foo")],
            vec![SqlValue::Int(7), text("site"), text("osdb")],
        ]
    );
}

#[tokio::test]
async fn empty_word_text_is_recorded_with_an_empty_marker() {
    let storage = ready_storage().await;
    let stats = import(
        &storage,
        r#"<document id="1">
             <s id="1">
               <w id="1.1"/>
               <w id="1.2">text</w>
             </s>
           </document>"#,
    )
    .await
    .unwrap();

    assert_eq!(stats.empty_words, 1);
    assert_eq!(stats.words, 2);
    assert_eq!(
        storage.rows("words_en")[0],
        vec![SqlValue::Int(1), SqlValue::Int(1), SqlValue::Int(1), text("")]
    );
}

#[tokio::test]
async fn malformed_word_id_names_the_file_and_node() {
    let storage = ready_storage().await;
    let err = import(
        &storage,
        r#"<document id="1"><s id="1"><w id="broken">Hi</w></s></document>"#,
    )
    .await
    .unwrap_err();

    let malformed = err
        .downcast_ref::<MalformedNodeError>()
        .expect("expected MalformedNodeError");
    assert_eq!(malformed.file, "test.xml");
    assert!(malformed.node.contains("broken"));
}

#[tokio::test]
async fn malformed_time_value_names_the_file_and_node() {
    let storage = ready_storage().await;
    let err = import(
        &storage,
        r#"<document id="1"><s id="1"><time id="1S" value="junk"/></s></document>"#,
    )
    .await
    .unwrap_err();

    assert!(err.downcast_ref::<MalformedNodeError>().is_some());
}

#[tokio::test]
async fn open_without_close_is_dropped_not_persisted() {
    let storage = ready_storage().await;
    let stats = import(
        &storage,
        r#"<document id="1">
             <s id="1">
               <time id="1S" value="0:00:01,000"/>
               <w id="1.1">word</w>
             </s>
           </document>"#,
    )
    .await
    .unwrap();

    assert_eq!(stats.unclosed_opens, 1);
    assert_eq!(storage.row_count("time_en"), 0);
}

#[tokio::test]
async fn close_without_open_is_skipped() {
    let storage = ready_storage().await;
    let stats = import(
        &storage,
        r#"<document id="1">
             <s id="1">
               <w id="1.1">word</w>
               <time id="1E" value="0:00:02,000"/>
             </s>
           </document>"#,
    )
    .await
    .unwrap();

    assert_eq!(stats.orphan_closes, 1);
    assert_eq!(storage.row_count("time_en"), 0);
}

#[tokio::test]
async fn schema_bootstrap_issues_no_ddl_when_tables_exist() {
    let storage = MemoryStorage::new();
    ensure_tables(&storage, "en").await.unwrap();
    let ddl_after_first = storage.ddl_count();
    assert_eq!(ddl_after_first, 6); // three CREATE TABLE + three ALTER

    ensure_tables(&storage, "en").await.unwrap();
    assert_eq!(storage.ddl_count(), ddl_after_first);
}

fn database_config() -> DatabaseConfig {
    DatabaseConfig {
        product: "postgresql".to_string(),
        name: "opensubtitle".to_string(),
        host: "localhost".to_string(),
        port: 5432,
        user: None,
        password: None,
        admin_user: "postgres".to_string(),
        admin_password: None,
    }
}

#[tokio::test]
async fn prepare_creates_an_absent_database_then_connects() {
    let mut storage = MemoryStorage::without_database();
    prepare(&mut storage, &database_config(), "en").await.unwrap();

    assert!(storage
        .statement_log()
        .iter()
        .any(|sql| sql.starts_with("CREATE DATABASE")));
    assert!(storage.table_exists("words_en").await.unwrap());
    assert!(storage.table_exists("meta").await.unwrap());
    assert!(storage.table_exists("time_en").await.unwrap());
}

#[tokio::test]
async fn prepare_fails_fast_when_the_database_exists_but_is_unreachable() {
    let mut storage = MemoryStorage::unreachable_database();
    let err = prepare(&mut storage, &database_config(), "en")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not connectable"));
    // No CREATE DATABASE may be attempted in this state.
    assert!(storage.statement_log().is_empty());
}

#[tokio::test]
async fn gzip_compression_is_transparent_to_the_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.xml.gz");
    let mut encoder =
        flate2::write::GzEncoder::new(std::fs::File::create(&path).unwrap(), Default::default());
    encoder.write_all(ALIGNED_DOCUMENT.as_bytes()).unwrap();
    encoder.finish().unwrap();

    let storage = ready_storage().await;
    let stats = ingest::import_file(&storage, "en", &path).await.unwrap();
    assert_eq!(stats.words, 2);
    assert_eq!(stats.time_spans, 1);
}

#[tokio::test]
async fn cdata_word_text_is_read_like_plain_text() {
    let storage = ready_storage().await;
    let stats = import(
        &storage,
        r#"<document id="1">
             <s id="1">
               <w id="1.1"><![CDATA[Hello]]></w>
             </s>
           </document>"#,
    )
    .await
    .unwrap();

    assert_eq!(stats.words, 1);
    assert_eq!(stats.empty_words, 0);
    assert_eq!(
        storage.rows("words_en")[0],
        vec![SqlValue::Int(1), SqlValue::Int(1), SqlValue::Int(1), text("Hello")]
    );
}

#[tokio::test]
async fn malformed_file_is_abandoned_and_the_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("a.xml"),
        r#"<document id="1"><s id="1"><w id="broken">Hi</w></s></document>"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("b.xml"), ALIGNED_DOCUMENT).unwrap();

    let storage = ready_storage().await;
    let files = ingest::scan_source_dir(dir.path()).unwrap();
    let outcome = ingest::import_files(&storage, "en", &files).await.unwrap();

    assert_eq!(outcome.files_failed, 1);
    assert_eq!(outcome.files_ok, 1);
    assert_eq!(outcome.totals.words, 2);
    assert_eq!(storage.row_count("words_en"), 2);
    assert_eq!(storage.row_count("time_en"), 1);
}

#[tokio::test]
async fn storage_errors_abort_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.xml"), ALIGNED_DOCUMENT).unwrap();
    std::fs::write(dir.path().join("b.xml"), ALIGNED_DOCUMENT).unwrap();

    // Tables were never bootstrapped, so the first insert fails at the
    // storage layer rather than in the parser.
    let storage = MemoryStorage::new();
    let files = ingest::scan_source_dir(dir.path()).unwrap();
    let err = ingest::import_files(&storage, "en", &files)
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<StorageError>().is_some());
}

#[tokio::test]
async fn dry_run_still_rejects_an_unsupported_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        database: DatabaseConfig {
            product: "mysql".to_string(),
            ..database_config()
        },
        import: ImportConfig {
            lang: "en".to_string(),
            source_dir: dir.path().to_path_buf(),
        },
    };

    let err = ingest::run_import(&config, true, None).await.unwrap_err();
    match err.downcast_ref::<StorageError>() {
        Some(StorageError::UnsupportedBackend(product)) => assert_eq!(product, "mysql"),
        other => panic!("expected UnsupportedBackend, got {:?}", other),
    }
}

#[test]
fn source_scan_matches_xml_and_gz_in_sorted_order() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("nested");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(dir.path().join("b.xml"), "<document id=\"1\"/>").unwrap();
    std::fs::write(nested.join("a.xml.gz"), "").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let files = ingest::scan_source_dir(dir.path()).unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|p| {
            p.strip_prefix(dir.path())
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(names, vec!["b.xml".to_string(), "nested/a.xml.gz".to_string()]);
}
