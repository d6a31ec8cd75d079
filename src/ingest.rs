//! Import pipeline orchestration.
//!
//! Scans the source directory for subtitle XML files, bootstraps storage
//! once, then walks every file through [`traverse`](crate::traverse). A
//! malformed file is abandoned and reported; the batch continues. Storage
//! and connection errors abort the whole run.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use flate2::read::GzDecoder;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::storage::{self, StorageError};
use crate::traverse::{self, FileStats};

/// Result of one batch run over a file list.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub totals: FileStats,
    pub files_ok: u64,
    pub files_failed: u64,
}

pub async fn run_import(config: &Config, dry_run: bool, limit: Option<usize>) -> Result<()> {
    // Backend dispatch happens before any file is touched, so an
    // unsupported product is fatal even in dry-run mode.
    let mut storage = storage::open_storage(&config.database)?;

    let mut files = scan_source_dir(&config.import.source_dir)?;
    if let Some(lim) = limit {
        files.truncate(lim);
    }

    if dry_run {
        println!("import {} (dry-run)", config.import.lang);
        println!("  files found: {}", files.len());
        return Ok(());
    }

    storage::prepare(storage.as_mut(), &config.database, &config.import.lang).await?;
    let outcome = import_files(storage.as_ref(), &config.import.lang, &files).await?;
    let totals = &outcome.totals;

    println!("import {}", config.import.lang);
    println!("  files imported: {} of {}", outcome.files_ok, files.len());
    println!("  words written: {}", totals.words);
    println!("  meta entries written: {}", totals.meta_entries);
    println!("  time spans written: {}", totals.time_spans);
    println!("  duplicates skipped: {}", totals.duplicates);
    if totals.empty_words > 0 {
        println!("  words without text: {}", totals.empty_words);
    }
    if totals.orphan_closes + totals.unclosed_opens > 0 {
        println!(
            "  unpaired time nodes dropped: {}",
            totals.orphan_closes + totals.unclosed_opens
        );
    }
    if outcome.files_failed > 0 {
        println!("  files failed: {}", outcome.files_failed);
    }
    println!("ok");
    Ok(())
}

/// Import a file list over an already-prepared storage backend.
///
/// A per-file parse error abandons that file and the batch continues;
/// storage and connection errors abort the whole batch.
pub async fn import_files(
    storage: &dyn storage::Storage,
    lang: &str,
    files: &[PathBuf],
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    for path in files {
        info!(file = %path.display(), "reading");
        match import_file(storage, lang, path).await {
            Ok(stats) => {
                outcome.totals.absorb(&stats);
                outcome.files_ok += 1;
            }
            // Already-written rows for the file remain; writes are
            // idempotent, so a retry of the fixed file is safe.
            Err(e) if e.downcast_ref::<StorageError>().is_none() => {
                error!(file = %path.display(), "abandoning file: {:#}", e);
                outcome.files_failed += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(outcome)
}

/// Recursively collect `*.xml` and `*.xml.gz` files, sorted for
/// deterministic ordering.
pub fn scan_source_dir(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("source directory does not exist: {}", root.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(".xml") || name.ends_with(".xml.gz") {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Import one file; gzip compression is transparent to the traversal.
pub async fn import_file(
    storage: &dyn storage::Storage,
    lang: &str,
    path: &Path,
) -> Result<FileStats> {
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    traverse::import_document(storage, lang, &path.display().to_string(), reader).await
}
