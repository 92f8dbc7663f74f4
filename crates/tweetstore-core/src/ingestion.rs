use std::path::Path;

use blake3::Hasher;
use serde::Serialize;
use tracing::{info, warn};
use tweetstore_parser::{read_table, ParserError};
use uuid::Uuid;

use crate::cleaning::{clean_frame, CleanedFrame, DroppedColumn};
use crate::config::PipelineConfig;
use crate::document::{frame_to_documents, Document};
use crate::error::Result;
use crate::reports::{AUTHOR_ID_FIELD, CREATED_AT_FIELD, TEXT_FIELD};
use crate::store::{DocumentStore, IndexSpec, InsertFailure};

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub source: String,
    pub source_hash: String,
    pub rows_read: usize,
    pub columns_kept: Vec<String>,
    pub columns_dropped: Vec<DroppedColumn>,
    pub inserted: usize,
    pub failures: Vec<InsertFailure>,
    pub indexes: Vec<IndexSpec>,
}

impl LoadReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Text index on `text`, ascending indexes on `created_at` and `author_id`.
pub fn required_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::text(TEXT_FIELD),
        IndexSpec::ascending(CREATED_AT_FIELD),
        IndexSpec::ascending(AUTHOR_ID_FIELD),
    ]
}

/// Creates any missing required index and returns the store's index set.
pub async fn ensure_indexes(store: &dyn DocumentStore) -> Result<Vec<IndexSpec>> {
    for index in required_indexes() {
        store.ensure_index(&index).await?;
    }
    Ok(store.list_indexes().await?)
}

/// Parses and cleans the source without touching any store.
pub fn prepare_documents(
    contents: &[u8],
    config: &PipelineConfig,
) -> Result<(CleanedFrame, Vec<Document>)> {
    let raw = read_table(contents, config.reader_options()?)?;
    let cleaned = clean_frame(raw, config)?;
    let documents = frame_to_documents(&cleaned)?;
    Ok((cleaned, documents))
}

/// Runs the whole pipeline over in-memory source bytes.
///
/// Parsing and cleaning finish before the first write, so a malformed source
/// leaves the store untouched.
pub async fn ingest_bytes(
    store: &dyn DocumentStore,
    source: &str,
    contents: &[u8],
    config: &PipelineConfig,
) -> Result<LoadReport> {
    let run_id = Uuid::new_v4();
    let source_hash = compute_hash(contents);
    info!(%run_id, source, hash = %source_hash, "starting load");

    let (cleaned, documents) = prepare_documents(contents, config)?;
    info!(
        rows = documents.len(),
        kept = cleaned.df.width(),
        dropped = cleaned.dropped.len(),
        "source cleaned"
    );

    let outcome = store.insert_many(&documents).await?;
    if !outcome.failures.is_empty() {
        warn!(
            failed = outcome.failed(),
            target = %store.describe(),
            "some documents were rejected"
        );
    }

    let indexes = ensure_indexes(store).await?;
    info!(
        %run_id,
        inserted = outcome.inserted,
        failed = outcome.failed(),
        indexes = indexes.len(),
        "load finished"
    );

    Ok(LoadReport {
        run_id,
        source: source.to_string(),
        source_hash,
        rows_read: documents.len(),
        columns_kept: cleaned.column_names(),
        columns_dropped: cleaned.dropped,
        inserted: outcome.inserted,
        failures: outcome.failures,
        indexes,
    })
}

/// Reads the file at `path` and loads it into `store`.
pub async fn ingest(
    store: &dyn DocumentStore,
    path: &Path,
    config: &PipelineConfig,
) -> Result<LoadReport> {
    let contents = std::fs::read(path).map_err(|source| ParserError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ingest_bytes(store, &path.display().to_string(), &contents, config).await
}

fn compute_hash(contents: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(contents);
    hasher.finalize().to_hex().to_string()
}
