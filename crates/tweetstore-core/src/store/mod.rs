//! Storage collaborator: a document collection that supports unordered bulk
//! insert, index management and staged aggregation.

pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::aggregation::Stage;
use crate::config::AppConfig;
use crate::document::Document;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to document store: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("'{0}' is not a valid collection or field name")]
    InvalidIdentifier(String),

    #[error("unsupported store URL '{0}' (expected memory:// or postgres://)")]
    UnsupportedUrl(String),

    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store returned an unexpected row: {0}")]
    UnexpectedRow(String),

    #[error("store state lock was poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Full-text index over a text field.
    Text,
    /// Single-field ascending index.
    Ascending,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct IndexSpec {
    pub field: String,
    pub kind: IndexKind,
}

impl IndexSpec {
    pub fn text(field: &str) -> Self {
        Self {
            field: field.to_string(),
            kind: IndexKind::Text,
        }
    }

    pub fn ascending(field: &str) -> Self {
        Self {
            field: field.to_string(),
            kind: IndexKind::Ascending,
        }
    }

    /// Conventional name, e.g. `text_text` or `created_at_1`.
    pub fn name(&self) -> String {
        match self.kind {
            IndexKind::Text => format!("{}_text", self.field),
            IndexKind::Ascending => format!("{}_1", self.field),
        }
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertFailure {
    /// Position of the document in the batch passed to `insert_many`.
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub failures: Vec<InsertFailure>,
}

impl InsertOutcome {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable target for log lines.
    fn describe(&self) -> String;

    /// Inserts every document it can. A rejected document is reported in the
    /// outcome and does not stop the rest; only store-level failures return `Err`.
    async fn insert_many(&self, documents: &[Document]) -> Result<InsertOutcome, StoreError>;

    /// Creates the index if it does not already exist.
    async fn ensure_index(&self, index: &IndexSpec) -> Result<(), StoreError>;

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, StoreError>;

    async fn aggregate(&self, stages: &[Stage]) -> Result<Vec<Document>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// Opens the store named by `config.database_url`.
pub async fn open_store(config: &AppConfig) -> Result<Box<dyn DocumentStore>, StoreError> {
    let url = config.database_url.as_str();
    if url.starts_with("memory://") {
        info!("using in-memory document store");
        return Ok(Box::new(MemoryStore::new()));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PostgresStore::connect(url, &config.collection)
            .await?
            .with_batch_size(config.pipeline.insert_batch_size);
        return Ok(Box::new(store));
    }
    Err(StoreError::UnsupportedUrl(url.to_string()))
}

/// Collection and field names end up inside SQL text, so they are restricted to
/// ASCII letters, digits and underscores.
pub(crate) fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && name.len() <= 48 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_reject_sql_fragments() {
        assert!(validate_identifier("created_at").is_ok());
        assert!(validate_identifier("_id").is_ok());
        assert!(validate_identifier("text'; DROP TABLE tweets; --").is_err());
        assert!(validate_identifier("9lives").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn index_names_follow_field_and_kind() {
        assert_eq!(IndexSpec::text("text").name(), "text_text");
        assert_eq!(IndexSpec::ascending("created_at").name(), "created_at_1");
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let config = AppConfig {
            database_url: "mongodb://localhost:27017".to_string(),
            ..AppConfig::default()
        };
        let err = open_store(&config).await.err().expect("should fail");
        assert!(matches!(err, StoreError::UnsupportedUrl(_)));
    }
}
