use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{DocumentStore, IndexSpec, InsertFailure, InsertOutcome, StoreError};
use crate::aggregation::{evaluate, Stage};
use crate::document::Document;

/// Returns a rejection message for documents the store should refuse.
pub type DocumentCheck = Box<dyn Fn(&Document) -> Option<String> + Send + Sync>;

/// In-process collection for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<Vec<Document>>,
    indexes: Mutex<BTreeSet<IndexSpec>>,
    check: Option<DocumentCheck>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses any document for which `check` returns a message.
    pub fn with_check<F>(check: F) -> Self
    where
        F: Fn(&Document) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            check: Some(Box::new(check)),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> Result<Vec<Document>, StoreError> {
        let documents = self.documents.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(documents.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn insert_many(&self, documents: &[Document]) -> Result<InsertOutcome, StoreError> {
        let mut stored = self.documents.lock().map_err(|_| StoreError::Poisoned)?;
        let mut outcome = InsertOutcome::default();

        for (index, document) in documents.iter().enumerate() {
            let rejection = self.check.as_ref().and_then(|check| check(document));
            match rejection {
                Some(message) => outcome.failures.push(InsertFailure { index, message }),
                None => {
                    stored.push(document.clone());
                    outcome.inserted += 1;
                }
            }
        }

        debug!(
            inserted = outcome.inserted,
            failed = outcome.failed(),
            "memory store insert"
        );
        Ok(outcome)
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<(), StoreError> {
        let mut indexes = self.indexes.lock().map_err(|_| StoreError::Poisoned)?;
        indexes.insert(index.clone());
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, StoreError> {
        let indexes = self.indexes.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(indexes.iter().cloned().collect())
    }

    async fn aggregate(&self, stages: &[Stage]) -> Result<Vec<Document>, StoreError> {
        let documents = self.documents.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(evaluate(&documents, stages))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let documents = self.documents.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(documents.len() as u64)
    }
}
