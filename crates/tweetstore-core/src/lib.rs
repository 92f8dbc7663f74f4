pub mod aggregation;
pub mod cleaning;
pub mod config;
pub mod document;
pub mod error;
pub mod ingestion;
pub mod reports;
pub mod store;
pub mod timestamps;

pub use config::{AppConfig, PipelineConfig};
pub use document::{Document, FieldValue, SENTINEL_INSTANT};
pub use error::{PipelineError, Result};
pub use ingestion::{ingest, ingest_bytes, LoadReport};
pub use reports::{run_reports, ReportKind, ReportResult};
pub use store::{open_store, DocumentStore, MemoryStore, StoreError};
