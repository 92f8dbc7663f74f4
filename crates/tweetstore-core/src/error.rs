// crates/tweetstore-core/src/error.rs

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Source parsing failed: {0}")]
    Parser(#[from] tweetstore_parser::ParserError),

    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Configuration file is invalid: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Column '{0}' appears more than once after renaming")]
    DuplicateColumn(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
