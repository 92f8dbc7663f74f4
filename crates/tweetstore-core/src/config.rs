use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tweetstore_parser::ReaderOptions;

use crate::error::{PipelineError, Result};
use crate::reports::CREATED_AT_FIELD;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/tweetstore";
pub const DEFAULT_COLLECTION: &str = "tweets";
pub const DEFAULT_DISTINCT_THRESHOLD: usize = 46;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;

pub const ENV_DATABASE_URL: &str = "TWEETSTORE_DATABASE_URL";
pub const ENV_DATABASE_URL_FALLBACK: &str = "DATABASE_URL";
pub const ENV_COLLECTION: &str = "TWEETSTORE_COLLECTION";
pub const ENV_DISTINCT_THRESHOLD: &str = "TWEETSTORE_DISTINCT_THRESHOLD";

/// Knobs for the cleaning pipeline. Every field has a default, so a config file
/// only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub delimiter: char,
    /// Columns with fewer distinct non-missing values than this are dropped.
    pub distinct_threshold: usize,
    /// Applied to header names after trimming.
    pub renames: BTreeMap<String, String>,
    pub timestamp_columns: Vec<String>,
    pub identifier_columns: Vec<String>,
    pub insert_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let renames = [
            ("id", "tweet_id"),
            ("replied_to", "replied_to_tweet_id"),
            ("ts1", "timestamp1"),
            ("ts2", "timestamp2"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        Self {
            delimiter: '\t',
            distinct_threshold: DEFAULT_DISTINCT_THRESHOLD,
            renames,
            timestamp_columns: to_strings(&["timestamp1", "timestamp2", CREATED_AT_FIELD]),
            identifier_columns: to_strings(&[
                "tweet_id",
                "author_id",
                "conversation_id",
                "replied_to_tweet_id",
                "quoted_author_id",
                "retweeted_author_id",
            ]),
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }
}

impl PipelineConfig {
    pub fn with_distinct_threshold(mut self, threshold: usize) -> Self {
        self.distinct_threshold = threshold;
        self
    }

    /// Rejects settings the reports cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.timestamp_columns.iter().any(|name| name == CREATED_AT_FIELD) {
            return Err(PipelineError::Config(format!(
                "timestamp_columns must include '{CREATED_AT_FIELD}'"
            )));
        }
        Ok(())
    }

    pub fn reader_options(&self) -> Result<ReaderOptions> {
        self.validate()?;
        if !self.delimiter.is_ascii() {
            return Err(PipelineError::Config(format!(
                "delimiter '{}' must be a single ASCII character",
                self.delimiter
            )));
        }
        Ok(ReaderOptions::with_delimiter(self.delimiter as u8))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub collection: String,
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Reads the optional config file, then layers environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.pipeline.validate()?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(ENV_DATABASE_URL).or_else(|| lookup(ENV_DATABASE_URL_FALLBACK));
        if let Some(url) = url {
            self.database_url = url;
        }
        if let Some(collection) = lookup(ENV_COLLECTION) {
            self.collection = collection;
        }
        if let Some(raw) = lookup(ENV_DISTINCT_THRESHOLD) {
            self.pipeline.distinct_threshold = raw.trim().parse().map_err(|err| {
                PipelineError::Config(format!(
                    "{ENV_DISTINCT_THRESHOLD}='{raw}' is not a count: {err}"
                ))
            })?;
        }
        Ok(())
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
