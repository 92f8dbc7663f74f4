use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::timestamps::parse_timestamp;

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    Empty,
    LowCardinality { distinct: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedColumn {
    pub name: String,
    #[serde(flatten)]
    pub reason: DropReason,
}

/// Output of [`clean_frame`]. Timestamp columns are still nullable here; the
/// sentinel is substituted when rows become documents.
#[derive(Debug, Clone)]
pub struct CleanedFrame {
    pub df: DataFrame,
    pub dropped: Vec<DroppedColumn>,
    pub timestamp_columns: Vec<String>,
}

impl CleanedFrame {
    pub fn column_names(&self) -> Vec<String> {
        self.df
            .get_columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect()
    }
}

/// Runs every cleaning step in order: prune, rename, collapse whitespace, parse
/// timestamps, coerce identifiers.
pub fn clean_frame(df: DataFrame, config: &PipelineConfig) -> Result<CleanedFrame> {
    config.validate()?;
    let height = df.height();

    let (df, mut dropped) = drop_empty_columns(df)?;
    let (df, low_cardinality) = drop_low_cardinality_columns(df, config.distinct_threshold)?;
    dropped.extend(low_cardinality);

    let df = normalize_column_names(df, &config.renames)?;
    let df = collapse_whitespace(df)?;
    let df = parse_timestamp_columns(df, &config.timestamp_columns, height)?;
    let df = coerce_identifier_columns(df, &config.identifier_columns)?;

    Ok(CleanedFrame {
        df,
        dropped,
        timestamp_columns: config.timestamp_columns.clone(),
    })
}

/// Drops columns where every cell is missing.
pub fn drop_empty_columns(df: DataFrame) -> Result<(DataFrame, Vec<DroppedColumn>)> {
    let mut kept: Vec<Column> = Vec::with_capacity(df.width());
    let mut dropped = Vec::new();

    for column in df.get_columns() {
        if column.null_count() == column.len() {
            debug!(column = %column.name(), "dropping empty column");
            dropped.push(DroppedColumn {
                name: column.name().to_string(),
                reason: DropReason::Empty,
            });
        } else {
            kept.push(column.clone());
        }
    }

    Ok((DataFrame::new(kept)?, dropped))
}

/// Drops columns with fewer than `threshold` distinct non-missing values.
///
/// Near-constant columns carry little signal for the reports. A threshold of 0
/// or 1 keeps everything that survived [`drop_empty_columns`].
pub fn drop_low_cardinality_columns(
    df: DataFrame,
    threshold: usize,
) -> Result<(DataFrame, Vec<DroppedColumn>)> {
    let mut kept: Vec<Column> = Vec::with_capacity(df.width());
    let mut dropped = Vec::new();

    for column in df.get_columns() {
        let distinct = column.as_materialized_series().drop_nulls().n_unique()?;
        if distinct < threshold {
            debug!(column = %column.name(), distinct, threshold, "dropping low-cardinality column");
            dropped.push(DroppedColumn {
                name: column.name().to_string(),
                reason: DropReason::LowCardinality { distinct },
            });
        } else {
            kept.push(column.clone());
        }
    }

    Ok((DataFrame::new(kept)?, dropped))
}

/// Trims header whitespace, then applies the rename map to the trimmed names.
pub fn normalize_column_names(
    df: DataFrame,
    renames: &BTreeMap<String, String>,
) -> Result<DataFrame> {
    let mut seen = HashSet::with_capacity(df.width());
    let mut columns: Vec<Column> = Vec::with_capacity(df.width());

    for column in df.get_columns() {
        let trimmed = column.name().as_str().trim();
        let target = renames
            .get(trimmed)
            .map(String::as_str)
            .unwrap_or(trimmed)
            .to_string();

        if !seen.insert(target.clone()) {
            return Err(PipelineError::DuplicateColumn(target));
        }

        let renamed = column
            .as_materialized_series()
            .clone()
            .with_name(target.as_str().into());
        columns.push(renamed.into());
    }

    Ok(DataFrame::new(columns)?)
}

/// Replaces every run of whitespace in text columns with a single space.
pub fn collapse_whitespace(df: DataFrame) -> Result<DataFrame> {
    let mut columns: Vec<Column> = Vec::with_capacity(df.width());

    for column in df.get_columns() {
        if column.dtype() != &DataType::String {
            columns.push(column.clone());
            continue;
        }

        let values = column.as_materialized_series().str()?;
        let collapsed: Vec<Option<String>> = values
            .into_iter()
            .map(|value| value.map(|text| WHITESPACE_RUN.replace_all(text, " ").into_owned()))
            .collect();
        let utf8: Vec<Option<&str>> = collapsed.iter().map(|v| v.as_deref()).collect();
        columns.push(Series::new(column.name().clone(), utf8).into());
    }

    Ok(DataFrame::new(columns)?)
}

/// Parses the named columns into UTC datetimes, leaving unparseable cells null.
///
/// A named column that is not present is added with every cell null, so the
/// document boundary still fills it in.
pub fn parse_timestamp_columns(
    df: DataFrame,
    names: &[String],
    height: usize,
) -> Result<DataFrame> {
    let dtype = DataType::Datetime(TimeUnit::Microseconds, Some(TimeZone::UTC));
    let mut columns: Vec<Column> = df.get_columns().to_vec();

    for name in names {
        let micros: Vec<Option<i64>> = match df.column(name) {
            Ok(column) => {
                let as_text = column.as_materialized_series().cast(&DataType::String)?;
                as_text
                    .str()?
                    .into_iter()
                    .map(|value| {
                        value
                            .and_then(parse_timestamp)
                            .map(|dt| dt.timestamp_micros())
                    })
                    .collect()
            }
            Err(_) => {
                debug!(column = %name, "timestamp column absent; filling with nulls");
                vec![None; height]
            }
        };

        let unparsed = micros.iter().filter(|value| value.is_none()).count();
        if unparsed > 0 {
            debug!(column = %name, unparsed, "timestamps missing or unparseable");
        }

        let series = Series::new(name.as_str().into(), micros).cast(&dtype)?;
        match columns.iter().position(|column| column.name().as_str() == name) {
            Some(idx) => columns[idx] = series.into(),
            None => columns.push(series.into()),
        }
    }

    Ok(DataFrame::new(columns)?)
}

/// Shortest round-trip rendering with a signed, two-digit exponent.
fn float_identifier(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    let text = format!("{value:?}");
    let Some((mantissa, exponent)) = text.split_once('e') else {
        return text;
    };
    match exponent.parse::<i32>() {
        Ok(exp) => {
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        Err(_) => text,
    }
}

/// Casts the named columns to text. Integers render as `"123"`, floats keep their
/// decimal point as `"123.0"` and large ones use a signed exponent (`"1.3574e+18"`).
/// Missing cells stay missing.
pub fn coerce_identifier_columns(df: DataFrame, names: &[String]) -> Result<DataFrame> {
    let mut columns: Vec<Column> = df.get_columns().to_vec();

    for column in columns.iter_mut() {
        if !names.iter().any(|name| column.name().as_str() == name) {
            continue;
        }

        let series = column.as_materialized_series();
        let coerced = match series.dtype() {
            DataType::String => continue,
            DataType::Float64 => {
                let values: Vec<Option<String>> = series
                    .f64()?
                    .into_iter()
                    .map(|value| value.map(float_identifier))
                    .collect();
                let utf8: Vec<Option<&str>> = values.iter().map(|v| v.as_deref()).collect();
                Series::new(series.name().clone(), utf8)
            }
            _ => series.cast(&DataType::String)?,
        };
        *column = coerced.into();
    }

    Ok(DataFrame::new(columns)?)
}
