use std::collections::HashSet;
use std::path::Path;

use csv::ReaderBuilder;
use polars::prelude::*;

use crate::errors::ParserError;
use crate::model::{is_missing, ColumnType, ReaderOptions};

/// Reads a delimited file with a header row into a typed DataFrame.
pub fn read_table_file(path: &Path, options: ReaderOptions) -> Result<DataFrame, ParserError> {
    let contents = std::fs::read(path).map_err(|source| ParserError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_table(&contents, options)
}

/// Parses delimited bytes into a DataFrame with one column per header field.
///
/// Header names are kept verbatim, including surrounding whitespace. Every cell is
/// read as text first; each column is then typed by [`infer_column_type`]. A row
/// shorter than the header is padded with missing cells; a longer one is an error.
pub fn read_table(contents: &[u8], options: ReaderOptions) -> Result<DataFrame, ParserError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(contents);

    let headers = reader.headers()?.clone();
    if headers.is_empty() || (headers.len() == 1 && headers.get(0) == Some("")) {
        return Err(ParserError::MissingHeader);
    }

    let mut seen = HashSet::with_capacity(headers.len());
    for name in headers.iter() {
        if !seen.insert(name) {
            return Err(ParserError::DuplicateHeader(name.to_string()));
        }
    }

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        if record.len() > headers.len() {
            return Err(ParserError::DataRow {
                line_index: record.position().map(|p| p.line() as usize).unwrap_or_default(),
                message: format!("expected {} fields, found {}", headers.len(), record.len()),
            });
        }
        for (idx, column) in columns.iter_mut().enumerate() {
            let value = record.get(idx).filter(|value| !is_missing(value));
            column.push(value.map(str::to_string));
        }
    }

    let mut frame_columns: Vec<Column> = Vec::with_capacity(headers.len());
    for (name, values) in headers.iter().zip(columns) {
        frame_columns.push(build_series(name, values).into());
    }

    DataFrame::new(frame_columns).map_err(|source| ParserError::Polars {
        column: "<frame>".to_string(),
        source,
    })
}

/// Picks the narrowest type that every present value parses as.
///
/// A column with no present values is typed as text.
pub fn infer_column_type(values: &[Option<String>]) -> ColumnType {
    let mut any_present = false;
    let mut all_integer = true;
    let mut all_float = true;
    let mut all_boolean = true;

    for value in values.iter().flatten() {
        any_present = true;
        let trimmed = value.trim();
        if all_integer && trimmed.parse::<i64>().is_err() {
            all_integer = false;
        }
        if all_float && trimmed.parse::<f64>().is_err() {
            all_float = false;
        }
        if all_boolean && parse_bool(trimmed).is_none() {
            all_boolean = false;
        }
        if !all_integer && !all_float && !all_boolean {
            break;
        }
    }

    match (any_present, all_integer, all_float, all_boolean) {
        (false, ..) => ColumnType::Text,
        (true, true, _, _) => ColumnType::Integer,
        (true, false, true, _) => ColumnType::Float,
        (true, false, false, true) => ColumnType::Boolean,
        _ => ColumnType::Text,
    }
}

fn build_series(name: &str, values: Vec<Option<String>>) -> Series {
    match infer_column_type(&values) {
        ColumnType::Integer => {
            let parsed: Vec<Option<i64>> = values
                .iter()
                .map(|v| v.as_deref().and_then(|s| s.trim().parse().ok()))
                .collect();
            Series::new(name.into(), parsed)
        }
        ColumnType::Float => {
            let parsed: Vec<Option<f64>> = values
                .iter()
                .map(|v| v.as_deref().and_then(|s| s.trim().parse().ok()))
                .collect();
            Series::new(name.into(), parsed)
        }
        ColumnType::Boolean => {
            let parsed: Vec<Option<bool>> = values
                .iter()
                .map(|v| v.as_deref().and_then(|s| parse_bool(s.trim())))
                .collect();
            Series::new(name.into(), parsed)
        }
        ColumnType::Text => {
            let utf8: Vec<Option<&str>> = values.iter().map(|v| v.as_deref()).collect();
            Series::new(name.into(), utf8)
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
