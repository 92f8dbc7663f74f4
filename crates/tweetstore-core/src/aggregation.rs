//! Aggregation requests expressed as data, plus an in-process evaluator.
//!
//! A report is a list of [`Stage`]s. Stores either evaluate the stages directly
//! ([`evaluate`]) or compile them into their own query language.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::Timelike;

use crate::document::{Document, FieldValue};

/// Field holding the group key in rows produced by a [`Stage::Group`].
pub const GROUP_ID: &str = "_id";

static NULL_VALUE: FieldValue = FieldValue::Null;

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Group(Group),
    Sort(Vec<SortKey>),
    Limit(usize),
}

impl Stage {
    pub fn text_contains(field: &str, term: &str) -> Self {
        Stage::Match(Filter::TextContains {
            field: field.to_string(),
            term: term.to_string(),
        })
    }

    pub fn sort_by(field: &str, direction: SortDirection) -> Self {
        Stage::Sort(vec![SortKey {
            field: field.to_string(),
            direction,
        }])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Case-insensitive literal substring match. The term has no pattern syntax.
    TextContains { field: String, term: String },
}

fn contains_folded(document: &Document, field: &str, folded_needle: &str) -> bool {
    document
        .get(field)
        .and_then(FieldValue::as_str)
        .map(|text| text.to_lowercase().contains(folded_needle))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// Everything falls in one group keyed by `null`.
    Constant,
    Field(String),
    /// Calendar day of a timestamp field, as `YYYY-MM-DD` in UTC.
    Day(String),
    /// Hour of day (0-23, UTC) of a timestamp field.
    Hour(String),
}

impl GroupKey {
    fn extract(&self, document: &Document) -> FieldValue {
        match self {
            GroupKey::Constant => FieldValue::Null,
            GroupKey::Field(field) => document.get(field).cloned().unwrap_or(FieldValue::Null),
            GroupKey::Day(field) => timestamp_of(document, field)
                .map(|ts| FieldValue::Text(ts.format("%Y-%m-%d").to_string()))
                .unwrap_or(FieldValue::Null),
            GroupKey::Hour(field) => timestamp_of(document, field)
                .map(|ts| FieldValue::Int(ts.hour().into()))
                .unwrap_or(FieldValue::Null),
        }
    }
}

fn timestamp_of(document: &Document, field: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    document.get(field).and_then(FieldValue::as_timestamp)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Count,
    /// Mean of the numeric values of a field. Rows where the field is missing or
    /// not a number are skipped; no numeric values at all yields `null`.
    Average(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    pub accumulators: Vec<(String, Accumulator)>,
}

impl Group {
    pub fn by(key: GroupKey) -> Self {
        Self {
            key,
            accumulators: Vec::new(),
        }
    }

    pub fn with(mut self, output: &str, accumulator: Accumulator) -> Self {
        self.accumulators.push((output.to_string(), accumulator));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

enum AccumulatorState {
    Count(i64),
    Average { sum: f64, n: u64 },
}

impl AccumulatorState {
    fn new(accumulator: &Accumulator) -> Self {
        match accumulator {
            Accumulator::Count => AccumulatorState::Count(0),
            Accumulator::Average(_) => AccumulatorState::Average { sum: 0.0, n: 0 },
        }
    }

    fn update(&mut self, accumulator: &Accumulator, document: &Document) {
        match (self, accumulator) {
            (AccumulatorState::Count(count), _) => *count += 1,
            (AccumulatorState::Average { sum, n }, Accumulator::Average(field)) => {
                if let Some(value) = document.get(field).and_then(FieldValue::as_f64) {
                    *sum += value;
                    *n += 1;
                }
            }
            (AccumulatorState::Average { .. }, Accumulator::Count) => {}
        }
    }

    fn finish(self) -> FieldValue {
        match self {
            AccumulatorState::Count(count) => FieldValue::Int(count),
            AccumulatorState::Average { n: 0, .. } => FieldValue::Null,
            AccumulatorState::Average { sum, n } => FieldValue::Float(sum / n as f64),
        }
    }
}

/// Runs the stages over `documents` in memory.
pub fn evaluate(documents: &[Document], stages: &[Stage]) -> Vec<Document> {
    let mut stages = stages.iter();

    // Filter before cloning so a leading match only copies the rows it keeps.
    let mut rows: Vec<Document> = match stages.as_slice().first() {
        Some(Stage::Match(filter)) => {
            stages.next();
            filter_rows(documents.iter(), filter)
        }
        _ => documents.to_vec(),
    };

    for stage in stages {
        rows = match stage {
            Stage::Match(filter) => filter_rows(rows.iter(), filter),
            Stage::Group(group) => group_rows(&rows, group),
            Stage::Sort(keys) => {
                sort_rows(&mut rows, keys);
                rows
            }
            Stage::Limit(limit) => {
                rows.truncate(*limit);
                rows
            }
        };
    }

    rows
}

fn filter_rows<'a, I>(rows: I, filter: &Filter) -> Vec<Document>
where
    I: Iterator<Item = &'a Document>,
{
    match filter {
        Filter::TextContains { field, term } => {
            let needle = term.to_lowercase();
            rows.filter(|doc| contains_folded(doc, field, &needle))
                .cloned()
                .collect()
        }
    }
}

fn group_rows(rows: &[Document], group: &Group) -> Vec<Document> {
    let mut groups: BTreeMap<FieldValue, Vec<AccumulatorState>> = BTreeMap::new();

    for row in rows {
        let states = groups.entry(group.key.extract(row)).or_insert_with(|| {
            group
                .accumulators
                .iter()
                .map(|(_, accumulator)| AccumulatorState::new(accumulator))
                .collect()
        });
        for (state, (_, accumulator)) in states.iter_mut().zip(&group.accumulators) {
            state.update(accumulator, row);
        }
    }

    groups
        .into_iter()
        .map(|(key, states)| {
            let mut output = Document::new();
            output.insert(GROUP_ID.to_string(), key);
            for (state, (name, _)) in states.into_iter().zip(&group.accumulators) {
                output.insert(name.clone(), state.finish());
            }
            output
        })
        .collect()
}

fn sort_rows(rows: &mut [Document], keys: &[SortKey]) {
    rows.sort_by(|a, b| {
        for key in keys {
            let left = a.get(&key.field).unwrap_or(&NULL_VALUE);
            let right = b.get(&key.field).unwrap_or(&NULL_VALUE);
            let ordering = match key.direction {
                SortDirection::Ascending => left.cmp(right),
                SortDirection::Descending => right.cmp(left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn doc(text: &str, author: &str, hour: u32, likes: Option<i64>) -> Document {
        let mut document = Document::new();
        document.insert("text".into(), text.into());
        document.insert("author".into(), author.into());
        document.insert(
            "created_at".into(),
            Utc.with_ymd_and_hms(2021, 2, 1, hour, 30, 0).unwrap().into(),
        );
        if let Some(likes) = likes {
            document.insert("likes".into(), likes.into());
        }
        document
    }

    fn sample() -> Vec<Document> {
        vec![
            doc("Pop MUSIC", "a", 9, Some(3)),
            doc("music video", "b", 14, Some(5)),
            doc("nothing here", "a", 9, Some(100)),
            doc("more music", "a", 14, None),
        ]
    }

    #[test]
    fn match_is_case_insensitive_substring() {
        let rows = evaluate(&sample(), &[Stage::text_contains("text", "MuSiC")]);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn match_treats_metacharacters_literally() {
        let mut docs = sample();
        docs.push(doc("price is $5.00 (cheap)", "c", 1, None));

        assert_eq!(evaluate(&docs, &[Stage::text_contains("text", "(cheap)")]).len(), 1);
        assert_eq!(evaluate(&docs, &[Stage::text_contains("text", "mus.c")]).len(), 0);
        assert_eq!(evaluate(&docs, &[Stage::text_contains("text", "$5.00")]).len(), 1);
    }

    #[test]
    fn group_by_hour_counts_rows() {
        let rows = evaluate(
            &sample(),
            &[
                Stage::Group(
                    Group::by(GroupKey::Hour("created_at".into()))
                        .with("count", Accumulator::Count),
                ),
                Stage::sort_by(GROUP_ID, SortDirection::Ascending),
            ],
        );

        let hours: Vec<(i64, i64)> = rows
            .iter()
            .map(|row| {
                (
                    row[GROUP_ID].as_i64().unwrap(),
                    row["count"].as_i64().unwrap(),
                )
            })
            .collect();
        assert_eq!(hours, vec![(9, 2), (14, 2)]);
    }

    #[test]
    fn average_skips_missing_values() {
        let rows = evaluate(
            &sample(),
            &[
                Stage::text_contains("text", "music"),
                Stage::Group(
                    Group::by(GroupKey::Constant).with("avg", Accumulator::Average("likes".into())),
                ),
            ],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["avg"].as_f64(), Some(4.0));
    }

    #[test]
    fn constant_group_over_no_rows_yields_nothing() {
        let rows = evaluate(
            &sample(),
            &[
                Stage::text_contains("text", "zzz"),
                Stage::Group(Group::by(GroupKey::Constant).with("count", Accumulator::Count)),
            ],
        );
        assert!(rows.is_empty());
    }

    #[test]
    fn sort_descending_then_limit() {
        let rows = evaluate(
            &sample(),
            &[
                Stage::Group(
                    Group::by(GroupKey::Field("author".into())).with("count", Accumulator::Count),
                ),
                Stage::sort_by("count", SortDirection::Descending),
                Stage::Limit(1),
            ],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][GROUP_ID].as_str(), Some("a"));
        assert_eq!(rows[0]["count"].as_i64(), Some(3));
    }

    #[test]
    fn missing_group_field_groups_under_null() {
        let mut docs = sample();
        docs[0].remove("author");
        let rows = evaluate(
            &docs,
            &[Stage::Group(
                Group::by(GroupKey::Field("author".into())).with("count", Accumulator::Count),
            )],
        );
        assert!(rows[0][GROUP_ID].is_null());
        assert_eq!(rows.len(), 3);
    }
}
