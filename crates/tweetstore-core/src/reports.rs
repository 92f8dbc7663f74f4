//! The six term-filtered reports over a stored collection.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::aggregation::{Accumulator, Group, GroupKey, SortDirection, SortKey, Stage, GROUP_ID};
use crate::document::{Document, FieldValue};
use crate::store::{DocumentStore, StoreError};

pub const TEXT_FIELD: &str = "text";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const AUTHOR_ID_FIELD: &str = "author_id";
pub const AUTHOR_HANDLE_FIELD: &str = "author_handle";
pub const PLACE_ID_FIELD: &str = "place_id";
pub const LIKE_COUNT_FIELD: &str = "like_count";

const COUNT: &str = "count";
const AVERAGE_LIKES: &str = "average_likes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    TweetsPerDay,
    UniqueUsers,
    AverageLikes,
    TweetsByLocation,
    TweetsByTimeOfDay,
    UserWithMostTweets,
}

impl ReportKind {
    pub const ALL: [ReportKind; 6] = [
        ReportKind::TweetsPerDay,
        ReportKind::UniqueUsers,
        ReportKind::AverageLikes,
        ReportKind::TweetsByLocation,
        ReportKind::TweetsByTimeOfDay,
        ReportKind::UserWithMostTweets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::TweetsPerDay => "tweets_per_day",
            ReportKind::UniqueUsers => "unique_users",
            ReportKind::AverageLikes => "average_likes",
            ReportKind::TweetsByLocation => "tweets_by_location",
            ReportKind::TweetsByTimeOfDay => "tweets_by_time_of_day",
            ReportKind::UserWithMostTweets => "user_with_most_tweets",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportKind::TweetsPerDay => "Tweets per day",
            ReportKind::UniqueUsers => "Unique users",
            ReportKind::AverageLikes => "Average likes",
            ReportKind::TweetsByLocation => "Tweets by location",
            ReportKind::TweetsByTimeOfDay => "Tweets by time of day",
            ReportKind::UserWithMostTweets => "User with most tweets",
        }
    }

    /// Aggregation stages for this report.
    pub fn stages(&self, term: &str) -> Vec<Stage> {
        match self {
            ReportKind::TweetsPerDay => tweets_per_day_stages(term),
            ReportKind::UniqueUsers => unique_users_stages(term),
            ReportKind::AverageLikes => average_likes_stages(term),
            ReportKind::TweetsByLocation => tweets_by_location_stages(term),
            ReportKind::TweetsByTimeOfDay => tweets_by_time_of_day_stages(term),
            ReportKind::UserWithMostTweets => user_with_most_tweets_stages(term),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        ReportKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = ReportKind::ALL.iter().map(ReportKind::as_str).collect();
                format!("unknown report '{value}' (expected one of: {})", known.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayCount {
    pub day: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationCount {
    /// `None` groups the matching tweets that carry no place.
    pub place_id: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserCount {
    pub author_handle: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "report", content = "result", rename_all = "snake_case")]
pub enum ReportResult {
    TweetsPerDay(Vec<DayCount>),
    UniqueUsers(u64),
    AverageLikes(Option<f64>),
    TweetsByLocation(Vec<LocationCount>),
    TweetsByTimeOfDay(Vec<HourCount>),
    UserWithMostTweets(Option<UserCount>),
}

impl ReportResult {
    pub fn kind(&self) -> ReportKind {
        match self {
            ReportResult::TweetsPerDay(_) => ReportKind::TweetsPerDay,
            ReportResult::UniqueUsers(_) => ReportKind::UniqueUsers,
            ReportResult::AverageLikes(_) => ReportKind::AverageLikes,
            ReportResult::TweetsByLocation(_) => ReportKind::TweetsByLocation,
            ReportResult::TweetsByTimeOfDay(_) => ReportKind::TweetsByTimeOfDay,
            ReportResult::UserWithMostTweets(_) => ReportKind::UserWithMostTweets,
        }
    }
}

fn matching(term: &str) -> Stage {
    Stage::text_contains(TEXT_FIELD, term)
}

fn count_by(key: GroupKey) -> Stage {
    Stage::Group(Group::by(key).with(COUNT, Accumulator::Count))
}

pub fn tweets_per_day_stages(term: &str) -> Vec<Stage> {
    vec![
        matching(term),
        count_by(GroupKey::Day(CREATED_AT_FIELD.to_string())),
        Stage::sort_by(GROUP_ID, SortDirection::Ascending),
    ]
}

/// Groups by author, then counts the groups.
pub fn unique_users_stages(term: &str) -> Vec<Stage> {
    vec![
        matching(term),
        Stage::Group(Group::by(GroupKey::Field(AUTHOR_ID_FIELD.to_string()))),
        count_by(GroupKey::Constant),
    ]
}

pub fn average_likes_stages(term: &str) -> Vec<Stage> {
    vec![
        matching(term),
        Stage::Group(
            Group::by(GroupKey::Constant)
                .with(AVERAGE_LIKES, Accumulator::Average(LIKE_COUNT_FIELD.to_string())),
        ),
    ]
}

/// Ties on count are broken by place id so output is deterministic.
pub fn tweets_by_location_stages(term: &str) -> Vec<Stage> {
    vec![
        matching(term),
        count_by(GroupKey::Field(PLACE_ID_FIELD.to_string())),
        Stage::Sort(vec![
            SortKey {
                field: COUNT.to_string(),
                direction: SortDirection::Descending,
            },
            SortKey {
                field: GROUP_ID.to_string(),
                direction: SortDirection::Ascending,
            },
        ]),
    ]
}

pub fn tweets_by_time_of_day_stages(term: &str) -> Vec<Stage> {
    vec![
        matching(term),
        count_by(GroupKey::Hour(CREATED_AT_FIELD.to_string())),
        Stage::sort_by(GROUP_ID, SortDirection::Ascending),
    ]
}

pub fn user_with_most_tweets_stages(term: &str) -> Vec<Stage> {
    vec![
        matching(term),
        count_by(GroupKey::Field(AUTHOR_HANDLE_FIELD.to_string())),
        Stage::sort_by(COUNT, SortDirection::Descending),
        Stage::Limit(1),
    ]
}

fn count_of(row: &Document) -> u64 {
    row.get(COUNT)
        .and_then(FieldValue::as_i64)
        .map(|count| count.max(0) as u64)
        .unwrap_or(0)
}

/// Group keys read back as labels; a null key has no label.
fn key_label(row: &Document) -> Option<String> {
    match row.get(GROUP_ID) {
        None | Some(FieldValue::Null) => None,
        Some(value) => Some(value.to_string()),
    }
}

pub async fn tweets_per_day(
    store: &dyn DocumentStore,
    term: &str,
) -> Result<Vec<DayCount>, StoreError> {
    let rows = store.aggregate(&tweets_per_day_stages(term)).await?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            key_label(row).map(|day| DayCount {
                day,
                count: count_of(row),
            })
        })
        .collect())
}

pub async fn unique_users(store: &dyn DocumentStore, term: &str) -> Result<u64, StoreError> {
    let rows = store.aggregate(&unique_users_stages(term)).await?;
    Ok(rows.first().map(count_of).unwrap_or(0))
}

/// `None` when no matching tweet carries a numeric like count.
pub async fn average_likes(
    store: &dyn DocumentStore,
    term: &str,
) -> Result<Option<f64>, StoreError> {
    let rows = store.aggregate(&average_likes_stages(term)).await?;
    Ok(rows
        .first()
        .and_then(|row| row.get(AVERAGE_LIKES))
        .and_then(FieldValue::as_f64))
}

pub async fn tweets_by_location(
    store: &dyn DocumentStore,
    term: &str,
) -> Result<Vec<LocationCount>, StoreError> {
    let rows = store.aggregate(&tweets_by_location_stages(term)).await?;
    Ok(rows
        .iter()
        .map(|row| LocationCount {
            place_id: key_label(row),
            count: count_of(row),
        })
        .collect())
}

pub async fn tweets_by_time_of_day(
    store: &dyn DocumentStore,
    term: &str,
) -> Result<Vec<HourCount>, StoreError> {
    let rows = store.aggregate(&tweets_by_time_of_day_stages(term)).await?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let hour = row.get(GROUP_ID).and_then(FieldValue::as_i64)?;
            Some(HourCount {
                hour: u32::try_from(hour).ok()?,
                count: count_of(row),
            })
        })
        .collect())
}

pub async fn user_with_most_tweets(
    store: &dyn DocumentStore,
    term: &str,
) -> Result<Option<UserCount>, StoreError> {
    let rows = store.aggregate(&user_with_most_tweets_stages(term)).await?;
    Ok(rows.first().map(|row| UserCount {
        author_handle: key_label(row),
        count: count_of(row),
    }))
}

pub async fn run_report(
    store: &dyn DocumentStore,
    term: &str,
    kind: ReportKind,
) -> Result<ReportResult, StoreError> {
    let result = match kind {
        ReportKind::TweetsPerDay => ReportResult::TweetsPerDay(tweets_per_day(store, term).await?),
        ReportKind::UniqueUsers => ReportResult::UniqueUsers(unique_users(store, term).await?),
        ReportKind::AverageLikes => ReportResult::AverageLikes(average_likes(store, term).await?),
        ReportKind::TweetsByLocation => {
            ReportResult::TweetsByLocation(tweets_by_location(store, term).await?)
        }
        ReportKind::TweetsByTimeOfDay => {
            ReportResult::TweetsByTimeOfDay(tweets_by_time_of_day(store, term).await?)
        }
        ReportKind::UserWithMostTweets => {
            ReportResult::UserWithMostTweets(user_with_most_tweets(store, term).await?)
        }
    };
    Ok(result)
}

/// Runs the chosen reports in order. An empty `kinds` runs all six.
pub async fn run_reports(
    store: &dyn DocumentStore,
    term: &str,
    kinds: &[ReportKind],
) -> Result<Vec<ReportResult>, StoreError> {
    let kinds: &[ReportKind] = if kinds.is_empty() { &ReportKind::ALL } else { kinds };

    let mut results = Vec::with_capacity(kinds.len());
    for kind in kinds {
        debug!(report = %kind, term, "running report");
        results.push(run_report(store, term, *kind).await?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_names_parse_with_either_separator() {
        assert_eq!("tweets-per-day".parse::<ReportKind>(), Ok(ReportKind::TweetsPerDay));
        assert_eq!(
            " USER_WITH_MOST_TWEETS ".parse::<ReportKind>(),
            Ok(ReportKind::UserWithMostTweets)
        );
        assert!("top_hashtags".parse::<ReportKind>().is_err());
    }

    #[test]
    fn every_report_starts_with_the_term_filter() {
        for kind in ReportKind::ALL {
            let stages = kind.stages("music");
            assert_eq!(stages[0], Stage::text_contains(TEXT_FIELD, "music"), "{kind}");
        }
    }

    #[test]
    fn results_serialize_with_report_tag() {
        let json = serde_json::to_value(ReportResult::AverageLikes(None)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"report": "average_likes", "result": null})
        );
    }
}
