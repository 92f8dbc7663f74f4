use std::path::PathBuf;

use tweetstore_core::config::PipelineConfig;
use tweetstore_core::ingestion::ingest;
use tweetstore_core::reports::{
    average_likes, run_reports, tweets_by_location, tweets_by_time_of_day, tweets_per_day,
    unique_users, user_with_most_tweets, DayCount, HourCount, LocationCount, ReportKind,
    ReportResult, UserCount,
};
use tweetstore_core::store::MemoryStore;

async fn loaded_store() -> MemoryStore {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/tweets_sample.tsv");
    let store = MemoryStore::new();
    let config = PipelineConfig::default().with_distinct_threshold(2);
    ingest(&store, &path, &config).await.expect("fixture should load");
    store
}

fn day(day: &str, count: u64) -> DayCount {
    DayCount {
        day: day.to_string(),
        count,
    }
}

#[tokio::test]
async fn tweets_per_day_counts_sum_to_matches() {
    let store = loaded_store().await;
    let days = tweets_per_day(&store, "music").await.unwrap();

    assert_eq!(
        days,
        vec![day("2021-02-01", 2), day("2021-02-02", 1), day("2021-02-03", 1)]
    );
    assert_eq!(days.iter().map(|d| d.count).sum::<u64>(), 4);
}

#[tokio::test]
async fn sentinel_dates_form_their_own_day() {
    let store = loaded_store().await;
    let days = tweets_per_day(&store, "britney").await.unwrap();

    assert_eq!(days, vec![day("1981-12-02", 1)]);
}

#[tokio::test]
async fn time_of_day_is_grouped_by_hour_ascending() {
    let store = loaded_store().await;
    let hours = tweets_by_time_of_day(&store, "music").await.unwrap();

    assert_eq!(
        hours,
        vec![HourCount { hour: 10, count: 3 }, HourCount { hour: 11, count: 1 }]
    );

    let all = tweets_by_time_of_day(&store, "").await.unwrap();
    assert!(all.windows(2).all(|pair| pair[0].hour < pair[1].hour));
    assert!(all.iter().all(|bucket| bucket.hour < 24));
}

#[tokio::test]
async fn unique_users_counts_distinct_authors() {
    let store = loaded_store().await;

    assert_eq!(unique_users(&store, "music").await.unwrap(), 3);
    assert_eq!(unique_users(&store, "zzz_no_match").await.unwrap(), 0);
}

#[tokio::test]
async fn average_likes_is_none_without_matches() {
    let store = loaded_store().await;

    let average = average_likes(&store, "music").await.unwrap().unwrap();
    assert!((average - 9.25).abs() < 1e-9);
    assert_eq!(average_likes(&store, "zzz_no_match").await.unwrap(), None);
}

#[tokio::test]
async fn locations_are_sorted_by_count() {
    let store = loaded_store().await;
    let locations = tweets_by_location(&store, "music").await.unwrap();

    assert_eq!(
        locations,
        vec![
            LocationCount {
                place_id: Some("p1".into()),
                count: 3
            },
            LocationCount {
                place_id: Some("p2".into()),
                count: 1
            },
        ]
    );
}

#[tokio::test]
async fn tweets_without_place_group_under_none() {
    let store = loaded_store().await;
    let locations = tweets_by_location(&store, "pop").await.unwrap();

    assert_eq!(
        locations,
        vec![LocationCount {
            place_id: None,
            count: 1
        }]
    );
}

#[tokio::test]
async fn top_user_is_the_busiest_author() {
    let store = loaded_store().await;

    assert_eq!(
        user_with_most_tweets(&store, "MUSIC").await.unwrap(),
        Some(UserCount {
            author_handle: Some("britney".into()),
            count: 2
        })
    );
    assert_eq!(user_with_most_tweets(&store, "zzz_no_match").await.unwrap(), None);
}

#[tokio::test]
async fn term_metacharacters_are_literal() {
    let store = loaded_store().await;

    assert_eq!(unique_users(&store, "(live)").await.unwrap(), 1);
    assert_eq!(unique_users(&store, "mus.c").await.unwrap(), 0);
    assert_eq!(unique_users(&store, ".*").await.unwrap(), 0);
}

#[tokio::test]
async fn run_reports_defaults_to_all_six_in_order() {
    let store = loaded_store().await;
    let results = run_reports(&store, "music", &[]).await.unwrap();

    let kinds: Vec<ReportKind> = results.iter().map(ReportResult::kind).collect();
    assert_eq!(kinds, ReportKind::ALL.to_vec());
    assert_eq!(results[1], ReportResult::UniqueUsers(3));
}

#[tokio::test]
async fn run_reports_honours_a_subset() {
    let store = loaded_store().await;
    let results = run_reports(
        &store,
        "zzz_no_match",
        &[ReportKind::AverageLikes, ReportKind::TweetsPerDay],
    )
    .await
    .unwrap();

    assert_eq!(
        results,
        vec![
            ReportResult::AverageLikes(None),
            ReportResult::TweetsPerDay(Vec::new())
        ]
    );
}
