use anyhow::Result;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};
use serde::Serialize;
use tweetstore_core::cleaning::DropReason;
use tweetstore_core::{LoadReport, ReportResult};

const NO_MATCHES: &str = "(no matching tweets)";

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().map(Cell::new));
    table
}

pub fn load_report(report: &LoadReport, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(report)?);
    }

    let mut summary = table(&["Load", ""]);
    summary
        .add_row(vec!["run id".to_string(), report.run_id.to_string()])
        .add_row(vec!["source".to_string(), report.source.clone()])
        .add_row(vec!["blake3".to_string(), report.source_hash.clone()])
        .add_row(vec!["rows read".to_string(), report.rows_read.to_string()])
        .add_row(vec!["inserted".to_string(), report.inserted.to_string()])
        .add_row(vec!["failed".to_string(), report.failed().to_string()])
        .add_row(vec!["columns kept".to_string(), report.columns_kept.join(", ")])
        .add_row(vec![
            "indexes".to_string(),
            report
                .indexes
                .iter()
                .map(|index| index.name())
                .collect::<Vec<_>>()
                .join(", "),
        ]);

    let mut out = summary.to_string();

    if !report.columns_dropped.is_empty() {
        let mut dropped = table(&["Dropped column", "Reason"]);
        for column in &report.columns_dropped {
            let reason = match &column.reason {
                DropReason::Empty => "empty".to_string(),
                DropReason::LowCardinality { distinct } => {
                    format!("{distinct} distinct value(s)")
                }
            };
            dropped.add_row(vec![column.name.clone(), reason]);
        }
        out.push('\n');
        out.push_str(&dropped.to_string());
    }

    if !report.failures.is_empty() {
        let mut failures = table(&["Row", "Insert error"]);
        for failure in &report.failures {
            failures.add_row(vec![failure.index.to_string(), failure.message.clone()]);
        }
        out.push('\n');
        out.push_str(&failures.to_string());
    }

    Ok(out)
}

#[derive(Serialize)]
struct QueryOutput<'a> {
    term: &'a str,
    results: &'a [ReportResult],
}

pub fn report_results(term: &str, results: &[ReportResult], json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(&QueryOutput { term, results })?);
    }

    let sections: Vec<String> = results
        .iter()
        .map(|result| format!("{}\n{}", result.kind().title(), report_body(result)))
        .collect();
    Ok(sections.join("\n\n"))
}

fn report_body(result: &ReportResult) -> String {
    match result {
        ReportResult::TweetsPerDay(days) if days.is_empty() => NO_MATCHES.to_string(),
        ReportResult::TweetsPerDay(days) => {
            let mut out = table(&["Day", "Tweets"]);
            for day in days {
                out.add_row(vec![day.day.clone(), day.count.to_string()]);
            }
            out.to_string()
        }
        ReportResult::UniqueUsers(count) => count.to_string(),
        ReportResult::AverageLikes(Some(average)) => format!("{average:.2}"),
        ReportResult::AverageLikes(None) => NO_MATCHES.to_string(),
        ReportResult::TweetsByLocation(places) if places.is_empty() => NO_MATCHES.to_string(),
        ReportResult::TweetsByLocation(places) => {
            let mut out = table(&["Place", "Tweets"]);
            for place in places {
                let label = place.place_id.as_deref().unwrap_or("(none)");
                out.add_row(vec![label.to_string(), place.count.to_string()]);
            }
            out.to_string()
        }
        ReportResult::TweetsByTimeOfDay(hours) if hours.is_empty() => NO_MATCHES.to_string(),
        ReportResult::TweetsByTimeOfDay(hours) => {
            let mut out = table(&["Hour (UTC)", "Tweets"]);
            for bucket in hours {
                out.add_row(vec![format!("{:02}:00", bucket.hour), bucket.count.to_string()]);
            }
            out.to_string()
        }
        ReportResult::UserWithMostTweets(None) => NO_MATCHES.to_string(),
        ReportResult::UserWithMostTweets(Some(user)) => {
            let mut out = table(&["Author", "Tweets"]);
            let handle = user.author_handle.as_deref().unwrap_or("(unknown)");
            out.add_row(vec![handle.to_string(), user.count.to_string()]);
            out.to_string()
        }
    }
}
