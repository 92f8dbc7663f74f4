use std::io::{BufRead, Write};

use anyhow::Result;
use tweetstore_core::{run_reports, DocumentStore};

use crate::render;

pub const PROMPT: &str = "Enter a term to search for in tweets (or 'exit' to quit): ";

/// Prompts for terms and prints every report for each one. Stops on `exit` (any
/// case) or end of input. A failed query is reported and the loop continues.
///
/// Only the line ending is stripped: surrounding spaces are part of the term and
/// an empty line matches every tweet.
pub async fn run<R, W>(
    store: &dyn DocumentStore,
    mut input: R,
    mut output: W,
    json: bool,
) -> Result<()>
where
    R: BufRead,
    W: Write,
{
    let mut line = String::new();
    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            break;
        }

        let term = line.trim_end_matches(['\n', '\r']);
        if term.to_lowercase() == "exit" {
            break;
        }

        match run_reports(store, term, &[]).await {
            Ok(results) => {
                writeln!(output, "{}", render::report_results(term, &results, json)?)?
            }
            Err(err) => writeln!(output, "query failed: {err}")?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tweetstore_core::{ingest_bytes, MemoryStore, PipelineConfig};

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        let source = b"id\tauthor_handle\ttext\tcreated_at\tlike_count\n\
1\tbritney\tI love music\t2021-02-01 10:00:00\t4\n\
2\tfan\tno match here\t2021-02-01 11:00:00\t1\n";
        let config = PipelineConfig::default().with_distinct_threshold(1);
        ingest_bytes(&store, "inline", source, &config).await.unwrap();
        store
    }

    #[tokio::test]
    async fn loops_until_exit() {
        let store = store().await;
        let mut output = Vec::new();

        run(&store, "music\r\nEXIT\nmusic\n".as_bytes(), &mut output, false)
            .await
            .unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert_eq!(printed.matches(PROMPT).count(), 2);
        assert_eq!(printed.matches("Tweets per day").count(), 1);
        assert!(printed.contains("britney"));
    }

    #[tokio::test]
    async fn blank_line_matches_every_tweet() {
        let store = store().await;
        let mut output = Vec::new();

        run(&store, "\nexit\n".as_bytes(), &mut output, true).await.unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("\"term\": \"\""));
        assert!(printed.contains("\"day\": \"2021-02-01\""));
        assert!(printed.contains("\"count\": 2"));
    }

    #[tokio::test]
    async fn surrounding_spaces_stay_in_the_term() {
        let store = store().await;
        let mut output = Vec::new();

        run(&store, " exit \nexit\n".as_bytes(), &mut output, true).await.unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert_eq!(printed.matches(PROMPT).count(), 2);
        assert!(printed.contains("\"term\": \" exit \""));
    }

    #[tokio::test]
    async fn stops_at_end_of_input() {
        let store = store().await;
        let mut output = Vec::new();

        run(&store, "music".as_bytes(), &mut output, true).await.unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("\"report\": \"average_likes\""));
        assert_eq!(printed.matches(PROMPT).count(), 2);
    }
}
