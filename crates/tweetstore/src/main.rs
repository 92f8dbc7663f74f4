use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tweetstore_core::{ingest, open_store, run_reports, AppConfig, ReportKind};

mod render;
mod repl;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Load tweet exports into a document store and report on them",
    long_about = None
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store connection string (memory:// or postgres://...)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Collection (table) holding the tweets
    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean a delimited export and insert it into the collection
    Ingest(IngestArgs),
    /// Run reports for a search term
    Query(QueryArgs),
    /// Prompt for search terms until `exit`
    Repl(ReplArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Delimited source file with a header row
    path: PathBuf,

    /// Drop columns with fewer distinct values than this
    #[arg(long)]
    threshold: Option<usize>,

    /// Print the load report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Case-insensitive text to look for in tweets
    term: String,

    /// Report to run; repeat for several. Defaults to all of them
    #[arg(long = "report", value_name = "KIND")]
    reports: Vec<ReportKind>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ReplArgs {
    /// Load this file before prompting
    #[arg(long)]
    source: Option<PathBuf>,

    /// Distinct-value threshold used when loading `--source`
    #[arg(long)]
    threshold: Option<usize>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let mut config =
        AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(collection) = cli.collection {
        config.collection = collection;
    }

    let store = open_store(&config)
        .await
        .with_context(|| format!("failed to open store at {}", config.database_url))?;

    match cli.command {
        Command::Ingest(args) => {
            if let Some(threshold) = args.threshold {
                config.pipeline.distinct_threshold = threshold;
            }
            let report = ingest(store.as_ref(), &args.path, &config.pipeline)
                .await
                .with_context(|| format!("failed to load {}", args.path.display()))?;
            info!(run_id = %report.run_id, inserted = report.inserted, "ingest complete");
            println!("{}", render::load_report(&report, args.json)?);
        }
        Command::Query(args) => {
            let results = run_reports(store.as_ref(), &args.term, &args.reports)
                .await
                .with_context(|| format!("reports for '{}' failed", args.term))?;
            println!("{}", render::report_results(&args.term, &results, args.json)?);
        }
        Command::Repl(args) => {
            if let Some(path) = &args.source {
                if let Some(threshold) = args.threshold {
                    config.pipeline.distinct_threshold = threshold;
                }
                let report = ingest(store.as_ref(), path, &config.pipeline)
                    .await
                    .with_context(|| format!("failed to load {}", path.display()))?;
                eprintln!("{}", render::load_report(&report, false)?);
            }

            let stdin = io::stdin();
            let stdout = io::stdout();
            repl::run(store.as_ref(), stdin.lock(), stdout.lock(), args.json).await?;
        }
    }

    Ok(())
}
