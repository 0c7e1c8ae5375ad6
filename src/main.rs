// gitpeek command line.
// Prints a user's profile and original repositories with recent commits as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

use gitpeek::cache::{FileStore, KeyValueStore, MemoryStore};
use gitpeek::github::CommitFailure;
use gitpeek::{Aggregator, Config, Profile, Repository, Result};

#[derive(Parser)]
#[command(name = "gitpeek")]
#[command(about = "Show a GitHub user's profile and recent commits", long_about = None)]
struct Cli {
    /// GitHub username to look up
    username: String,

    /// Path to a config.toml (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep the cache in memory for this run only
    #[arg(long)]
    no_cache: bool,

    /// Only fetch the profile
    #[arg(long)]
    profile_only: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct Report {
    profile: Profile,
    #[serde(skip_serializing_if = "Option::is_none")]
    repositories: Option<Vec<Repository>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<CommitFailure>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    gitpeek::logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::info!(
        proxies = config.proxies.len(),
        api_base = %config.api_base,
        "Configuration loaded"
    );

    let kv: Arc<dyn KeyValueStore> = if cli.no_cache {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::open_default()?)
    };
    let aggregator = Aggregator::from_config(&config, kv)?;

    let cancel = aggregator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });

    let now_ms = chrono::Utc::now().timestamp_millis();
    if let Some(limit) = aggregator.rate_limit().filter(|l| l.is_low_at(now_ms)) {
        let reset_at = limit
            .reset_at()
            .map(|dt| dt.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        eprintln!(
            "warning: API rate limit running low ({} calls remaining), resets at {}",
            limit.remaining, reset_at
        );
    }

    let profile = aggregator.fetch_profile(&cli.username).await?;
    let (repositories, failures) = if cli.profile_only {
        (None, Vec::new())
    } else {
        let batch = aggregator.fetch_repositories(&cli.username).await?;
        (Some(batch.repositories), batch.failures)
    };

    let report = Report {
        profile,
        repositories,
        failures,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
