#![allow(missing_docs)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use review_sentinel_lib::application::SessionOrchestrator;
use review_sentinel_lib::domain::SessionStatus;
use review_sentinel_lib::infrastructure::logging::{init_logging_with_config, log_system_info};
use review_sentinel_lib::infrastructure::text_analyzer::TextAnalyzer;
use review_sentinel_lib::infrastructure::{AppConfig, HeuristicAnalyzer, HttpTextAnalyzer, SnapshotPageFactory, SnapshotSite};

#[derive(Debug, Parser)]
#[command(name = "review-sentinel", version, about = "Collect listing reviews and score how far they can be trusted")]
struct Cli {
    /// Configuration file; defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a full analysis session against saved HTML snapshots
    Analyze {
        /// Listing URL the snapshots were taken from
        #[arg(long)]
        url: String,

        /// Snapshot files, in the order scrolling reveals them
        #[arg(long = "snapshot", required = true, num_args = 1..)]
        snapshots: Vec<PathBuf>,

        /// Print the whole status view instead of just the report
        #[arg(long)]
        full: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Config => {
            let mut shown = config;
            if shown.analysis.api_key.is_some() {
                shown.analysis.api_key = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(())
        }
        Command::Analyze { url, snapshots, full } => {
            init_logging_with_config(&config.logging)?;
            log_system_info();
            analyze(config, &url, &snapshots, full).await
        }
    }
}

async fn analyze(config: AppConfig, url: &str, snapshots: &[PathBuf], full: bool) -> Result<()> {
    let mut stages = Vec::with_capacity(snapshots.len());
    for path in snapshots {
        let html = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        stages.push(html);
    }
    info!("📂 Loaded {} snapshot stages for {}", stages.len(), url);

    let analyzer: Arc<dyn TextAnalyzer> = if config.analysis.endpoint.is_some() {
        Arc::new(HttpTextAnalyzer::new(&config.analysis)?)
    } else {
        warn!("No analysis endpoint configured, using the local heuristic analyzer");
        Arc::new(HeuristicAnalyzer::new())
    };

    // scraping ends within one session deadline; the second covers analysis
    let wait = config.collection.session_timeout() * 2;
    let factory = Arc::new(SnapshotPageFactory::new(SnapshotSite::new(stages)));
    let orchestrator = SessionOrchestrator::new(config, factory, analyzer);

    let session_id = orchestrator.start_analysis(url).await;
    let status = orchestrator
        .wait_for_terminal(&session_id, wait.max(Duration::from_secs(60)))
        .await?;

    if full {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else if let Some(report) = &status.results {
        println!("{}", serde_json::to_string_pretty(report)?);
    }

    if status.status == SessionStatus::Error {
        let message = status.error.map(|e| e.user_message).unwrap_or_default();
        bail!("Analysis failed: {message}");
    }
    Ok(())
}
