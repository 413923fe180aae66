use anyhow::Context;
use clap::{Parser, Subcommand};
use reddit_intel::{
    Config, FileLedger, OpenAiCompatibleGateway, Pipeline, RateLimitedFetcher, RunSummary, UsageLedger,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reddit-intel")]
#[command(about = "Scrape Reddit communities and distill them into running insight reports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML configuration
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a focus area, then analyze and merge into its report
    Scan {
        /// Focus area id (defaults to `default_focus`)
        focus: Option<String>,
    },

    /// Analyze the latest stored corpus without scraping again
    Analyze {
        /// Focus area id (defaults to `default_focus`)
        focus: Option<String>,
    },

    /// List configured focus areas
    List,

    /// Show cumulative token usage
    Usage,

    /// Zero the usage ledger
    ResetUsage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let ledger: Arc<dyn UsageLedger> = Arc::new(FileLedger::new(config.paths.usage_file()));

    match cli.command {
        Commands::Scan { focus } => {
            let fetcher = RateLimitedFetcher::new(config.scraper.clone())?;
            let pipeline = Pipeline::new(config, Arc::new(OpenAiCompatibleGateway::new()), ledger);
            let summary = tokio::select! {
                result = pipeline.scan(&fetcher, focus.as_deref()) => result?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted; the report was left unchanged");
                    std::process::exit(130);
                }
            };
            print_summary(&summary, cli.json)?;
        }
        Commands::Analyze { focus } => {
            let pipeline = Pipeline::new(config, Arc::new(OpenAiCompatibleGateway::new()), ledger);
            let summary = tokio::select! {
                result = pipeline.analyze_latest(focus.as_deref()) => result?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted; the report was left unchanged");
                    std::process::exit(130);
                }
            };
            print_summary(&summary, cli.json)?;
        }
        Commands::List => {
            let areas = config.focus_areas();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&areas)?);
            } else {
                for area in areas {
                    let marker = if config.default_focus.as_deref() == Some(area.id.as_str()) { "*" } else { " " };
                    println!(
                        "{} {:<20} {:<14} {} ({})",
                        marker,
                        area.id,
                        area.mode.as_str(),
                        area.name,
                        area.communities.join(", ")
                    );
                }
            }
        }
        Commands::Usage => {
            let snapshot = ledger.snapshot().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                let t = snapshot.totals;
                println!("Requests:          {}", t.requests);
                println!("Prompt tokens:     {}", t.prompt_tokens);
                println!("Completion tokens: {}", t.completion_tokens);
                println!("Total tokens:      {}", t.total_tokens);
                if let Some(last) = snapshot.requests.front() {
                    println!(
                        "Last call:         {} {} ({} tokens, {} ms)",
                        last.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        last.model,
                        last.total_tokens,
                        last.latency_ms
                    );
                }
            }
        }
        Commands::ResetUsage => {
            ledger.reset().await?;
            info!("Usage ledger reset");
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("Focus area:      {}", summary.focus_area);
    println!("Items analyzed:  {}", summary.items_analyzed);
    println!("Batches:         {} ({} failed)", summary.batches, summary.failed_batches);
    if summary.skipped_requests > 0 {
        println!("Skipped fetches: {}", summary.skipped_requests);
    }
    println!("New records:     {}", summary.new_records);
    println!("Updated records: {}", summary.updated_records);
    if summary.new_secondary > 0 {
        println!("New findings:    {}", summary.new_secondary);
    }
    println!("Total records:   {}", summary.total_records);
    println!("Report:          {}", summary.report_path.display());
    if let Some(path) = &summary.corpus_path {
        println!("Corpus:          {}", path.display());
    }
    Ok(())
}
