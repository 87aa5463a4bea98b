use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ollama_client::OllamaClient;
use threatdesk_analyst::run::{Pipeline, RunParams, RunReport};
use threatdesk_analyst::scraper::FeedScraper;
use threatdesk_common::Config;
use threatdesk_store::Store;

/// Score, rank, and risk-analyze scraped security news with a local LLM.
#[derive(Parser, Debug)]
#[command(name = "threatdesk-analyst")]
struct Args {
    /// Analyze candidates scraped within the last N hours
    #[arg(long, default_value_t = 24)]
    hours: i64,

    /// Number of top items to select for deep analysis
    #[arg(long = "top-n", default_value_t = 10)]
    top_n: usize,

    /// Concurrent reasoner calls
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Maximum number of candidates to score (default: all eligible)
    #[arg(long)]
    limit: Option<u32>,

    /// Model identifier passed to the reasoner (default from THREATDESK_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Scrape security feeds before analyzing
    #[arg(long)]
    scrape: bool,

    /// Abort instead of analyzing stale data when scraping fails
    #[arg(long)]
    require_fresh: bool,

    /// Print the selection rationale
    #[arg(long)]
    show_reasoning: bool,

    /// Print the full analysis for each selected item
    #[arg(long)]
    show_details: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("threatdesk_analyst=info".parse()?)
                .add_directive("threatdesk_store=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    let model = args.model.clone().unwrap_or_else(|| config.model.clone());

    info!(model = model.as_str(), hours = args.hours, top_n = args.top_n, "Threatdesk analyst starting");

    let store = Store::connect(&config.database_url).await?;
    store.migrate().await?;

    let total = store.count_all().await?;
    let unprocessed = store.count_unprocessed().await?;
    info!(total, unprocessed, "Store status");

    let reasoner = Arc::new(OllamaClient::new().with_base_url(&config.ollama_url));
    let params = RunParams {
        lookback_hours: args.hours,
        top_n: args.top_n,
        workers: args.workers,
        limit: args.limit,
        model,
        scrape_first: args.scrape,
        require_fresh: args.require_fresh,
        ..RunParams::default()
    };

    let mut pipeline = Pipeline::new(store.clone(), reasoner, params);
    if args.scrape {
        pipeline = pipeline.with_scraper(Arc::new(FeedScraper::new(store)));
    }

    // Precondition failures (lock held, store unreachable, scrape
    // required but failed) surface here as a non-zero exit.
    let report = pipeline.run().await?;

    print!("{}", report.stats);
    if args.show_reasoning && !report.rationale.is_empty() {
        println!("\n--- Selection rationale ---\n{}", report.rationale);
    }
    if args.show_details {
        print_details(&report);
    }

    Ok(())
}

fn print_details(report: &RunReport) {
    let total = report.items.len();
    for (rank, item) in report.items.iter().enumerate() {
        let analysis = &item.analysis;
        println!(
            "\n[{}/{}] {} (risk {}/10, priority {})",
            rank + 1,
            total,
            analysis.risk_level.as_str().to_uppercase(),
            analysis.risk_score,
            analysis.priority
        );
        println!("  {}", item.candidate.title);
        println!("  {}", item.candidate.url);
        if !analysis.analysis_succeeded {
            println!("  (analysis incomplete; will retry next run)");
            continue;
        }
        if !analysis.executive_summary.is_empty() {
            println!("\n  {}", analysis.executive_summary);
        }
        if !analysis.affected_systems.is_empty() {
            println!("\n  Affected systems:");
            for system in &analysis.affected_systems {
                println!("    - {system}");
            }
        }
        if !analysis.immediate_actions.is_empty() {
            println!("\n  Immediate actions:");
            for action in &analysis.immediate_actions {
                println!("    - {action}");
            }
        }
        if !analysis.long_term_recommendations.is_empty() {
            println!("\n  Long-term recommendations:");
            for rec in &analysis.long_term_recommendations {
                println!("    - {rec}");
            }
        }
        if !analysis.risk_reasoning.is_empty() {
            println!("\n  Risk reasoning: {}", analysis.risk_reasoning);
        }
    }
}
