use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sourcescout_backend::{
    adapters::gateway::GatewayClient,
    config::Config,
    output,
    research::{
        collector::Collector, estimator::SalesEstimator, filter::FilterEngine,
        orchestrator::Orchestrator,
    },
};

/// Cross-marketplace resale research runner.
#[derive(Parser, Debug)]
#[command(name = "sourcescout", version, about)]
struct Cli {
    /// Search keyword on the source marketplace.
    keyword: String,

    /// How many search result pages to collect.
    #[arg(long, default_value_t = 3)]
    max_pages: u32,

    /// Path to a TOML config file. Defaults apply when omitted or missing.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the JSON report.
    #[arg(long, default_value = "research_report.json")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    info!(keyword = %cli.keyword, max_pages = cli.max_pages, "starting research run");

    let gateway = Arc::new(GatewayClient::new(&config.gateway)?);

    let collector = Collector::new(gateway.as_ref());
    let listings = collector
        .collect(&cli.keyword, cli.max_pages)
        .await
        .context("collecting source listings")?;

    let estimator = SalesEstimator::new(config.estimator.clone());
    let engine = FilterEngine::new(config.filter.clone(), &estimator);
    let work = engine.filter(&listings);

    let orchestrator = Orchestrator::new(gateway.clone(), gateway.clone(), &config);
    let report = orchestrator.run(&cli.keyword, work).await;

    output::write_report(&cli.output, &report)?;

    info!(
        done = report.done,
        skipped = report.skipped,
        failed = report.failed,
        output = %cli.output.display(),
        "report written"
    );
    // Per-listing failures are recorded in the report, not fatal to the run.
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sourcescout_backend=info,sourcescout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
