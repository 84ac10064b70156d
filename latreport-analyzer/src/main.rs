use anyhow::Context;
use clap::Parser;
use latreport_analyzer::config::Cli;
use latreport_analyzer::{QuantileDigest, ReportConfig, ReportOrchestrator, RunOutcome, SampleDecoder};
use latreport_client::{ClientConfig, HttpLogFetcher, RateLimiter};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit codes: 0 report printed, 1 run aborted, 2 invalid configuration.
const EXIT_RUN_FAILED: i32 = 1;
const EXIT_BAD_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config().unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {e}");
        process::exit(EXIT_BAD_CONFIG);
    });

    let mut orchestrator = build_orchestrator(&config).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {e:#}");
        process::exit(EXIT_BAD_CONFIG);
    });

    let sources = config.resolve_sources(chrono::Utc::now().timestamp_millis());
    let outcome = orchestrator.run(&sources).await.unwrap_or_else(|e| {
        eprintln!("Latency report failed: {e}");
        process::exit(EXIT_RUN_FAILED);
    });

    if let Err(e) = print_report(&config, &outcome) {
        eprintln!("Could not render report: {e:#}");
        process::exit(EXIT_RUN_FAILED);
    }
}

fn build_orchestrator(config: &ReportConfig) -> anyhow::Result<ReportOrchestrator<HttpLogFetcher>> {
    let fetcher = HttpLogFetcher::new(ClientConfig {
        api_token: config.api_token.clone(),
        page_limit: config.page_limit,
        ..ClientConfig::new(config.endpoint.clone())
    })
    .context("building log-query client")?;

    let decoder = if config.accept_delimited { SampleDecoder::default() } else { SampleDecoder::strict() };
    let template = QuantileDigest::new(config.compression).context("building quantile digest")?;
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_sec));

    Ok(ReportOrchestrator::new(fetcher, limiter, decoder, template)
        .with_scan_mode(config.scan_mode)
        .with_deadline(config.deadline))
}

fn print_report(config: &ReportConfig, outcome: &RunOutcome) -> anyhow::Result<()> {
    for source in outcome.stats.abandoned_sources() {
        if let Some(err) = &source.abandoned {
            eprintln!("WARNING: partial report, {err}");
        }
    }

    let rendered = outcome.report.render(config.format).context("serializing report")?;
    print!("{rendered}");
    if !rendered.ends_with('\n') {
        println!();
    }
    Ok(())
}
