//! EnMS voice daemon
//!
//! Turns spoken-style factory questions into validated intents. Reads one
//! utterance per line on stdin and prints what each one resolved to.

use anyhow::{Context, Result};
use clap::Parser;
use enmsd::config::Config;
use enmsd::generative::OllamaIntentModel;
use enmsd::roster::HttpRosterSupplier;
use enmsd::{Pipeline, TurnOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "enmsd")]
#[command(about = "EnMS voice intent daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Config file (default: /etc/enms/voice.toml)
    #[arg(long)]
    config: Option<String>,

    /// Session id for this console
    #[arg(long, default_value = "cli")]
    session: String,

    /// Seed machine names, comma separated
    #[arg(long, value_delimiter = ',')]
    machines: Vec<String>,

    /// Print outcomes as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("enmsd v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if !args.machines.is_empty() {
        config.roster.seed_machines = args.machines.clone();
    }

    let model = OllamaIntentModel::new(&config.llm).context("building model client")?;
    let pipeline = Arc::new(Pipeline::new(&config, Arc::new(model)).context("building pipeline")?);
    if pipeline.prewarm().is_some() {
        info!("Pre-warming {}", config.llm.model);
    }

    let roster = HttpRosterSupplier::new(&config.roster).context("building roster client")?;
    spawn_whitelist_refresh(Arc::clone(&pipeline), roster, config.scheduler.whitelist_refresh_secs);
    spawn_session_cleanup(Arc::clone(&pipeline), config.scheduler.session_cleanup_secs);

    info!("enmsd ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let utterance = line.trim();
                if utterance.is_empty() {
                    continue;
                }
                let outcome = pipeline.handle(&args.session, utterance).await;
                print_outcome(&outcome, args.json)?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down gracefully");
    Ok(())
}

fn spawn_whitelist_refresh(pipeline: Arc<Pipeline>, roster: HttpRosterSupplier, secs: u64) {
    tokio::spawn(async move {
        // First tick fires immediately, replacing the seed list
        let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
        loop {
            ticker.tick().await;
            pipeline.refresh_whitelist(&roster).await;
        }
    });
}

fn spawn_session_cleanup(pipeline: Arc<Pipeline>, secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            pipeline.cleanup_sessions();
        }
    });
}

fn print_outcome(outcome: &TurnOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(outcome)?);
        return Ok(());
    }
    match outcome {
        TurnOutcome::Ready(intent) => {
            let target = intent
                .machine
                .clone()
                .or_else(|| intent.machines.as_ref().map(|m| m.join(", ")))
                .unwrap_or_else(|| "factory".to_string());
            let when = intent
                .time_range
                .as_ref()
                .map(|t| t.relative.as_str())
                .unwrap_or("-");
            println!(
                "{} [{}] metric={} time={} ({:.2})",
                intent.kind,
                target,
                intent.metric.as_deref().unwrap_or("-"),
                when,
                intent.confidence
            );
        }
        TurnOutcome::Clarification(request) => println!("? {}", request.prompt),
        TurnOutcome::Rejected { message, errors, .. } => {
            warn!("Rejected: {}", errors.join("; "));
            println!("{}", message);
        }
        TurnOutcome::Cancelled => println!("OK, never mind."),
    }
    Ok(())
}
