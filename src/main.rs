//! Traffic Classification Agent for Zentinel
//!
//! Replays recorded requests through the classifier and prints the labels
//! and headers the proxy would attach.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_agent_traffic_classifier::replay::Replayer;
use zentinel_agent_traffic_classifier::ClassifierConfig;

#[derive(Parser, Debug)]
#[command(name = "zentinel-traffic-classifier")]
#[command(author, version, about = "Bot traffic classification engine for Zentinel")]
struct Args {
    /// Path to configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines request log to replay (stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(json: bool, level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    // Outcomes go to stdout, logs to stderr
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn load_config(path: &Path) -> Result<ClassifierConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;

    let config = if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, &args.log_level);

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ClassifierConfig::default(),
    };
    config.validate().context("invalid configuration")?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let replayer = Replayer::new(&config);
    let stdout = io::stdout().lock();

    let summary = match &args.input {
        Some(path) => {
            info!(input = %path.display(), "Replaying request log");
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            replayer.run(BufReader::new(file), stdout)?
        }
        None => {
            info!("Replaying request log from stdin");
            replayer.run(io::stdin().lock(), stdout)?
        }
    };

    info!(
        requests = summary.requests,
        flagged = summary.flagged,
        by_label = ?summary.by_label,
        "Replay complete"
    );

    Ok(())
}
