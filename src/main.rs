// src/main.rs

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use longstanding::{
    config::{Config, Overrides},
    notify::transport,
    pipeline::Pipeline,
};

/// Rebuild the longstanding-container master dataset from the weekly report
/// folder and email the outcome.
#[derive(Parser, Debug)]
#[command(name = "longstanding", version, about)]
struct Cli {
    /// YAML configuration file [default: longstanding.yaml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder scanned for report files
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Where the master dataset is published
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Notification recipient; repeat for several. Replaces the configured list.
    #[arg(long = "recipient", value_name = "ADDR")]
    recipients: Vec<String>,

    /// Only read these week folders, e.g. `26-28,30`
    #[arg(long)]
    weeks: Option<String>,
}

fn setup(cli: Cli) -> Result<Pipeline> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(Overrides {
        source_dir: cli.source_dir,
        output: cli.output,
        recipients: cli.recipients,
        weeks: cli.weeks,
    });
    config.validate().context("invalid configuration")?;

    let transport =
        transport::from_config(&config.notify.transport).context("building mail transport")?;
    Pipeline::new(config, transport)
}

fn main() {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) config + wiring ──────────────────────────────────────────
    let pipeline = match setup(Cli::parse()) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %format!("{:#}", e), "startup failed");
            exit(1);
        }
    };

    // ─── 3) one run ──────────────────────────────────────────────────
    let report = pipeline.run(Utc::now());
    let code = report.exit_code();
    info!(
        exit_code = code,
        rows = report.result.rows_written,
        rejected = report.result.rejections.len(),
        notified = report.notification.is_ok(),
        "done"
    );
    exit(code);
}
