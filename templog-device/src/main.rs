//! templog-device - main entry point
//!
//! Exit status: 0 after a graceful shutdown, 1 on any fatal error
//! (bad config, sensor open/read failure, sink unreachable at startup).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use templog_common::config::{load_config, TomlConfig};
use templog_common::logging::{bootstrap_subscriber, init_tracing};
use templog_device::build_orchestrator;
use templog_device::shutdown::install_shutdown_handler;
use tracing::{error, info};

/// Command-line arguments for templog-device
#[derive(Parser, Debug)]
#[command(name = "templog-device")]
#[command(about = "Samples a BME280 sensor and the Met Office feed, storing and publishing readings")]
#[command(version)]
struct Args {
    /// Config file (overrides TEMPLOG_CONFIG and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // The configured level is not known yet; log the load itself to stderr
    let loaded = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        load_config(args.config.as_deref()).inspect_err(|e| {
            error!("Failed to load configuration: {}", e);
        })
    });
    let Ok(config) = loaded else {
        return ExitCode::FAILURE;
    };

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting templog-device v{}", env!("CARGO_PKG_VERSION"));

    match run(&config, args.once).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Device stopping: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &TomlConfig, once: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config)
        .await
        .context("Device initialisation failed")?;

    if once {
        let report = orchestrator.run_once().await?;
        info!(?report, "Single cycle complete");
        return Ok(());
    }

    let shutdown = install_shutdown_handler();
    let cycles = orchestrator.run(shutdown).await?;
    info!("Device stopped cleanly after {} cycles", cycles);
    Ok(())
}
