//! CLI entry point for scope_daq
//!
//! Acquires waveforms from a Rigol MSO5000 and reports timing statistics.
//!
//! # Usage
//!
//! Acquire 100 waveforms and dump the raw samples:
//! ```bash
//! scope_daq 192.168.1.50 5555 -n 100 -f capture.bin
//! ```
//!
//! Run against the simulated instrument:
//! ```bash
//! scope_daq --mock -n 10
//! ```
//!
//! Press Ctrl+C to stop early; the summary is still printed.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use daq_driver_rigol::mock::MockScopeConfig;
use scope_daq::config::{AppConfig, Overrides, DEFAULT_CONFIG_PATH};
use scope_daq::logging::{self, OutputFormat};
use scope_daq::runner::{self, RunOutcome};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "scope_daq")]
#[command(about = "Waveform acquisition test client for Rigol MSO5000 oscilloscopes", long_about = None)]
struct Cli {
    /// Instrument host name or address
    host: Option<String>,

    /// Instrument SCPI port
    port: Option<u16>,

    /// Number of waveforms to acquire (runs until Ctrl+C when omitted)
    #[arg(short = 'n', long = "count")]
    count: Option<u64>,

    /// Append raw payload bytes to this file
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<OutputFormat>,

    /// Attempts per channel per waveform
    #[arg(long)]
    retry_budget: Option<u32>,

    /// Use the built-in simulated instrument instead of a network connection
    #[arg(long)]
    mock: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json_summary: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?
        .with_overrides(Overrides {
            host: cli.host,
            port: cli.port,
            waveform_limit: cli.count,
            raw_dump: cli.file,
            retry_budget: cli.retry_budget,
            log_level: cli.log_level,
            log_format: cli.log_format,
        });
    config.validate().context("Invalid configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    logging::init_from_config(&config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C pressed, stopping acquisition");
                on_interrupt.cancel();
            }
            Err(err) => tracing::warn!(error = %err, "Failed to install Ctrl+C handler"),
        }
    });

    let outcome = if cli.mock {
        runner::run_mock(&config, MockScopeConfig::default(), cancel).await
    } else {
        runner::connect_and_run(&config, cancel).await
    }
    .context("Acquisition failed")?;

    print_outcome(&outcome, cli.json_summary)?;
    Ok(())
}

fn print_outcome(outcome: &RunOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    if let Some(identity) = &outcome.identity {
        println!("Instrument: {identity}");
    }
    println!("Stopped: {:?}", outcome.reason);
    println!("{}", outcome.summary);
    Ok(())
}
