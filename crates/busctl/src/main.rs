use anyhow::Context;
use busctl::cli::{Cli, Commands};
use busctl::commands::{cleanup, inspect, monitor, publish};
use busctl::config::BusctlConfig;
use busctl::metrics::BusMetrics;
use clap::Parser;
use common::TelemetryGuard;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = BusctlConfig::from_env()?.with_shm_dir(cli.shm_dir.clone());

    // The OTLP exporters need a Tokio runtime that outlives the guard.
    let (_telemetry, _runtime) = if let Some(endpoint) = config.otel_endpoint.as_ref() {
        let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
        let guard =
            rt.block_on(async { TelemetryGuard::init("busctl", endpoint, config.environment) })?;
        (Some(guard), Some(rt))
    } else {
        common::setup_logging(config.environment);
        (None, None)
    };

    tracing::debug!(config = ?config, "Loaded configuration");

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;

    let metrics = BusMetrics::new();

    match &cli.command {
        Commands::Publish(args) => {
            publish::run(&config.bus, args, &shutdown, &metrics)?;
        }
        Commands::Monitor(args) => {
            let stats = monitor::run(&config.bus, args, &shutdown, &metrics)?;
            println!(
                "{}: {} polls, {} changed, {} same, {} empty",
                args.name,
                stats.polls(),
                stats.changed,
                stats.same,
                stats.empty
            );
        }
        Commands::Inspect(args) => {
            let lines = inspect::run(&config.bus, args)?;
            if lines.is_empty() {
                println!("No buffers in {}", config.bus.shm_dir.display());
            }
            for line in lines {
                println!("{line}");
            }
        }
        Commands::Cleanup(args) => {
            let removed = cleanup::run(&config.bus, args)?;
            println!("Removed {removed} buffer(s)");
        }
    }

    Ok(())
}
