mod cli;
mod config;
mod workload;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lanes_scheduler::{Host, Scheduler};
use tracing::info;

use crate::cli::CliArgs;
use crate::workload::WorkloadPlan;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    lanes_core::load_dotenv();
    let args = CliArgs::parse();

    let config = config::load(args.config.as_deref()).context("failed to load configuration")?;

    // Handle --print-config
    if args.print_config {
        print_json(&config, args.pretty)?;
        return Ok(());
    }

    config.log_summary();

    let host = Host::tokio(&config).context("failed to install tokio host")?;
    let scheduler = Scheduler::new(config.clone(), host).context("failed to start scheduler")?;

    let plan = WorkloadPlan {
        lane: args.lane,
        tasks: args.tasks,
        delay: Duration::from_millis(args.delay_ms),
        defer_every: args.defer_every,
        fail_every: args.fail_every,
        persistent_runs: args.persistent_runs,
    };
    let report = workload::run(&scheduler, &plan).await?;
    let stats = scheduler.stats();

    print_json(
        &serde_json::json!({
            "config": config,
            "report": report,
            "stats": stats,
        }),
        args.pretty,
    )?;

    scheduler.dispose();
    info!("Scheduler disposed");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}
