//! Operator is a long lived process that runs LoadTest resources as batch Jobs.
#![deny(missing_docs)]
use anyhow::Result;
use clap::{Parser, Subcommand};
use loadtest_common::telemetry::{self, LogFormat};
use tracing::info;

use loadtest_operator::{config, loadtest};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Endpoint receiving OTLP traces and metrics, nothing is exported when unset.
    #[arg(long, env = "LOADTEST_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Format of the log lines.
    #[arg(long, env = "LOADTEST_LOG_FORMAT", value_enum, default_value_t)]
    log_format: LogFormat,
}

/// Available Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daemon operator process
    Daemon(config::Opts),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let meter_provider =
        telemetry::init("loadtest-operator", args.otlp_endpoint.clone(), args.log_format).await?;

    info!(?args.command, ?args.otlp_endpoint, "starting operator");
    match args.command {
        Command::Daemon(opts) => loadtest::run(opts.into()).await?,
    };

    // Flush traces and metrics before shutdown
    telemetry::shutdown(meter_provider);
    Ok(())
}
