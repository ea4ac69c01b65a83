//! kubectl plugin for LoadTest resources.
#![deny(missing_docs)]

mod generate;
mod manifest;
mod scaffold;
mod script;

use anyhow::Result;
use clap::{Parser, Subcommand};
use loadtest_common::telemetry::{self, LogFormat};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Format of the log lines.
    #[arg(long, env = "LOADTEST_LOG_FORMAT", value_enum, default_value_t)]
    log_format: LogFormat,
}

/// Available Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate load test manifests and wire the test script in a kustomization.yaml file
    #[command(alias = "gen")]
    Generate(generate::Opts),
    /// Scaffold test scripts from the HTTP liveness probes of K8s Services
    Scaffold(scaffold::Opts),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    telemetry::init("kubectl-loadtest", None, args.log_format).await?;

    debug!(?args.command, "starting");
    let written = match args.command {
        Command::Generate(opts) => generate::generate(opts).await?,
        Command::Scaffold(opts) => scaffold::scaffold(opts).await?,
    };
    for path in written {
        println!("{} generated", path.display());
    }
    Ok(())
}
