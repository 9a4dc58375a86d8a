//! pcc-harness - drives a printable-character-counting client/server pair
//! through functional, error, interrupt and stress scenarios.
//!
//! Running it without arguments executes the full scenario sequence against
//! `./pcc_server` and `./pcc_client` on port 8080.

use std::path::PathBuf;

use clap::Parser;
use pcc_harness::{cli, commands::Commands, common::logging};

#[derive(Parser)]
#[command(name = "pcc-harness", about = "Scenario harness for the pcc client/server pair")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: ./harness.toml, then the user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output, including captured server lines
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_cli(cli.verbose);

    let command = cli
        .command
        .unwrap_or_else(|| Commands::Run(Default::default()));

    if let Err(e) = cli::dispatch(command, cli.config.as_deref()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
