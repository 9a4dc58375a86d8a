//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::harness::ScenarioKind;

#[derive(Subcommand)]
pub enum Commands {
    /// Prepare fixtures, start the server and run the scenarios (default)
    Run(RunArgs),

    /// Only write the fixture files
    Fixtures {
        /// Directory to write to (default: from configuration)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Overrides for a harness run
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Run only these scenarios, in the given order (repeatable)
    #[arg(long = "scenario", short = 's', value_enum)]
    pub scenarios: Vec<ScenarioKind>,

    /// TCP port for the server
    #[arg(long)]
    pub port: Option<u16>,

    /// Path to the server executable
    #[arg(long)]
    pub server: Option<PathBuf>,

    /// Path to the client executable
    #[arg(long)]
    pub client: Option<PathBuf>,

    /// Directory for fixture files
    #[arg(long)]
    pub fixtures: Option<PathBuf>,

    /// Output line the server prints when it accepts a connection
    #[arg(long)]
    pub connection_marker: Option<String>,

    /// Print reports as JSON instead of text
    #[arg(long)]
    pub json: bool,
}
