//! CLI command handling
//!
//! Dispatches CLI commands and formats scenario reports.

use std::path::Path;

use colored::Colorize;

use crate::commands::{Commands, RunArgs};
use crate::common::config::Config;
use crate::common::Result;
use crate::harness::fixtures::{self, FixtureKind};
use crate::harness::server::OutputStream;
use crate::harness::{Orchestrator, RunSummary, ScenarioReport};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::load(config_path)?;

    match command {
        Commands::Run(args) => {
            apply_overrides(&mut config, &args);
            let json = args.json;

            if !json {
                println!(
                    "{} {} on port {}",
                    "Harness:".blue().bold(),
                    config.server.executable.display().to_string().white().bold(),
                    config.server.port
                );
            }

            let orchestrator = Orchestrator::new(config);
            let summary = orchestrator
                .run(|report| {
                    if !json {
                        print_report(report);
                    }
                })
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(())
        }

        Commands::Fixtures { dir } => {
            let dir = dir.unwrap_or(config.fixtures.directory);
            let set = fixtures::prepare_in_background(&dir).await?;

            println!("Fixtures in {}:", set.directory().display());
            for kind in FixtureKind::ALL {
                println!("  {:<22} {:>9} bytes", kind.file_name(), kind.size());
            }
            Ok(())
        }

        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Apply command-line overrides on top of the loaded configuration
pub fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if !args.scenarios.is_empty() {
        config.scenarios = args.scenarios.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(server) = &args.server {
        config.server.executable = server.clone();
    }
    if let Some(client) = &args.client {
        config.client.executable = client.clone();
    }
    if let Some(dir) = &args.fixtures {
        config.fixtures.directory = dir.clone();
    }
    if let Some(marker) = &args.connection_marker {
        config.server.connection_marker = Some(marker.clone());
    }
}

fn print_report(report: &ScenarioReport) {
    println!("\n{} {}", "Running Scenario:".blue().bold(), report.title.white().bold());

    for check in &report.invocations {
        let outcome = &check.outcome;
        let marker = if check.met { "✓".green() } else { "✗".red() };
        println!(
            "  {} {} ({}, {} ms)",
            marker,
            outcome.label,
            outcome.exit_description(),
            outcome.elapsed_ms
        );
        print_stream("Output", &outcome.stdout);
        print_stream("Error", &outcome.stderr);
    }

    for note in &report.notes {
        println!("  {} {}", "•".cyan(), note.dimmed());
    }

    if !report.server_output.is_empty() {
        println!("  {}", "Server output:".cyan());
        for line in &report.server_output {
            let prefix = match line.stream {
                OutputStream::Stdout => "|",
                OutputStream::Stderr => "!",
            };
            println!("    {} {}", prefix.dimmed(), line.text.dimmed());
        }
    }

    if report.passed() {
        println!("  {} {} ({} ms)", "✓".green().bold(), "Passed".green().bold(), report.elapsed_ms);
    } else {
        println!("  {} {} ({} ms)", "✗".red().bold(), "Failed".red().bold(), report.elapsed_ms);
        for failure in &report.failures {
            println!("    {}", failure.red());
        }
    }
}

fn print_stream(name: &str, text: &str) {
    let text = text.trim_end();
    if text.is_empty() {
        return;
    }
    for line in text.lines() {
        println!("      {}: {}", name.dimmed(), line);
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "\n{} {}/{} scenarios passed",
        "Summary:".blue().bold(),
        summary.passed(),
        summary.reports.len()
    );
    if summary.restarts > 0 {
        println!("  server restarted {} time(s)", summary.restarts);
    }
    match &summary.stop_error {
        Some(e) => println!("  {} {}", "Server stop:".yellow(), e),
        None => println!("  {}", "Server stopped".dimmed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::ScenarioKind;
    use std::path::PathBuf;

    #[test]
    fn test_overrides_replace_only_given_fields() {
        let mut config = Config::default();
        let args = RunArgs {
            scenarios: vec![ScenarioKind::Stress],
            port: Some(9001),
            client: Some(PathBuf::from("/opt/pcc/client")),
            ..Default::default()
        };

        apply_overrides(&mut config, &args);

        assert_eq!(config.scenarios, vec![ScenarioKind::Stress]);
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.client.executable, PathBuf::from("/opt/pcc/client"));
        assert_eq!(config.server.executable, PathBuf::from("./pcc_server"));
        assert_eq!(config.fixtures.directory, PathBuf::from("test_files"));
    }

    #[test]
    fn test_empty_overrides_keep_all_scenarios() {
        let mut config = Config::default();
        apply_overrides(&mut config, &RunArgs::default());
        assert_eq!(config.scenarios, ScenarioKind::ALL.to_vec());
    }
}
