//! Run orchestration
//!
//! Prepares fixtures, brings up the server, runs the configured scenarios in
//! order and always stops the server afterwards, also when a fatal error cut
//! the scenario phase short.

use std::path::Path;

use serde::Serialize;

use crate::common::config::Config;
use crate::common::{paths, Error, Result};

use super::client::ClientInvoker;
use super::fixtures;
use super::scenario::{run_scenario, ScenarioContext, ScenarioReport};
use super::server::ServerProcess;

/// Result of a complete run
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub reports: Vec<ScenarioReport>,
    /// Number of times a fresh server was started after one terminated
    pub restarts: usize,
    /// Set when the final stop needed a forced kill
    pub stop_error: Option<String>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }
}

/// Drives one full harness run
pub struct Orchestrator {
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the configured scenarios, calling `on_report` as each finishes
    ///
    /// Fixture and server-start failures are returned as errors; everything
    /// else ends up in the reports.
    pub async fn run<F>(&self, mut on_report: F) -> Result<RunSummary>
    where
        F: FnMut(&ScenarioReport),
    {
        let config = &self.config;

        let fixtures = fixtures::prepare_in_background(&config.fixtures.directory).await?;

        let server_exe = paths::resolve_executable(&config.server.executable)
            .map_err(|e| Error::ServerStart(e.to_string()))?;
        let client_exe = paths::resolve_executable(&config.client.executable).unwrap_or_else(|e| {
            // Invocations will record the launch failure themselves
            tracing::warn!("{}", e);
            config.client.executable.clone()
        });

        let ctx = ScenarioContext {
            invoker: ClientInvoker::new(
                client_exe,
                config.client.address.clone(),
                config.server.port,
            ),
            fixtures,
            load: config.load.clone(),
            timeouts: config.timeouts.clone(),
            connection_marker: config.server.connection_marker.clone(),
        };

        let mut summary = RunSummary {
            reports: Vec::new(),
            restarts: 0,
            stop_error: None,
        };

        let mut server = self.start_server(&server_exe).await?;

        let result = self
            .run_scenarios(&server_exe, &ctx, &mut server, &mut summary, &mut on_report)
            .await;

        // Cleanup runs whether or not the scenario phase failed
        if let Err(e) = server.stop(config.timeouts.stop_grace()).await {
            tracing::warn!("{}", e);
            summary.stop_error = Some(e.to_string());
        }

        result?;
        Ok(summary)
    }

    async fn run_scenarios<F>(
        &self,
        server_exe: &Path,
        ctx: &ScenarioContext,
        server: &mut ServerProcess,
        summary: &mut RunSummary,
        on_report: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&ScenarioReport),
    {
        for &kind in &self.config.scenarios {
            if !server.is_alive() {
                tracing::info!("Server is down, starting a fresh one for {:?}", kind);
                // The old handle is already reaped; stop only logs leftovers
                if let Err(e) = server.stop(self.config.timeouts.stop_grace()).await {
                    tracing::warn!("{}", e);
                }
                *server = self.start_server(server_exe).await?;
                summary.restarts += 1;
            }

            let report = run_scenario(kind, ctx, server).await;
            on_report(&report);
            summary.reports.push(report);
        }
        Ok(())
    }

    /// Start the server and wait until it accepts connections
    async fn start_server(&self, server_exe: &Path) -> Result<ServerProcess> {
        let config = &self.config;
        let mut server = ServerProcess::start(server_exe, config.server.port).await?;

        if let Err(e) = server
            .wait_ready(&config.client.address, config.timeouts.readiness())
            .await
        {
            if let Err(stop_err) = server.stop(config.timeouts.stop_grace()).await {
                tracing::warn!("{}", stop_err);
            }
            return Err(e);
        }

        // Connections made by the readiness probe are not part of any scenario
        server
            .discard_probe_output(
                config.server.connection_marker.as_deref(),
                config.timeouts.settle(),
            )
            .await;
        tracing::info!(pid = server.pid(), "Server ready for scenarios");
        Ok(server)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::harness::fixtures::FixtureKind;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_missing_server_is_fatal_after_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.executable = PathBuf::from("definitely-not-a-real-server-xyz");
        config.fixtures.directory = dir.path().join("fixtures");

        let err = Orchestrator::new(config).run(|_| {}).await.unwrap_err();
        assert!(matches!(err, Error::ServerStart(_)));

        // Fixtures come first, so they are in place even though the server is not
        let fixtures = dir.path().join("fixtures");
        for kind in FixtureKind::ALL {
            assert!(fixtures.join(kind.file_name()).is_file(), "{:?}", kind);
        }
    }

    #[tokio::test]
    async fn test_fixture_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let mut config = Config::default();
        config.server.executable = PathBuf::from("sleep");
        config.fixtures.directory = blocker.join("fixtures");

        let err = Orchestrator::new(config).run(|_| {}).await.unwrap_err();
        assert!(matches!(err, Error::FixtureCreation { .. }));
    }

    #[tokio::test]
    async fn test_server_that_never_listens_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let port = std::net::TcpListener::bind(("0.0.0.0", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let mut config = Config::default();
        config.server.executable = PathBuf::from("sleep");
        config.server.port = port;
        config.fixtures.directory = dir.path().to_path_buf();
        config.timeouts.readiness_secs = 0;

        let mut seen = 0;
        let err = Orchestrator::new(config)
            .run(|_| seen += 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServerNotReady(_)));
        assert_eq!(seen, 0);
    }
}
