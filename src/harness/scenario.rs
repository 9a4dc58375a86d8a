//! Scenario execution
//!
//! Every scenario is a batch of client invocations against one live server.
//! Concurrent batches put each invocation on its own tokio task and join the
//! whole set before the scenario ends; no invocation waits on another.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::common::config::{LoadConfig, Timeouts};
use crate::common::Error;

use super::client::{ClientInvoker, InvocationOutcome};
use super::fixtures::{FixtureKind, FixtureSet};
use super::server::{OutputLine, ServerProcess};

/// The six scenario kinds, in their default run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ScenarioKind {
    BasicFunctionality,
    ErrorHandling,
    SignalFault,
    Stress,
    AdditionalStress,
    ResourceLimit,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 6] = [
        ScenarioKind::BasicFunctionality,
        ScenarioKind::ErrorHandling,
        ScenarioKind::SignalFault,
        ScenarioKind::Stress,
        ScenarioKind::AdditionalStress,
        ScenarioKind::ResourceLimit,
    ];

    /// Display name for reports
    pub fn title(self) -> &'static str {
        match self {
            ScenarioKind::BasicFunctionality => "Basic functionality",
            ScenarioKind::ErrorHandling => "Error handling",
            ScenarioKind::SignalFault => "Signal handling (SIGINT)",
            ScenarioKind::Stress => "Stress",
            ScenarioKind::AdditionalStress => "Additional stress",
            ScenarioKind::ResourceLimit => "Resource limits and slow clients",
        }
    }

    /// Whether the scenario deliberately ends the server's life
    pub fn terminates_server(self) -> bool {
        self == ScenarioKind::SignalFault
    }
}

/// What a single invocation must do to count as correct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Exit code 0 and empty stderr
    Succeeds,
    /// Non-zero exit code and a diagnostic on stderr
    Fails,
    /// Any observed termination
    Completes,
}

impl Expectation {
    pub fn is_met(self, outcome: &InvocationOutcome) -> bool {
        match self {
            Expectation::Succeeds => outcome.succeeded(),
            Expectation::Fails => outcome.failed_with_diagnostic(),
            Expectation::Completes => outcome.completed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

/// An invocation outcome judged against its expectation
#[derive(Debug, Clone, Serialize)]
pub struct InvocationCheck {
    pub expectation: Expectation,
    pub met: bool,
    #[serde(flatten)]
    pub outcome: InvocationOutcome,
}

/// Everything one scenario observed
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub kind: ScenarioKind,
    pub title: String,
    pub verdict: Verdict,
    pub invocations: Vec<InvocationCheck>,
    /// Scenario-level observations (server exit, interrupt trigger, ...)
    pub notes: Vec<String>,
    /// Reasons the verdict is `Fail`
    pub failures: Vec<String>,
    /// Server output captured while the scenario ran
    pub server_output: Vec<OutputLine>,
    pub elapsed_ms: u64,
}

impl ScenarioReport {
    fn new(kind: ScenarioKind) -> Self {
        Self {
            kind,
            title: kind.title().to_string(),
            verdict: Verdict::Pass,
            invocations: Vec::new(),
            notes: Vec::new(),
            failures: Vec::new(),
            server_output: Vec::new(),
            elapsed_ms: 0,
        }
    }

    fn record(&mut self, outcome: InvocationOutcome, expectation: Expectation) {
        let met = expectation.is_met(&outcome);
        if !met {
            let failure = if let Some(spawn_error) = &outcome.spawn_error {
                format!("{}: could not launch client: {}", outcome.label, spawn_error)
            } else if outcome.succeeded() {
                format!("{}: expected {:?}, but it succeeded", outcome.label, expectation)
            } else {
                let err =
                    Error::client_invocation(&outcome.label, outcome.exit_code, &outcome.stderr);
                format!("expected {:?}: {}", expectation, err)
            };
            self.failures.push(failure);
        }
        self.invocations.push(InvocationCheck {
            expectation,
            met,
            outcome,
        });
    }

    fn finish(mut self, started: Instant) -> Self {
        self.verdict = if self.failures.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        self.elapsed_ms = started.elapsed().as_millis() as u64;
        self
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// One planned invocation
#[derive(Debug, Clone)]
struct Job {
    label: String,
    file: PathBuf,
    delay: Duration,
    expectation: Expectation,
}

impl Job {
    fn new(label: impl Into<String>, file: PathBuf, expectation: Expectation) -> Self {
        Self {
            label: label.into(),
            file,
            delay: Duration::ZERO,
            expectation,
        }
    }

    fn fixture(kind: FixtureKind, fixtures: &FixtureSet, expectation: Expectation) -> Self {
        Self::new(kind.file_name(), fixtures.path(kind), expectation)
    }

    fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Shared, read-only inputs of every scenario
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pub invoker: ClientInvoker,
    pub fixtures: FixtureSet,
    pub load: LoadConfig,
    pub timeouts: Timeouts,
    pub connection_marker: Option<String>,
}

/// Run one scenario against `server`
pub async fn run_scenario(
    kind: ScenarioKind,
    ctx: &ScenarioContext,
    server: &mut ServerProcess,
) -> ScenarioReport {
    tracing::info!("Running scenario {:?}", kind);
    let started = Instant::now();
    let mut report = ScenarioReport::new(kind);

    // Output from before the scenario belongs to whoever ran earlier
    server.drain_output();

    match kind {
        ScenarioKind::BasicFunctionality => basic_functionality(ctx, &mut report).await,
        ScenarioKind::ErrorHandling => error_handling(ctx, &mut report).await,
        ScenarioKind::SignalFault => signal_fault(ctx, server, &mut report).await,
        ScenarioKind::Stress => stress(ctx, &mut report).await,
        ScenarioKind::AdditionalStress => additional_stress(ctx, &mut report).await,
        ScenarioKind::ResourceLimit => resource_limit(ctx, &mut report).await,
    }

    if !kind.terminates_server() {
        if server.is_alive() {
            report.notes.push("server still running".to_string());
        } else {
            let status = server
                .exit_status()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".to_string());
            report
                .failures
                .push(format!("server exited during scenario ({})", status));
        }
        report.server_output.extend(server.drain_output());
    }

    report.finish(started)
}

async fn basic_functionality(ctx: &ScenarioContext, report: &mut ScenarioReport) {
    let jobs = [
        FixtureKind::PrintableText,
        FixtureKind::MixedBinary,
        FixtureKind::BoundaryLarge,
    ]
    .map(|kind| Job::fixture(kind, &ctx.fixtures, Expectation::Succeeds));

    run_sequentially(&ctx.invoker, jobs, report).await;
}

async fn error_handling(ctx: &ScenarioContext, report: &mut ScenarioReport) {
    let jobs = [
        Job::fixture(FixtureKind::Empty, &ctx.fixtures, Expectation::Fails),
        Job::new(
            super::fixtures::MISSING_FILE_NAME,
            ctx.fixtures.missing_path(),
            Expectation::Fails,
        ),
    ];

    run_sequentially(&ctx.invoker, jobs, report).await;
}

/// Interrupt the server while a large transfer is in flight
async fn signal_fault(
    ctx: &ScenarioContext,
    server: &mut ServerProcess,
    report: &mut ScenarioReport,
) {
    let job = Job::fixture(FixtureKind::BoundaryLarge, &ctx.fixtures, Expectation::Completes);
    let expectation = job.expectation;
    let label = job.label.clone();

    let invoker = ctx.invoker.clone();
    let client = tokio::spawn(async move { invoker.run(&job.label, &job.file, job.delay).await });

    let settle = ctx.timeouts.settle();
    match &ctx.connection_marker {
        Some(marker) => {
            if server.wait_for_output(marker, settle).await {
                report.notes.push(format!("interrupt sent after server reported '{}'", marker));
            } else {
                report.notes.push(format!(
                    "server did not report '{}' within {:?}, interrupting anyway",
                    marker, settle
                ));
            }
        }
        None => {
            tokio::time::sleep(settle).await;
            report
                .notes
                .push(format!("interrupt sent after fixed settle delay of {:?}", settle));
        }
    }

    let handle = server.interrupt_handle();
    if let Err(e) = handle.interrupt() {
        report.failures.push(format!("failed to interrupt server: {}", e));
    }

    let outcome = match client.await {
        Ok(outcome) => outcome,
        Err(e) => aborted_outcome(&label, e),
    };
    report.record(outcome, expectation);

    let grace = ctx.timeouts.interrupt_grace();
    match server.wait_exit(grace).await {
        Ok(Some(status)) => report
            .notes
            .push(format!("server exited with {} after interrupt", status)),
        Ok(None) => report
            .failures
            .push(format!("server still running {:?} after interrupt", grace)),
        Err(e) => report
            .failures
            .push(format!("failed to observe server exit: {}", e)),
    }
    report
        .server_output
        .extend(server.collect_remaining_output().await);
}

async fn stress(ctx: &ScenarioContext, report: &mut ScenarioReport) {
    let count = ctx.load.stress_clients;
    let jobs = (0..count)
        .map(|i| {
            Job::fixture(FixtureKind::PrintableText, &ctx.fixtures, Expectation::Completes)
                .labelled(format!("stress client {}", i + 1))
        })
        .collect();

    run_concurrently(&ctx.invoker, jobs, report).await;
    report
        .notes
        .push(format!("{} concurrent clients joined", count));

    // The server must still answer once the burst is over
    let probe = Job::fixture(FixtureKind::PrintableText, &ctx.fixtures, Expectation::Succeeds)
        .labelled("post-stress probe");
    run_sequentially(&ctx.invoker, [probe], report).await;
}

async fn additional_stress(ctx: &ScenarioContext, report: &mut ScenarioReport) {
    let count = ctx.load.additional_stress_clients;
    for kind in [
        FixtureKind::PrintableText,
        FixtureKind::BoundaryLarge,
        FixtureKind::OverThresholdLarge,
    ] {
        let jobs = (0..count)
            .map(|i| {
                Job::fixture(kind, &ctx.fixtures, Expectation::Completes)
                    .labelled(format!("{} #{}", kind.file_name(), i + 1))
            })
            .collect();
        run_concurrently(&ctx.invoker, jobs, report).await;
        report.notes.push(format!(
            "{} concurrent clients over {} ({} bytes)",
            count,
            kind.file_name(),
            kind.size()
        ));
    }
}

async fn resource_limit(ctx: &ScenarioContext, report: &mut ScenarioReport) {
    let count = ctx.load.resource_clients;
    let delay = ctx.load.slow_client_delay();

    let mut jobs: Vec<Job> = (0..count)
        .map(|i| {
            Job::fixture(FixtureKind::Random, &ctx.fixtures, Expectation::Completes)
                .labelled(format!("large client {}", i + 1))
        })
        .collect();
    jobs.push(
        Job::fixture(FixtureKind::PrintableText, &ctx.fixtures, Expectation::Completes)
            .labelled("slow client")
            .delayed(delay),
    );

    run_concurrently(&ctx.invoker, jobs, report).await;
    report.notes.push(format!(
        "{} concurrent clients over {} plus one client delayed by {:?}",
        count,
        FixtureKind::Random.file_name(),
        delay
    ));
}

async fn run_sequentially(
    invoker: &ClientInvoker,
    jobs: impl IntoIterator<Item = Job>,
    report: &mut ScenarioReport,
) {
    for job in jobs {
        let outcome = invoker.run(&job.label, &job.file, job.delay).await;
        report.record(outcome, job.expectation);
    }
}

/// Launch every job on its own task and wait for all of them
async fn run_concurrently(invoker: &ClientInvoker, jobs: Vec<Job>, report: &mut ScenarioReport) {
    let planned: Vec<(String, Expectation)> = jobs
        .iter()
        .map(|j| (j.label.clone(), j.expectation))
        .collect();

    let tasks = jobs.into_iter().map(|job| {
        let invoker = invoker.clone();
        tokio::spawn(async move { invoker.run(&job.label, &job.file, job.delay).await })
    });

    let results = join_all(tasks).await;
    for ((label, expectation), result) in planned.into_iter().zip(results) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => aborted_outcome(&label, e),
        };
        report.record(outcome, expectation);
    }
}

/// Outcome for an invocation whose task panicked or was cancelled
fn aborted_outcome(label: &str, err: tokio::task::JoinError) -> InvocationOutcome {
    tracing::error!("Invocation task '{}' aborted: {}", label, err);
    InvocationOutcome {
        label: label.to_string(),
        file: PathBuf::new(),
        delay_ms: 0,
        exit_code: None,
        signal: None,
        stdout: String::new(),
        stderr: err.to_string(),
        elapsed_ms: 0,
        spawn_error: Some(format!("invocation task aborted: {}", err)),
    }
}
