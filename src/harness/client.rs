//! Client invocation
//!
//! Each call launches its own client process and waits for it, so
//! concurrent invocations share nothing but the immutable invoker settings.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;

/// Launches the client-under-test against one server endpoint
#[derive(Debug, Clone)]
pub struct ClientInvoker {
    executable: PathBuf,
    address: String,
    port: u16,
}

/// Captured result of one client run
#[derive(Debug, Clone, Serialize)]
pub struct InvocationOutcome {
    /// Short name shown in reports
    pub label: String,
    pub file: PathBuf,
    pub delay_ms: u64,
    /// `None` when the process was killed by a signal or never started
    pub exit_code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    /// Set when the client process could not be launched at all
    pub spawn_error: Option<String>,
}

impl InvocationOutcome {
    /// The process ran and its termination was observed
    pub fn completed(&self) -> bool {
        self.spawn_error.is_none() && (self.exit_code.is_some() || self.signal.is_some())
    }

    /// Exit code 0 and nothing on stderr
    pub fn succeeded(&self) -> bool {
        self.spawn_error.is_none() && self.exit_code == Some(0) && self.stderr.trim().is_empty()
    }

    /// Non-zero exit with a diagnostic on stderr
    pub fn failed_with_diagnostic(&self) -> bool {
        self.completed() && self.exit_code != Some(0) && !self.stderr.trim().is_empty()
    }

    /// Human-readable exit description
    pub fn exit_description(&self) -> String {
        if let Some(err) = &self.spawn_error {
            return format!("not started ({})", err);
        }
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exit code {}", code),
            (None, Some(sig)) => format!("killed by signal {}", sig),
            (None, None) => "unknown exit".to_string(),
        }
    }
}

impl ClientInvoker {
    pub fn new(executable: impl Into<PathBuf>, address: impl Into<String>, port: u16) -> Self {
        Self {
            executable: executable.into(),
            address: address.into(),
            port,
        }
    }

    /// Run the client once over `file`
    ///
    /// Sleeps `delay` first when non-zero, emulating a late client. Never
    /// fails: a client that cannot be launched is reported in the outcome.
    pub async fn run(&self, label: &str, file: &Path, delay: Duration) -> InvocationOutcome {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let started = Instant::now();
        let result = Command::new(&self.executable)
            .arg(&self.address)
            .arg(self.port.to_string())
            .arg(file)
            .stdin(Stdio::null())
            .output()
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut outcome = InvocationOutcome {
            label: label.to_string(),
            file: file.to_path_buf(),
            delay_ms: delay.as_millis() as u64,
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_ms,
            spawn_error: None,
        };

        match result {
            Ok(output) => {
                outcome.exit_code = output.status.code();
                outcome.signal = exit_signal(&output.status);
                outcome.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                outcome.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            }
            Err(e) => {
                tracing::warn!("Failed to launch client {}: {}", self.executable.display(), e);
                outcome.spawn_error = Some(e.to_string());
                outcome.stderr = e.to_string();
            }
        }

        tracing::debug!(
            label,
            elapsed_ms,
            "Client finished with {}",
            outcome.exit_description()
        );
        outcome
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn outcome(code: Option<i32>, stderr: &str) -> InvocationOutcome {
        InvocationOutcome {
            label: "t".into(),
            file: PathBuf::from("f"),
            delay_ms: 0,
            exit_code: code,
            signal: None,
            stdout: String::new(),
            stderr: stderr.into(),
            elapsed_ms: 0,
            spawn_error: None,
        }
    }

    #[test]
    fn test_predicates() {
        assert!(outcome(Some(0), "").succeeded());
        assert!(outcome(Some(0), "  \n").succeeded());
        assert!(!outcome(Some(0), "warning").succeeded());
        assert!(outcome(Some(1), "Error opening file").failed_with_diagnostic());
        assert!(!outcome(Some(1), "").failed_with_diagnostic());
        assert!(outcome(Some(3), "").completed());
        assert!(!outcome(None, "").completed());
    }

    #[tokio::test]
    async fn test_arguments_are_positional() {
        // `echo` prints its arguments, standing in for a client
        let invoker = ClientInvoker::new("echo", "127.0.0.1", 8080);
        let out = invoker
            .run("echo", Path::new("test_files/a.txt"), Duration::ZERO)
            .await;
        assert!(out.succeeded());
        assert_eq!(out.stdout.trim(), "127.0.0.1 8080 test_files/a.txt");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_recorded() {
        let invoker = ClientInvoker::new("false", "127.0.0.1", 8080);
        let out = invoker.run("false", Path::new("x"), Duration::ZERO).await;
        assert!(out.completed());
        assert_eq!(out.exit_code, Some(1));
        assert!(!out.succeeded());
    }

    #[tokio::test]
    async fn test_missing_client_is_not_a_panic() {
        let invoker = ClientInvoker::new("./no_such_client", "127.0.0.1", 8080);
        let out = invoker.run("missing", Path::new("x"), Duration::ZERO).await;
        assert!(out.spawn_error.is_some());
        assert!(!out.completed());
        assert!(!out.failed_with_diagnostic());
        assert!(out.exit_description().starts_with("not started"));
    }

    #[tokio::test]
    async fn test_delay_is_applied_before_launch() {
        let invoker = ClientInvoker::new("true", "127.0.0.1", 8080);
        let started = Instant::now();
        let out = invoker
            .run("late", Path::new("x"), Duration::from_millis(150))
            .await;
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(out.delay_ms, 150);
        assert!(out.succeeded());
    }
}
