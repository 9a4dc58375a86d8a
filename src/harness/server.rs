//! Server lifecycle management
//!
//! Owns the server-under-test as a child process. Its stdout and stderr are
//! drained by background tasks into a channel so the caller never blocks on
//! the pipes, and the captured lines stay available for readiness checks,
//! interrupt triggers and the final report.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::common::{socket_address, Error, Result};

/// Interval between readiness probes
const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// How long a single probe connect may take
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for buffered output after the process has exited
const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Liveness state of the server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Spawned, not yet accepting connections
    Starting,
    /// Accepting connections
    Running,
    /// Exit observed and reaped
    Stopped,
}

/// Which pipe a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of captured server output
#[derive(Debug, Clone, Serialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Copyable handle for signalling the server from another task
#[derive(Debug, Clone, Copy)]
pub struct InterruptHandle {
    pid: u32,
}

impl InterruptHandle {
    /// Send SIGINT to the server. Does not wait for any effect.
    pub fn interrupt(&self) -> Result<()> {
        tracing::info!(pid = self.pid, "Sending interrupt to server");
        send_interrupt(self.pid)
    }
}

/// Handle to a running server-under-test
pub struct ServerProcess {
    child: Child,
    pid: u32,
    port: u16,
    state: ServerState,
    exit_status: Option<ExitStatus>,
    output_rx: mpsc::UnboundedReceiver<OutputLine>,
    /// Lines received but not yet returned by `drain_output`
    pending: Vec<OutputLine>,
}

impl ServerProcess {
    /// Launch the server bound to `port`
    ///
    /// The port is checked up front so an occupied port fails fast instead of
    /// racing the readiness probe against whatever already listens there.
    pub async fn start(executable: &Path, port: u16) -> Result<Self> {
        ensure_port_free(port)?;

        let mut cmd = Command::new(executable);
        cmd.arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            Error::ServerStart(format!("Failed to start {}: {}", executable.display(), e))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| Error::ServerStart("Server exited during spawn".to_string()))?;

        let (tx, output_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx));
        }

        tracing::info!(pid, port, "Started server {}", executable.display());

        Ok(Self {
            child,
            pid,
            port,
            state: ServerState::Starting,
            exit_status: None,
            output_rx,
            pending: Vec::new(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Exit status, once the process has been reaped
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Handle the fault-injection task uses to signal the server
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle { pid: self.pid }
    }

    /// Poll until the server accepts a TCP connection on `address`
    pub async fn wait_ready(&mut self, address: &str, timeout: Duration) -> Result<()> {
        let target = socket_address(address, self.port);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(status) = self.try_reap()? {
                let output = self.collect_remaining_output().await;
                let stderr: Vec<&str> = output
                    .iter()
                    .filter(|l| l.stream == OutputStream::Stderr)
                    .map(|l| l.text.as_str())
                    .collect();
                return Err(Error::ServerStart(format!(
                    "Server exited with {} before accepting connections{}",
                    status,
                    if stderr.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", stderr.join("; "))
                    }
                )));
            }

            if let Ok(Ok(_)) =
                tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(&target)).await
            {
                self.state = ServerState::Running;
                tracing::info!(pid = self.pid, "Server accepting connections on {}", target);
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Error::ServerNotReady(timeout));
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    /// Check liveness without blocking
    pub fn is_alive(&mut self) -> bool {
        matches!(self.try_reap(), Ok(None))
    }

    /// Send SIGINT. The caller observes the effect through `wait_exit` or
    /// a later invocation.
    pub fn interrupt(&self) -> Result<()> {
        if self.state == ServerState::Stopped {
            tracing::warn!(pid = self.pid, "Not interrupting server that already exited");
            return Ok(());
        }
        self.interrupt_handle().interrupt()
    }

    /// Wait up to `grace` for the process to exit on its own
    pub async fn wait_exit(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                self.mark_exited(status);
                Ok(Some(status))
            }
            Err(_) => Ok(None),
        }
    }

    /// Request termination and block until the process has exited
    ///
    /// Escalates to a forced kill when the process ignores SIGTERM for longer
    /// than `grace`, and reports that as `ServerStop`. A no-op on a handle
    /// that has already stopped.
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        if self.try_reap()?.is_some() {
            return Ok(());
        }

        tracing::info!(pid = self.pid, "Stopping server");
        if let Err(e) = send_terminate(&mut self.child, self.pid) {
            // Most likely exited in the meantime; the wait below tells
            tracing::debug!(pid = self.pid, "Termination request failed: {}", e);
        }

        if self.wait_exit(grace).await?.is_some() {
            return Ok(());
        }

        tracing::warn!(pid = self.pid, "Server ignored termination for {:?}, killing", grace);
        self.child.kill().await?;
        let status = self.child.wait().await?;
        self.mark_exited(status);
        Err(Error::ServerStop(format!(
            "process {} did not exit within {:?} of SIGTERM and was killed",
            self.pid, grace
        )))
    }

    /// Return output lines captured since the previous call
    pub fn drain_output(&mut self) -> Vec<OutputLine> {
        self.pull_output();
        std::mem::take(&mut self.pending)
    }

    /// Drop the output produced by the readiness probe's own connection
    ///
    /// The probe connect completes at the TCP handshake, before the server
    /// accepts and reports it. With a `marker`, this waits up to `timeout` for
    /// that report so a later `wait_for_output` only sees real clients.
    pub async fn discard_probe_output(&mut self, marker: Option<&str>, timeout: Duration) {
        if let Some(marker) = marker {
            if !self.wait_for_output(marker, timeout).await {
                tracing::debug!(
                    pid = self.pid,
                    "Server did not report the readiness connection as '{}'",
                    marker
                );
            }
        }
        let discarded = self.drain_output();
        tracing::debug!(pid = self.pid, lines = discarded.len(), "Discarded startup output");
    }

    /// Wait until an undrained output line contains `marker`
    ///
    /// Returns `false` if the marker did not show up within `timeout` or the
    /// output ended first.
    pub async fn wait_for_output(&mut self, marker: &str, timeout: Duration) -> bool {
        self.pull_output();
        if self.pending.iter().any(|l| l.text.contains(marker)) {
            return true;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.output_rx.recv()).await {
                Ok(Some(line)) => {
                    let hit = line.text.contains(marker);
                    self.pending.push(line);
                    if hit {
                        return true;
                    }
                }
                Ok(None) | Err(_) => return false,
            }
        }
    }

    /// Drain output after exit, waiting briefly for the reader tasks to flush
    pub async fn collect_remaining_output(&mut self) -> Vec<OutputLine> {
        let deadline = tokio::time::Instant::now() + OUTPUT_FLUSH_TIMEOUT;
        while let Ok(Some(line)) = tokio::time::timeout_at(deadline, self.output_rx.recv()).await
        {
            self.pending.push(line);
        }
        self.drain_output()
    }

    fn pull_output(&mut self) {
        while let Ok(line) = self.output_rx.try_recv() {
            self.pending.push(line);
        }
    }

    fn try_reap(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        match self.child.try_wait()? {
            Some(status) => {
                self.mark_exited(status);
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    fn mark_exited(&mut self, status: ExitStatus) {
        tracing::info!(pid = self.pid, "Server exited with {}", status);
        self.exit_status = Some(status);
        self.state = ServerState::Stopped;
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        // Best-effort since we can't await in drop
        if self.state != ServerState::Stopped {
            tracing::warn!(pid = self.pid, "Server handle dropped while running, killing");
            let _ = self.child.start_kill();
        }
    }
}

/// Forward each line of a pipe into the capture channel
async fn forward_lines<R>(pipe: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(text)) = lines.next_line().await {
        tracing::debug!(?stream, "server: {}", text);
        if tx.send(OutputLine { stream, text }).is_err() {
            break;
        }
    }
}

/// Fail fast if something already listens on `port`
fn ensure_port_free(port: u16) -> Result<()> {
    match std::net::TcpListener::bind(("0.0.0.0", port)) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Err(Error::PortInUse(port)),
        Err(e) => Err(Error::ServerStart(format!("Cannot bind port {}: {}", port, e))),
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> Result<()> {
    send_signal(pid, libc::SIGINT)
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> Result<()> {
    Err(Error::SignalsUnsupported)
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: u32) -> Result<()> {
    send_signal(pid, libc::SIGTERM)
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: u32) -> Result<()> {
    child.start_kill()?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A port nothing listens on, used as the `sleep` duration
    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut server = ServerProcess::start(Path::new("sleep"), free_port())
            .await
            .unwrap();
        assert_eq!(server.state(), ServerState::Starting);
        assert!(server.is_alive());

        server.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.is_alive());

        // Second stop is a no-op
        server.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_then_wait_exit() {
        let mut server = ServerProcess::start(Path::new("sleep"), free_port())
            .await
            .unwrap();

        server.interrupt().unwrap();
        let status = server.wait_exit(Duration::from_secs(5)).await.unwrap();
        let status = status.expect("sleep should die from SIGINT");
        assert!(status.code().is_none());
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let err = ServerProcess::start(Path::new("./definitely_missing_server"), free_port())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ServerStart(_)));
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let holder = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = holder.local_addr().unwrap().port();

        let err = ServerProcess::start(Path::new("sleep"), port).await.err().unwrap();
        assert!(matches!(err, Error::PortInUse(p) if p == port));
    }

    #[tokio::test]
    async fn test_wait_ready_reports_early_exit() {
        let mut server = ServerProcess::start(Path::new("false"), free_port())
            .await
            .unwrap();
        let err = server
            .wait_ready("127.0.0.1", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServerStart(_)));
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let mut server = ServerProcess::start(Path::new("sleep"), free_port())
            .await
            .unwrap();
        let err = server
            .wait_ready("127.0.0.1", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServerNotReady(_)));
        server.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_escalates_when_term_is_ignored() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("stubborn.sh");
        std::fs::write(&script, "#!/bin/sh\ntrap '' TERM\necho ready\nwhile :; do sleep 1; done\n")
            .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut server = ServerProcess::start(&script, free_port()).await.unwrap();
        assert!(server.wait_for_output("ready", Duration::from_secs(5)).await);

        let err = server.stop(Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(err, Error::ServerStop(_)));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_output_is_captured() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("chatty.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"listening on $1\"\necho oops >&2\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let port = free_port();
        let mut server = ServerProcess::start(&script, port).await.unwrap();
        server.wait_exit(Duration::from_secs(5)).await.unwrap();
        let lines = server.collect_remaining_output().await;

        assert!(lines
            .iter()
            .any(|l| l.stream == OutputStream::Stdout && l.text == format!("listening on {}", port)));
        assert!(lines
            .iter()
            .any(|l| l.stream == OutputStream::Stderr && l.text == "oops"));
        assert!(server.drain_output().is_empty());
    }

    #[tokio::test]
    async fn test_discard_probe_output_waits_for_late_marker() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow_accept.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nsleep 0.3\necho \"accepted connection from 127.0.0.1:40000\"\n\
             while :; do sleep 1; done\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut server = ServerProcess::start(&script, free_port()).await.unwrap();

        // Nothing printed yet; the line only arrives while discarding
        assert!(server.drain_output().is_empty());
        server
            .discard_probe_output(Some("accepted connection"), Duration::from_secs(5))
            .await;

        assert!(
            !server
                .wait_for_output("accepted connection", Duration::from_millis(300))
                .await
        );
        server.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_drained_lines_do_not_match_again() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("once.sh");
        std::fs::write(&script, "#!/bin/sh\necho marker\nwhile :; do sleep 1; done\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut server = ServerProcess::start(&script, free_port()).await.unwrap();
        assert!(server.wait_for_output("marker", Duration::from_secs(5)).await);
        assert_eq!(server.drain_output().len(), 1);
        assert!(server.drain_output().is_empty());
        assert!(!server.wait_for_output("marker", Duration::from_millis(200)).await);

        server.stop(Duration::from_secs(5)).await.unwrap();
    }
}
