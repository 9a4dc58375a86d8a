//! Error types for the harness
//!
//! Only fixture and server-start failures are fatal to a run. Client
//! invocation failures are recorded in the scenario report instead of being
//! propagated, and stop failures are logged.

use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Fixture Errors ===
    #[error("Failed to create fixture '{path}': {reason}")]
    FixtureCreation { path: String, reason: String },

    // === Server Errors ===
    #[error("Server failed to start: {0}")]
    ServerStart(String),

    #[error("Port {0} is already in use. Stop the process holding it or pick another port with --port")]
    PortInUse(u16),

    #[error("Server did not accept connections within {0:?}")]
    ServerNotReady(Duration),

    #[error("Server did not stop cleanly: {0}")]
    ServerStop(String),

    #[error("Signals are not supported on this platform")]
    SignalsUnsupported,

    // === Client Errors ===
    #[error("Client invocation '{label}' failed with {code}: {stderr}")]
    ClientInvocation {
        label: String,
        code: String,
        stderr: String,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Executable '{name}' not found. Searched: {searched}")]
    ExecutableNotFound { name: String, searched: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a fixture creation error for a path
    pub fn fixture_creation(path: &Path, reason: impl ToString) -> Self {
        Self::FixtureCreation {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a client invocation error
    pub fn client_invocation(label: &str, code: Option<i32>, stderr: &str) -> Self {
        Self::ClientInvocation {
            label: label.to_string(),
            code: code
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "a signal".to_string()),
            stderr: stderr.trim().to_string(),
        }
    }

    /// Create an executable not found error with search paths
    pub fn executable_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::ExecutableNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_invocation_message() {
        let err = Error::client_invocation("empty_file.txt", Some(1), "Error: file is empty\n");
        assert_eq!(
            err.to_string(),
            "Client invocation 'empty_file.txt' failed with exit code 1: Error: file is empty"
        );
    }

    #[test]
    fn test_signal_exit_message() {
        let err = Error::client_invocation("x", None, "");
        assert!(err.to_string().contains("a signal"));
    }

    #[test]
    fn test_fixture_creation_message() {
        let err = Error::fixture_creation(Path::new("/x/empty_file.txt"), "Permission denied");
        assert_eq!(
            err.to_string(),
            "Failed to create fixture '/x/empty_file.txt': Permission denied"
        );
    }
}
