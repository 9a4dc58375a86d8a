//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, local_config_path};
use super::Result;
use crate::harness::ScenarioKind;

/// Main configuration structure
///
/// Built once per run and handed to the orchestrator. Field order matters
/// for TOML output: plain values must precede tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scenarios to run, in order
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<ScenarioKind>,

    /// Server-under-test settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-under-test settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Fixture directory settings
    #[serde(default)]
    pub fixtures: FixtureConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Concurrency settings for the stress scenarios
    #[serde(default)]
    pub load: LoadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scenarios: default_scenarios(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            fixtures: FixtureConfig::default(),
            timeouts: Timeouts::default(),
            load: LoadConfig::default(),
        }
    }
}

fn default_scenarios() -> Vec<ScenarioKind> {
    ScenarioKind::ALL.to_vec()
}

/// Server-under-test settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the server executable
    #[serde(default = "default_server_executable")]
    pub executable: PathBuf,

    /// TCP port passed to the server
    #[serde(default = "default_port")]
    pub port: u16,

    /// Output line the server prints once a client connection is accepted.
    /// When set, the fault scenario signals as soon as it appears.
    #[serde(default)]
    pub connection_marker: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            executable: default_server_executable(),
            port: default_port(),
            connection_marker: None,
        }
    }
}

fn default_server_executable() -> PathBuf {
    PathBuf::from("./pcc_server")
}
fn default_port() -> u16 {
    8080
}

/// Client-under-test settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Path to the client executable
    #[serde(default = "default_client_executable")]
    pub executable: PathBuf,

    /// Address the client connects to
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            executable: default_client_executable(),
            address: default_address(),
        }
    }
}

fn default_client_executable() -> PathBuf {
    PathBuf::from("./pcc_client")
}
fn default_address() -> String {
    "127.0.0.1".to_string()
}

/// Fixture directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// Directory the fixtures are written to
    #[serde(default = "default_fixture_dir")]
    pub directory: PathBuf,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            directory: default_fixture_dir(),
        }
    }
}

fn default_fixture_dir() -> PathBuf {
    PathBuf::from("test_files")
}

/// Timeout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// How long to wait for the server to accept connections after start
    #[serde(default = "default_readiness")]
    pub readiness_secs: u64,

    /// Upper bound on the wait before the fault scenario sends its interrupt
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// Grace period between SIGTERM and a forced kill on stop
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// How long the server may take to exit after an interrupt
    #[serde(default = "default_interrupt_grace")]
    pub interrupt_grace_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness_secs: default_readiness(),
            settle_ms: default_settle(),
            stop_grace_secs: default_stop_grace(),
            interrupt_grace_secs: default_interrupt_grace(),
        }
    }
}

fn default_readiness() -> u64 {
    5
}
fn default_settle() -> u64 {
    2000
}
fn default_stop_grace() -> u64 {
    5
}
fn default_interrupt_grace() -> u64 {
    5
}

impl Timeouts {
    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_secs(self.interrupt_grace_secs)
    }
}

/// Concurrency settings for the stress scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Concurrent clients in the stress scenario
    #[serde(default = "default_stress_clients")]
    pub stress_clients: usize,

    /// Concurrent clients per fixture size in the additional stress scenario
    #[serde(default = "default_additional_stress_clients")]
    pub additional_stress_clients: usize,

    /// Concurrent clients over the largest fixture in the resource scenario
    #[serde(default = "default_resource_clients")]
    pub resource_clients: usize,

    /// Pre-launch delay of the slow client in the resource scenario
    #[serde(default = "default_slow_client_delay")]
    pub slow_client_delay_ms: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            stress_clients: default_stress_clients(),
            additional_stress_clients: default_additional_stress_clients(),
            resource_clients: default_resource_clients(),
            slow_client_delay_ms: default_slow_client_delay(),
        }
    }
}

fn default_stress_clients() -> usize {
    10
}
fn default_additional_stress_clients() -> usize {
    5
}
fn default_resource_clients() -> usize {
    20
}
fn default_slow_client_delay() -> u64 {
    3000
}

impl LoadConfig {
    pub fn slow_client_delay(&self) -> Duration {
        Duration::from_millis(self.slow_client_delay_ms)
    }
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, `./harness.toml` and then the
    /// user config file are tried; defaults are used if neither exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let local = local_config_path();
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| super::Error::Internal(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(super::Error::Config(
                "server.port must be a fixed, non-zero port".to_string(),
            ));
        }
        if self.client.address.trim().is_empty() {
            return Err(super::Error::Config("client.address is empty".to_string()));
        }
        Ok(())
    }
}
