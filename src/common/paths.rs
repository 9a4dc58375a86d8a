//! Configuration paths and executable resolution

use std::path::{Path, PathBuf};

use super::{Error, Result};

/// Name used for the configuration directory
const APP_NAME: &str = "pcc-harness";

/// Configuration file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "harness.toml";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/pcc-harness/`
/// - macOS: `~/Library/Application Support/pcc-harness/`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the user configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Path of the per-project configuration file
pub fn local_config_path() -> PathBuf {
    PathBuf::from(LOCAL_CONFIG_FILE)
}

/// Resolve an executable to a concrete path
///
/// Paths with a directory component (`./pcc_server`, `/usr/bin/x`) are used
/// as given; bare names are looked up on `PATH`.
pub fn resolve_executable(executable: &Path) -> Result<PathBuf> {
    if executable.components().count() > 1 || executable.is_absolute() {
        return Ok(executable.to_path_buf());
    }

    let name = executable.to_string_lossy();
    which::which(executable).map_err(|_| {
        let searched: Vec<String> = std::env::var_os("PATH")
            .map(|p| {
                std::env::split_paths(&p)
                    .map(|d| d.display().to_string())
                    .collect()
            })
            .unwrap_or_default();
        Error::executable_not_found(&name, &searched)
    })
}
