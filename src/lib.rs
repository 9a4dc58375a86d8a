//! pcc-harness - scenario harness for a printable-character-counting
//! client/server pair
//!
//! The library exposes the pieces the `pcc-harness` binary is built from:
//! fixture generation, server lifecycle management, client invocation,
//! scenario execution and the orchestrator tying them together.

pub mod cli;
pub mod commands;
pub mod common;
pub mod harness;

// Re-export commonly used types for tests
pub use common::config::Config;
pub use common::{Error, Result};
pub use harness::{Orchestrator, ScenarioKind};
