//! Client/server scenario harness
//!
//! Drives an external printable-character-counting server and client
//! through functional, error, interrupt and stress scenarios. The
//! orchestrator owns the server for the whole run and guarantees it is
//! stopped, whatever happens in between.

pub mod client;
pub mod fixtures;
pub mod orchestrator;
pub mod scenario;
pub mod server;

pub use client::{ClientInvoker, InvocationOutcome};
pub use fixtures::{FixtureKind, FixtureSet};
pub use orchestrator::{Orchestrator, RunSummary};
pub use scenario::{Expectation, ScenarioKind, ScenarioReport, Verdict};
pub use server::{ServerProcess, ServerState};
