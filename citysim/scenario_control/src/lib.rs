#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Scenario and time progression orchestrator for the city simulation dashboard:
//! simulated clock, demand-driven population quota, scenario catalog and
//! free-text control commands.

/// Hour-of-day demand table.
#[path = "../patterns.rs"]
pub mod patterns;

/// Named scenario catalog.
#[path = "../catalog.rs"]
pub mod catalog;

/// External collaborator contracts and the loopback simulation.
#[path = "../collaborators.rs"]
pub mod collaborators;

/// HTTP implementation of the collaborator contracts.
#[path = "../http.rs"]
pub mod http;

/// Orchestrator errors.
#[path = "../error.rs"]
pub mod error;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Structured log and event sinks.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Free-text command classifier.
#[path = "../interpreter.rs"]
pub mod interpreter;

/// Exclusive-change conflict guard.
#[path = "../guard.rs"]
pub mod guard;

/// Scenario ranking.
#[path = "../suggestions.rs"]
pub mod suggestions;

/// Progressive simulated clock.
#[path = "../clock.rs"]
pub mod clock;

/// Population quota maintainer.
#[path = "../quota.rs"]
pub mod quota;

/// Orchestrator façade.
#[path = "../main.rs"]
pub mod runtime;

pub use catalog::{DifficultyTier, ScenarioDefinition, SCENARIOS};
pub use clock::{ClockState, HourChange, HourChangeCause, ProgressiveClock};
pub use collaborators::{
    ControlError, DirectorPhase, DirectorStatus, LoopbackOp, LoopbackSimulation, NetworkState,
    PopulationSnapshot, ScenarioDirector, SimulationControl, SocRange,
};
pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use guard::ConflictGuard;
pub use http::HttpSimulationClient;
pub use interpreter::{
    ClassifierRule, CommandInterpreter, Intent, TEMPERATURE_CHANGE_KEY, TIME_CHANGE_KEY,
};
pub use patterns::{DemandBucket, DEMAND_PATTERNS};
pub use quota::{QuotaMaintainer, QuotaOutcome, QUOTA_TOP_UP_KEY};
pub use runtime::{CommandResult, ScenarioOrchestrator, ScenarioOrchestratorBuilder};
pub use suggestions::{Suggestion, SuggestionEngine};
pub use telemetry::{OrchestratorTelemetry, OrchestratorTelemetryBuilder};
