use thiserror::Error;

use crate::collaborators::ControlError;

/// Errors surfaced by the orchestrator's lifecycle operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Periodic tasks need a Tokio runtime and none is running.
    #[error("no tokio runtime available to host periodic tasks")]
    Runtime,
    /// The scenario key is not in the catalog.
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
    /// A collaborator call failed.
    #[error(transparent)]
    Control(#[from] ControlError),
}
