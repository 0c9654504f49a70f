//! Scheduler error types.

use compactd_state::StateError;
use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A persister or persistence manager call failed. Surfaced unchanged.
    #[error(transparent)]
    State(#[from] StateError),

    #[error("tenant discovery failed: {0}")]
    Discovery(#[from] anyhow::Error),

    #[error("shutdown requested")]
    Shutdown,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
