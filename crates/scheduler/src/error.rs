//! Scheduler error types.

use lanes_core::{ConfigError, Lane};
use thiserror::Error;

/// Why a task's result channel was rejected.
///
/// [`TaskError::Aborted`] means the work was thrown away before it could
/// finish; every other variant means the work ran and failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task {id} on lane {lane} was aborted")]
    Aborted { id: u64, lane: Lane },
}

impl TaskError {
    /// Shorthand for [`TaskError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// Whether the task was canceled rather than failing on its own.
    pub fn is_abort(&self) -> bool {
        matches!(self, TaskError::Aborted { .. })
    }
}

/// Configuration and lifecycle errors, returned synchronously at the call site.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("a flush signal already exists for lane {0}")]
    DuplicateSignal(Lane),

    #[error("no flush signal registered for lane {0}")]
    MissingSignal(Lane),

    #[error("flush signal for lane {0} is already bound to a queue")]
    SignalAlreadyBound(Lane),

    #[error("lane {0} has been disposed")]
    Disposed(Lane),

    #[error("host flush signals need a running tokio runtime")]
    NoRuntime,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
