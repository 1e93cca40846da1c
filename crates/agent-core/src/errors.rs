use thiserror::Error;
use waypoint_core_types::{TaskId, TransitionError};
use waypoint_task_store::StoreError;

use crate::grammar::GrammarError;

/// Errors returned by provider adapters (text generation and web search).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider call timed out after {0}")]
    Timeout(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Errors emitted by the agent-core crate.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Raised when a step request is malformed. Nothing has been mutated.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A provider call failed; callers degrade to a conservative default.
    #[error("provider call failed: {0}")]
    TransientProvider(#[from] ProviderError),

    /// Provider output could not be interpreted.
    #[error("unparsable provider output: {0}")]
    Parse(String),

    /// The task (or its current step) cannot make further progress.
    #[error("terminal failure: {0}")]
    Terminal(String),

    /// The request's step index was already consumed or skips ahead.
    #[error("step index {got} rejected for task {task_id}; expected {expected}")]
    DuplicateStep {
        task_id: TaskId,
        expected: u32,
        got: u32,
    },

    /// Another request advanced the task concurrently.
    #[error("concurrent update: {0}")]
    Conflict(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task store failure: {0}")]
    Store(StoreError),
}

impl AgentError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation",
            AgentError::TransientProvider(_) => "transient_provider",
            AgentError::Parse(_) => "parse",
            AgentError::Terminal(_) => "terminal",
            AgentError::DuplicateStep { .. } => "duplicate_step",
            AgentError::Conflict(_) => "conflict",
            AgentError::NotFound(_) => "not_found",
            AgentError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AgentError::NotFound(id),
            StoreError::InvalidTaskId(id) => AgentError::Validation(format!("invalid task id '{id}'")),
            StoreError::VersionConflict { .. } => AgentError::Conflict(err.to_string()),
            StoreError::DuplicateStepIndex {
                task_id,
                step_index,
                last,
            } => AgentError::DuplicateStep {
                task_id,
                expected: last + 1,
                got: step_index,
            },
            other => AgentError::Store(other),
        }
    }
}

impl From<GrammarError> for AgentError {
    fn from(err: GrammarError) -> Self {
        AgentError::Validation(err.to_string())
    }
}

impl From<TransitionError> for AgentError {
    fn from(err: TransitionError) -> Self {
        AgentError::Terminal(err.to_string())
    }
}
