use thiserror::Error;

/// Errors surfaced by a `TaskExecutor` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskExecutionError {
    #[error("task '{task}' failed: {message}")]
    Failed { task: String, message: String },

    #[error("task '{0}' returned malformed output")]
    MalformedOutput(String),

    #[error("task '{0}' was cancelled")]
    Cancelled(String),

    #[error("task executor unavailable: {0}")]
    Unavailable(String),
}

/// Errors from memory collaborator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("memory backend unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Errors from guardrail collaborator operations.
///
/// A blocked input is not an error here; that is a verdict. These cover the
/// guardrail itself failing to produce one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardrailError {
    #[error("guardrail unavailable: {0}")]
    Unavailable(String),

    #[error("guardrail rejected request: {0}")]
    InvalidRequest(String),
}

/// Errors raised while loading agent/task definitions.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("task '{0}' not found in catalog")]
    TaskNotFound(String),

    #[error("agent '{agent}' referenced by task '{task}' not found")]
    AgentNotFound { task: String, agent: String },

    #[error("invalid catalog document: {0}")]
    Parse(String),

    #[error("filesystem error: {0}")]
    FileSystem(String),
}
