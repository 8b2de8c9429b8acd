use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Invocation error: {0}")]
    Invoke(#[from] InvokeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Execution error: {0}")]
    Execution(String),
}

/// Errors in the workflow definition itself; always fatal for the worker
#[derive(Error, Debug, Clone)]
pub enum DefinitionError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Step to be executed not found: {0}")]
    StepNotFound(String),

    #[error("Empty target in transition '{transition}' of step '{step}'")]
    EmptyTransitionTarget { step: String, transition: String },

    #[error("Unable to determine start step for {0}")]
    NoStartStep(String),

    #[error("Unable to determine category for step {0}")]
    NoCategory(String),

    #[error("Unknown special form: {0}")]
    UnknownSpecialForm(String),

    #[error("No invocable registered for authority '{0}'")]
    UnknownInvocable(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage backend failure: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Timed out waiting for lock '{0}'")]
    Timeout(String),

    #[error("Lock service failure: {0}")]
    Backend(String),
}

/// Failure inside a step executable; captured, never allowed to crash the executor
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("Executable failed: {0}")]
    Failed(String),

    #[error("Timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Missing context value: {0}")]
    MissingContext(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to transport: {0}")]
    Connection(String),

    #[error("Failed to publish worker: {0}")]
    Publish(String),

    #[error("Failed to serialize worker: {0}")]
    Serialization(String),

    #[error("Failed to poll workers: {0}")]
    Poll(String),
}
