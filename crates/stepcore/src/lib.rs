//! Core abstractions for the step engine
//!
//! This crate provides the data model, collaborator traits, and event
//! plumbing that the runtime crate depends on. It contains no engine logic.

mod error;
pub mod events;
mod order;
mod traits;
mod uri;
mod workflow;

pub use error::{
    DefinitionError, EngineError, InvokeError, LockError, StoreError, TransportError,
};
pub use order::{
    AppStatus, AppStatusGroup, ExceptionInfo, JoinCountdown, OrderState, StepRecord, WorkOrder,
    Worker, WorkerState,
};
pub use traits::{
    ActivityTracker, AuditLog, Invocable, InvokeContext, LockHandle, LockService, MetricsSink,
    NullActivity, NullAudit, NullMetrics, OrderStore, ScriptRuntime, ScriptVals, Transport,
    WorkflowStore,
};
pub use uri::{split_worker_uri, OrderUri, StepUri, WorkflowUri};
pub use workflow::{codes, Executable, SpecialForm, Step, Transition, Workflow};
pub use events::*;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
