use crate::error::{InvokeError, LockError, StoreError, TransportError};
use crate::order::{AppStatusGroup, JoinCountdown, OrderState, StepRecord, WorkOrder, Worker};
use crate::uri::{OrderUri, WorkflowUri};
use crate::workflow::Workflow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Keyed, last-write-wins persistence for everything the engine must not lose
/// between steps. A crash between two steps loses at most one step's progress.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn load_order(&self, uri: &OrderUri) -> Result<WorkOrder, StoreError>;
    async fn save_order(&self, order: &WorkOrder) -> Result<(), StoreError>;

    async fn load_worker(&self, uri: &OrderUri, id: &str) -> Result<Option<Worker>, StoreError>;
    async fn save_worker(&self, worker: &Worker) -> Result<(), StoreError>;

    async fn load_countdown(
        &self,
        uri: &OrderUri,
        parent_id: &str,
    ) -> Result<Option<JoinCountdown>, StoreError>;
    async fn save_countdown(&self, countdown: &JoinCountdown) -> Result<(), StoreError>;
    async fn delete_countdown(&self, uri: &OrderUri, parent_id: &str) -> Result<(), StoreError>;

    /// Append a record for a step that just started
    async fn append_step_record(
        &self,
        uri: &OrderUri,
        worker_id: &str,
        record: &StepRecord,
    ) -> Result<(), StoreError>;
    /// Update the record matching `record.start_time`
    async fn update_step_record(
        &self,
        uri: &OrderUri,
        worker_id: &str,
        record: &StepRecord,
    ) -> Result<(), StoreError>;
    async fn step_records(
        &self,
        uri: &OrderUri,
        worker_id: &str,
    ) -> Result<Vec<StepRecord>, StoreError>;

    /// Execution-context fields, scoped per work order
    async fn context_value(&self, uri: &OrderUri, name: &str)
        -> Result<Option<String>, StoreError>;
    async fn set_context_value(
        &self,
        uri: &OrderUri,
        name: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    async fn load_app_status(&self, name: &str) -> Result<Option<AppStatusGroup>, StoreError>;
    async fn save_app_status(&self, group: &AppStatusGroup) -> Result<(), StoreError>;

    /// Cooperative cancellation flag, checked once per step boundary
    async fn cancel_requested(&self, uri: &OrderUri) -> Result<bool, StoreError>;
    async fn request_cancel(&self, uri: &OrderUri) -> Result<(), StoreError>;

    /// Ephemeral output document merged into the order's outputs at completion
    async fn set_output_value(
        &self,
        uri: &OrderUri,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError>;
    async fn output_document(
        &self,
        uri: &OrderUri,
    ) -> Result<Option<HashMap<String, serde_json::Value>>, StoreError>;

    /// Stable digest of the order's starting parameters
    async fn save_args_hash(&self, uri: &OrderUri, hash: &str) -> Result<(), StoreError>;
    async fn args_hash(&self, uri: &OrderUri) -> Result<Option<String>, StoreError>;
}

/// Read-only access to workflow definitions
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn workflow(&self, uri: &WorkflowUri) -> Result<Option<Workflow>, StoreError>;
}

/// Hands a runnable worker to whatever node picks it up next. Publishing must
/// happen only after the bookkeeping describing the worker is durably
/// committed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, worker: &Worker, category: &str) -> Result<(), TransportError>;
}

/// Opaque proof of lock ownership, threaded through acquire/release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub token: u64,
}

/// External distributed lock manager with bounded wait and bounded hold
#[async_trait]
pub trait LockService: Send + Sync {
    /// Returns `None` when the lock could not be acquired within `wait`
    async fn acquire(
        &self,
        name: &str,
        wait: Duration,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, LockError>;
    async fn release(&self, name: &str, handle: LockHandle) -> Result<bool, LockError>;
}

/// Context variables injected into every script invocation
#[derive(Debug, Clone)]
pub struct ScriptVals {
    pub order_uri: OrderUri,
    pub worker_uri: String,
    pub worker_id: String,
    pub audit_log_uri: Option<String>,
    pub step_name: String,
    pub step_start_time: DateTime<Utc>,
}

/// External script interpreter. The stringified output is the transition
/// code; `None` or empty output selects the implicit default transition.
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    async fn run(
        &self,
        script_uri: &str,
        vals: &ScriptVals,
        time_limit: Option<Duration>,
    ) -> Result<Option<String>, InvokeError>;
}

/// Everything a native invocable may touch while running one step
pub struct InvokeContext<'a> {
    pub order_uri: &'a OrderUri,
    pub worker_uri: String,
    pub worker_id: &'a str,
    pub step_name: &'a str,
    pub step_start_time: DateTime<Utc>,
    /// Effective view of the executing worker
    pub view: HashMap<String, String>,
    pub store: &'a dyn OrderStore,
}

/// Statically registered native step handler, keyed by executable-URI
/// authority. The returned string is the transition code.
#[async_trait]
pub trait Invocable: Send + Sync {
    fn authority(&self) -> &str;
    async fn invoke(&self, ctx: InvokeContext<'_>) -> Result<String, InvokeError>;
}

/// Audit-trail sink; failures here must never fail a step
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn write(&self, log_uri: &str, category: &str, level: u8, message: &str);
}

/// Activity/progress tracking sink
#[async_trait]
pub trait ActivityTracker: Send + Sync {
    async fn update(&self, activity_id: &str, message: &str);
    async fn finish(&self, activity_id: &str, message: &str);
    async fn abort(&self, activity_id: &str, message: &str);
}

/// Metrics finalization, fed from a spawned task when an order completes
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn order_finished(&self, order: &WorkOrder, args_hash: Option<String>, status: OrderState);
}

/// No-op audit sink
pub struct NullAudit;

#[async_trait]
impl AuditLog for NullAudit {
    async fn write(&self, _log_uri: &str, _category: &str, _level: u8, _message: &str) {}
}

/// No-op activity sink
pub struct NullActivity;

#[async_trait]
impl ActivityTracker for NullActivity {
    async fn update(&self, _activity_id: &str, _message: &str) {}
    async fn finish(&self, _activity_id: &str, _message: &str) {}
    async fn abort(&self, _activity_id: &str, _message: &str) {}
}

/// No-op metrics sink
pub struct NullMetrics;

#[async_trait]
impl MetricsSink for NullMetrics {
    async fn order_finished(
        &self,
        _order: &WorkOrder,
        _args_hash: Option<String>,
        _status: OrderState,
    ) {
    }
}
