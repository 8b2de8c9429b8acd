use crate::uri::{OrderUri, StepUri, WorkflowUri};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution state of a single worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Ready,
    Running,
    Blocked,
    Finished,
    Error,
    Cancelled,
}

impl WorkerState {
    /// Terminal workers never execute another step
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Finished | WorkerState::Error | WorkerState::Cancelled
        )
    }
}

/// Aggregate state of a work order; also used for step records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    New,
    Active,
    Blocked,
    Finished,
    Error,
    Cancelled,
}

/// Captured failure detail attached to a worker or step record once terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub message: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ExceptionInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }
}

/// One running instance of a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub uri: OrderUri,
    pub workflow_uri: WorkflowUri,
    /// Every worker id ever created for this order
    pub worker_ids: Vec<String>,
    /// Worker ids not yet terminal
    pub pending_ids: Vec<String>,
    pub status: OrderState,
    pub start_time: DateTime<Utc>,
    /// Set exactly once, when the last pending worker completes
    pub end_time: Option<DateTime<Utc>>,
    /// Populated from the final worker's ephemeral output document
    #[serde(default)]
    pub outputs: HashMap<String, String>,
    /// Starting parameters; hashed (timestamps excluded) for metrics correlation
    #[serde(default)]
    pub init_args: HashMap<String, serde_json::Value>,
}

impl WorkOrder {
    pub fn new(uri: OrderUri, workflow_uri: WorkflowUri) -> Self {
        Self {
            uri,
            workflow_uri,
            worker_ids: Vec::new(),
            pending_ids: Vec::new(),
            status: OrderState::New,
            start_time: Utc::now(),
            end_time: None,
            outputs: HashMap::new(),
            init_args: HashMap::new(),
        }
    }

    pub fn register_worker(&mut self, id: &str) {
        self.worker_ids.push(id.to_string());
        self.pending_ids.push(id.to_string());
    }

    pub fn remove_pending(&mut self, id: &str) {
        self.pending_ids.retain(|p| p != id);
    }
}

/// One thread of control within a work order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub order_uri: OrderUri,
    /// Root workers get small integers; split children derive their id from
    /// the parent by digit/letter alternation
    pub id: String,
    /// Call stack of step URIs; top (last) is the step being executed, deeper
    /// entries are return addresses pushed by nested workflow calls
    pub stack: Vec<StepUri>,
    pub status: WorkerState,
    /// Parent worker id; empty for workers outside any join group
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub sibling_position: usize,
    #[serde(default)]
    pub sibling_count: usize,
    /// Number of split children this worker is still waiting on
    #[serde(default)]
    pub wait_count: usize,
    /// One view-overlay frame per nested workflow call, in lock-step with
    /// `app_status_names`
    #[serde(default)]
    pub local_view: Vec<HashMap<String, String>>,
    #[serde(default)]
    pub app_status_names: Vec<String>,
    /// Overlay of the step currently executing; cleared after each step
    #[serde(default)]
    pub view_overlay: HashMap<String, String>,
    pub effective_user: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub activity_id: Option<String>,
    /// Human-readable failure summary once terminal
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub exception_info: Option<ExceptionInfo>,
}

impl Worker {
    pub fn new(order_uri: OrderUri, id: impl Into<String>) -> Self {
        Self {
            order_uri,
            id: id.into(),
            stack: Vec::new(),
            status: WorkerState::Ready,
            parent: String::new(),
            sibling_position: 0,
            sibling_count: 0,
            wait_count: 0,
            local_view: Vec::new(),
            app_status_names: Vec::new(),
            view_overlay: HashMap::new(),
            effective_user: String::new(),
            priority: 0,
            activity_id: None,
            detail: None,
            exception_info: None,
        }
    }

    pub fn uri(&self) -> String {
        self.order_uri.worker_uri(&self.id)
    }

    /// Step currently at the top of the call stack
    pub fn current_step(&self) -> Option<&StepUri> {
        self.stack.last()
    }

    pub fn push_step(&mut self, step: StepUri) {
        self.stack.push(step);
    }

    pub fn pop_step(&mut self) -> Option<StepUri> {
        self.stack.pop()
    }

    /// Enter a nested workflow: push the step plus one frame on each
    /// auxiliary stack. Must stay paired with [`Worker::pop_frame`].
    pub fn push_frame(
        &mut self,
        step: StepUri,
        view: HashMap<String, String>,
        app_status_name: String,
    ) {
        self.stack.push(step);
        self.local_view.push(view);
        self.app_status_names.push(app_status_name);
    }

    /// Return from a nested workflow: pop the caller step off the call stack
    /// and one frame off each auxiliary stack
    pub fn pop_frame(&mut self) -> Option<StepUri> {
        let caller = self.stack.pop()?;
        self.local_view.pop();
        self.app_status_names.pop();
        Some(caller)
    }

    /// App-status document name for the workflow currently executing
    pub fn app_status_name(&self) -> Option<&str> {
        self.app_status_names
            .last()
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Effective view for alias resolution: innermost local view under the
    /// per-step overlay
    pub fn effective_view(&self) -> HashMap<String, String> {
        let mut view = match self.local_view.last() {
            Some(local) => local.clone(),
            None => HashMap::new(),
        };
        view.extend(
            self.view_overlay
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        view
    }

    pub fn in_join_group(&self) -> bool {
        !self.parent.is_empty()
    }
}

/// Countdown tracking how many split children must finish before the parent
/// resumes; at most one exists per outstanding split group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinCountdown {
    pub order_uri: OrderUri,
    pub parent_id: String,
    pub wait_count: usize,
}

/// Record of one executed step, appended per worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_uri: StepUri,
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub hostname: String,
    pub status: OrderState,
    #[serde(default)]
    pub return_value: Option<String>,
    #[serde(default)]
    pub exception: Option<ExceptionInfo>,
    #[serde(default)]
    pub activity_id: Option<String>,
}

/// External progress document for one work order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatus {
    pub name: String,
    pub order_uri: OrderUri,
    pub overall_status: OrderState,
    pub last_updated: DateTime<Utc>,
}

/// All app-status documents sharing one name, keyed by order URI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatusGroup {
    pub name: String,
    #[serde(default)]
    pub id_to_status: HashMap<String, AppStatus>,
}

impl AppStatusGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_to_status: HashMap::new(),
        }
    }

    /// Status entry for the given order, created on first touch
    pub fn entry(&mut self, order_uri: &OrderUri) -> &mut AppStatus {
        let name = self.name.clone();
        self.id_to_status
            .entry(order_uri.as_str().to_string())
            .or_insert_with(|| AppStatus {
                name,
                order_uri: order_uri.clone(),
                overall_status: OrderState::New,
                last_updated: Utc::now(),
            })
    }
}
