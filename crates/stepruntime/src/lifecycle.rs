//! Work-order lifecycle: creation, start, completion, aggregate status, and
//! the app-status/metrics bookkeeping that rides along with completion.

use crate::context;
use crate::engine::StepEngine;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::{
    AppStatusGroup, DefinitionError, EngineError, ExceptionInfo, OrderState, OrderUri, StatusEvent,
    Step, WorkOrder, Worker, WorkerState, Workflow, WorkflowUri,
};
use uuid::Uuid;

/// Id given to the first worker of every order
pub const ROOT_WORKER_ID: &str = "0";

/// Stable digest of an order's starting parameters, timestamps excluded.
/// Repeated runs of the same logical job hash identically.
pub fn initial_args_hash(args: &HashMap<String, serde_json::Value>) -> String {
    let mut keys: Vec<&String> = args.keys().collect();
    keys.sort();
    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(args[key].to_string().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Aggregate order status as a pure function of member worker states
pub fn aggregate_status(states: &[WorkerState], final_pass: bool) -> OrderState {
    if final_pass {
        if states.iter().any(|s| *s == WorkerState::Error) {
            OrderState::Error
        } else if states.iter().any(|s| *s == WorkerState::Cancelled) {
            OrderState::Cancelled
        } else {
            OrderState::Finished
        }
    } else if states
        .iter()
        .any(|s| matches!(s, WorkerState::Running | WorkerState::Ready))
    {
        OrderState::Active
    } else if states.iter().any(|s| *s == WorkerState::Blocked) {
        OrderState::Blocked
    } else {
        OrderState::Active
    }
}

impl StepEngine {
    /// Instantiate a workflow: build the work order and its root worker,
    /// persist both, and record the initial-arguments hash. The order is not
    /// running until [`StepEngine::start`] publishes the first step.
    pub async fn create_work_order(
        &self,
        workflow_uri: &WorkflowUri,
        args: HashMap<String, serde_json::Value>,
        effective_user: &str,
        priority: i32,
    ) -> Result<(WorkOrder, Worker), EngineError> {
        let flow = self
            .workflows
            .workflow(workflow_uri)
            .await?
            .ok_or_else(|| DefinitionError::WorkflowNotFound(workflow_uri.to_string()))?;
        let start_uri = flow
            .start_uri()
            .ok_or_else(|| DefinitionError::NoStartStep(workflow_uri.to_string()))?;

        let order_uri = OrderUri::generate(workflow_uri);
        let mut order = WorkOrder::new(order_uri.clone(), workflow_uri.clone());
        order.init_args = args.clone();
        order.register_worker(ROOT_WORKER_ID);

        self.store
            .set_context_value(
                &order_uri,
                "__date_string",
                &format!(
                    "{}{}",
                    context::LITERAL_MARKER,
                    Utc::now().format("%Y%m%d")
                ),
            )
            .await?;
        self.store
            .save_args_hash(&order_uri, &initial_args_hash(&args))
            .await?;

        let mut worker = Worker::new(order_uri, ROOT_WORKER_ID);
        worker.effective_user = effective_user.to_string();
        worker.priority = priority;
        worker.activity_id = Some(Uuid::new_v4().to_string());
        worker.local_view.push(flow.view.clone());
        let app_status = self.create_app_status_name(&flow, &worker).await;
        worker.app_status_names.push(app_status);
        worker.push_step(start_uri);

        self.store.save_order(&order).await?;
        self.store.save_worker(&worker).await?;
        Ok((order, worker))
    }

    /// Publish an order's root worker for pickup of its first step
    pub async fn start(&self, worker: &Worker) -> Result<(), EngineError> {
        let step_uri = worker
            .current_step()
            .cloned()
            .ok_or_else(|| EngineError::Execution(format!(
                "Start step not found for work order {}",
                worker.order_uri
            )))?;
        let category = self.step_category(&step_uri).await?;
        if category.is_empty() {
            return Err(DefinitionError::NoCategory(step_uri.to_string()).into());
        }
        self.record_worker_activity(worker, &format!("Step {}", step_uri))
            .await;
        self.publish_step(worker, &category).await
    }

    /// Flag an order for cooperative cancellation; checked at the next step
    /// boundary of each of its workers
    pub async fn request_cancel(&self, order_uri: &OrderUri) -> Result<(), EngineError> {
        self.store.request_cancel(order_uri).await?;
        Ok(())
    }

    /// Drive a worker into a terminal state and settle the work-order
    /// bookkeeping that depends on it. Always runs under the order lock:
    /// deciding "am I the last pending worker" is a shared-state read.
    pub(crate) async fn mark_as_finished(
        &self,
        order: &mut WorkOrder,
        worker: &mut Worker,
        status: WorkerState,
        exception: Option<ExceptionInfo>,
    ) -> Result<(), EngineError> {
        let lock = self.grab_order_lock(order, worker, true).await?;
        let outcome = self.finish_under_lock(order, worker, status, exception).await;
        self.release_order_lock(lock).await;
        let parent_to_wake = outcome?;

        if let Some(parent) = parent_to_wake {
            let litter = worker.sibling_count;
            self.awaken_worker(order, parent, litter).await?;
        }
        self.emit_event(StatusEvent::new(
            order.uri.clone(),
            worker.id.clone(),
            status,
        ));
        Ok(())
    }

    async fn finish_under_lock(
        &self,
        order: &mut WorkOrder,
        worker: &mut Worker,
        status: WorkerState,
        exception: Option<ExceptionInfo>,
    ) -> Result<Option<Worker>, EngineError> {
        worker.status = status;
        if let Some(exc) = exception {
            if worker.detail.is_none() {
                worker.detail = Some(format!("State is {:?} due to exception", status));
            }
            worker.exception_info = Some(exc);
        } else if status == WorkerState::Error && worker.detail.is_none() {
            worker.detail = Some("Error is not due to an exception".to_string());
        }
        self.store.save_worker(worker).await?;

        let mut parent_to_wake = None;
        if worker.in_join_group() {
            match self.store.load_countdown(&order.uri, &worker.parent).await? {
                Some(countdown) if countdown.wait_count <= 1 => {
                    parent_to_wake = self.store.load_worker(&order.uri, &worker.parent).await?;
                    if parent_to_wake.is_none() {
                        tracing::error!(
                            "No record of parent worker {} in {}",
                            worker.parent,
                            order.uri
                        );
                    }
                    self.store.delete_countdown(&order.uri, &worker.parent).await?;
                }
                Some(mut countdown) => {
                    countdown.wait_count -= 1;
                    self.store.save_countdown(&countdown).await?;
                }
                None => tracing::error!(
                    "No join countdown for parent {} of worker {}",
                    worker.parent,
                    worker.uri()
                ),
            }
        } else if order.pending_ids.len() == 1 && order.pending_ids[0] == worker.id {
            // last pending worker: seal the order
            if order.end_time.is_none() {
                order.end_time = Some(Utc::now());
            }
            self.store.save_order(order).await?;
            let overall = self.compute_order_status(order, true).await?;
            order.status = overall;
            self.record_app_status_ended(order, worker).await;
            self.submit_metrics(order, overall);
        } else {
            order.status = self.compute_order_status(order, false).await?;
        }

        order.remove_pending(&worker.id);

        // merge the worker's ephemeral output document; last write wins
        if let Some(doc) = self.store.output_document(&order.uri).await? {
            for (key, value) in doc {
                let rendered = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                order.outputs.insert(key, rendered);
            }
        }
        self.store.save_order(order).await?;
        Ok(parent_to_wake)
    }

    pub(crate) async fn compute_order_status(
        &self,
        order: &WorkOrder,
        final_pass: bool,
    ) -> Result<OrderState, EngineError> {
        let mut states = Vec::with_capacity(order.worker_ids.len());
        for id in &order.worker_ids {
            if let Some(worker) = self.store.load_worker(&order.uri, id).await? {
                states.push(worker.status);
            }
        }
        Ok(aggregate_status(&states, final_pass))
    }

    fn submit_metrics(&self, order: &WorkOrder, status: OrderState) {
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let order = order.clone();
        tokio::spawn(async move {
            let args_hash = match store.args_hash(&order.uri).await {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::error!("Failed to read args hash for {}: {}", order.uri, e);
                    None
                }
            };
            metrics.order_finished(&order, args_hash, status).await;
        });
    }

    /// Name of the app-status document for a workflow, from its `%`-template
    /// pattern evaluated against the execution context
    pub(crate) async fn create_app_status_name(&self, flow: &Workflow, worker: &Worker) -> String {
        let pattern = flow
            .app_status_pattern
            .clone()
            .unwrap_or_else(|| format!("%{}/${{__date_string}}", flow.uri.path()));
        if pattern.len() <= 1 || !pattern.starts_with('%') {
            tracing::error!(
                "App-status pattern must start with '%' and name something: {}",
                pattern
            );
            return String::new();
        }
        let view = worker.effective_view();
        match context::eval_template(
            self.store.as_ref(),
            &worker.order_uri,
            &pattern[1..],
            &view,
        )
        .await
        {
            Ok(name) => name.trim_start_matches('/').to_string(),
            Err(e) => {
                tracing::warn!("Failed to evaluate app-status pattern '{}': {}", pattern, e);
                String::new()
            }
        }
    }

    pub(crate) async fn record_app_status_step_start(
        &self,
        order: &WorkOrder,
        worker: &Worker,
        step: &Step,
    ) {
        let Some(name) = worker.app_status_name() else {
            return;
        };
        let log_uri = workflow_audit_log(name, Some(&order.uri), Some(&step.name));
        self.audit
            .write(&log_uri, "workflow", 1, &format!("{} started", step.name))
            .await;
        self.touch_app_status(name, order).await;
    }

    pub(crate) async fn record_app_status_step_finish(
        &self,
        order: &WorkOrder,
        worker: &Worker,
        step: &Step,
    ) {
        let Some(name) = worker.app_status_name() else {
            return;
        };
        let log_uri = workflow_audit_log(name, Some(&order.uri), Some(&step.name));
        self.audit
            .write(&log_uri, "workflow", 1, &format!("{} finished", step.name))
            .await;
        self.touch_app_status(name, order).await;
    }

    pub(crate) async fn record_app_status_ended(&self, order: &WorkOrder, worker: &Worker) {
        let Some(name) = worker.app_status_name() else {
            return;
        };
        self.touch_app_status(name, order).await;
    }

    async fn touch_app_status(&self, name: &str, order: &WorkOrder) {
        let result: Result<(), EngineError> = async {
            let mut group = self
                .store
                .load_app_status(name)
                .await?
                .unwrap_or_else(|| AppStatusGroup::new(name));
            let entry = group.entry(&order.uri);
            entry.overall_status = order.status;
            entry.last_updated = Utc::now();
            self.store.save_app_status(&group).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::error!("Failed to update app status '{}': {}", name, e);
        }
    }

    /// Audit-log URI for the workflow currently executing, if it reports one
    pub(crate) fn workflow_audit_uri(&self, worker: &Worker) -> Option<String> {
        worker
            .app_status_name()
            .map(|name| workflow_audit_log(name, None, None))
    }

    pub(crate) async fn record_worker_activity(&self, worker: &Worker, message: &str) {
        if let Some(activity_id) = &worker.activity_id {
            self.activity.update(activity_id, message).await;
        }
    }

    pub(crate) async fn record_worker_finished_activity(&self, worker: &Worker, message: &str) {
        if let Some(activity_id) = &worker.activity_id {
            self.activity.finish(activity_id, message).await;
        }
    }
}

/// Audit-trail location derived from the app-status name, optionally narrowed
/// to one order and one step
pub(crate) fn workflow_audit_log(
    app_status_name: &str,
    order_uri: Option<&OrderUri>,
    step_name: Option<&str>,
) -> String {
    let mut uri = format!("//workflow/{}", app_status_name);
    if let Some(order) = order_uri {
        let number = order
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default();
        uri.push('/');
        uri.push_str(number);
    }
    if let Some(step) = step_name {
        uri.push('/');
        uri.push_str(step);
    }
    uri
}
