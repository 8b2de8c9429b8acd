//! The step executor: runs one step of one worker to completion, updates the
//! persisted records, and either suspends, terminates, or advances the
//! worker. Steps arrive here one at a time from whatever consumer picked the
//! worker off the transport; everything durable happens through the store, so
//! a crash between steps loses at most one step's progress.

use crate::context;
use crate::engine::StepEngine;
use crate::transition::resolve_transition;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use stepcore::{
    codes, DefinitionError, EngineError, ExceptionInfo, Executable, InvokeContext, InvokeError,
    OrderState, ScriptVals, SpecialForm, Step, StepRecord, StepUri, WorkOrder, Worker, WorkerState,
    Workflow,
};

impl StepEngine {
    /// Execute the step at the top of the worker's call stack.
    ///
    /// Nothing is allowed to leave the worker in a RUNNING state when this
    /// returns: executable failures are recorded and consumed, while
    /// definition errors and post-step bookkeeping failures are re-raised
    /// after the worker reaches a terminal state.
    pub async fn execute_step(&self, worker: &mut Worker) -> Result<(), EngineError> {
        let mut order = self.store.load_order(&worker.order_uri).await?;
        worker.status = WorkerState::Running;
        self.store.save_worker(worker).await?;
        order.status = self.compute_order_status(&order, false).await?;
        self.store.save_order(&order).await?;

        // don't pop the stack just yet; this entry is what we are executing
        let step_uri = worker.current_step().cloned().ok_or_else(|| {
            EngineError::Execution(format!("Worker {} has an empty call stack", worker.uri()))
        })?;
        tracing::info!("Processing step: {}", step_uri);

        let (flow, step) = match self.workflow_with_step(&step_uri).await {
            Ok(pair) => pair,
            Err(e) => {
                self.fail_worker(&mut order, worker, &e).await;
                return Err(e);
            }
        };
        let Some(step) = step else {
            let e: EngineError = DefinitionError::StepNotFound(step_uri.to_string()).into();
            self.fail_worker(&mut order, worker, &e).await;
            return Err(e);
        };

        let worker_uri = worker.uri();

        // run the step; every failure in here collapses into one error object
        self.record_worker_activity(worker, &format!("Start {}", step.name))
            .await;
        let mut failure: Option<EngineError> = None;
        let mut code: Option<String> = None;
        let mut record: Option<StepRecord> = None;
        match self.pre_execute_step(&order, worker, &step, &step_uri).await {
            Ok(rec) => {
                self.record_worker_activity(worker, &format!("Execute {}", step.name))
                    .await;
                match self
                    .run_executable(&step, &flow, worker, &worker_uri, &rec)
                    .await
                {
                    Ok(c) => code = Some(c),
                    Err(e) => failure = Some(e),
                }
                record = Some(rec);
            }
            Err(e) => failure = Some(e),
        }

        // always mark the step as finished, then pop the stack, regardless of
        // what transition is about to be taken
        let transition_code = code.unwrap_or_default();
        self.record_worker_activity(
            worker,
            &format!("Returned {} from {}", transition_code, step.name),
        )
        .await;
        let post = self
            .post_execute_step(
                &order,
                worker,
                &step,
                &step_uri,
                &transition_code,
                record,
                failure.as_ref(),
            )
            .await;
        worker.pop_step();

        if let Err(post_err) = post {
            // the step may have succeeded, but state we failed to record
            // cannot be trusted
            tracing::error!("Post-step bookkeeping failed: {}", post_err);
            let exc = ExceptionInfo::new(post_err.to_string());
            self.mark_as_finished(&mut order, worker, WorkerState::Error, Some(exc))
                .await?;
            return Err(post_err);
        }

        if let Some(err) = failure {
            tracing::error!("Step failed with error - {}", err);
            let exc = ExceptionInfo::new(err.to_string());
            self.mark_as_finished(&mut order, worker, WorkerState::Error, Some(exc))
                .await?;
            return match err {
                EngineError::Definition(_) => Err(err),
                _ => Ok(()),
            };
        }

        // check if the order was cancelled before we go any further
        if self.store.cancel_requested(&order.uri).await? {
            self.mark_as_finished(&mut order, worker, WorkerState::Cancelled, None)
                .await?;
            self.record_worker_finished_activity(worker, "Cancelled").await;
            return Ok(());
        }

        match transition_code.as_str() {
            // the executable already re-enqueued this worker
            codes::REPUBLISHED => Ok(()),
            codes::SUSPEND => {
                worker.status = WorkerState::Blocked;
                self.store.save_worker(worker).await?;
                order.status = self.compute_order_status(&order, false).await?;
                self.store.save_order(&order).await?;
                Ok(())
            }
            codes::JOIN => {
                self.mark_as_finished(&mut order, worker, WorkerState::Finished, None)
                    .await?;
                self.record_worker_finished_activity(worker, "Joined").await;
                Ok(())
            }
            codes::FAIL => {
                self.mark_as_finished(&mut order, worker, WorkerState::Error, None)
                    .await?;
                self.record_worker_finished_activity(worker, "Failed").await;
                Ok(())
            }
            codes::CANCEL => {
                self.mark_as_finished(&mut order, worker, WorkerState::Cancelled, None)
                    .await?;
                self.record_worker_finished_activity(worker, "Cancelled").await;
                Ok(())
            }
            _ => {
                let result = self
                    .transition_worker(worker, &mut order, step, step_uri, transition_code.clone())
                    .await;
                if let Err(e) = result {
                    if !worker.status.is_terminal() {
                        self.fail_worker(&mut order, worker, &e).await;
                    }
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    /// Resolve the step's return code and act on the target: terminal action,
    /// call-stack return, or a push-and-publish to the named next step.
    pub(crate) async fn transition_worker(
        &self,
        worker: &mut Worker,
        order: &mut WorkOrder,
        mut step: Step,
        mut step_uri: StepUri,
        mut code: String,
    ) -> Result<(), EngineError> {
        loop {
            tracing::trace!("Step {} executed, transition code: {}", step.name, code);
            let transition = resolve_transition(&step, &code);
            if transition.target.is_empty() {
                return Err(DefinitionError::EmptyTransitionTarget {
                    step: step.name.clone(),
                    transition: transition.name.clone(),
                }
                .into());
            }
            if let Some(rest) = transition.target.strip_prefix(codes::RETURN) {
                if worker.stack.is_empty() {
                    // top-level return
                    self.mark_as_finished(order, worker, WorkerState::Finished, None)
                        .await?;
                    self.record_worker_finished_activity(worker, "Finished").await;
                    return Ok(());
                }
                // pop the caller's frame: its step becomes current, and the
                // view/app-status frames pushed on entry come off with it
                let caller = match worker.pop_frame() {
                    Some(caller) => caller,
                    None => {
                        return Err(EngineError::Execution(format!(
                            "Call stack underflow in worker {}",
                            worker.uri()
                        )))
                    }
                };
                self.store.save_worker(worker).await?;
                let (_, caller_step) = self.workflow_with_step(&caller).await?;
                let Some(caller_step) = caller_step else {
                    let e: EngineError =
                        DefinitionError::StepNotFound(caller.to_string()).into();
                    self.mark_as_finished(
                        order,
                        worker,
                        WorkerState::Error,
                        Some(ExceptionInfo::new(e.to_string())),
                    )
                    .await?;
                    return Err(e);
                };
                if let Some(var) = rest.strip_prefix(':') {
                    // `$RETURN:X` names a context variable holding the actual
                    // transition code to re-resolve against the caller step
                    code = self
                        .return_code_from_context(worker, var)
                        .await?
                        .unwrap_or_default();
                    tracing::debug!("Worker {} return transition: {}", worker.uri(), code);
                }
                self.record_app_status_step_finish(order, worker, &caller_step)
                    .await;
                step = caller_step;
                step_uri = caller;
                continue;
            }
            match transition.target.as_str() {
                codes::FAIL => {
                    self.mark_as_finished(order, worker, WorkerState::Error, None)
                        .await?;
                    self.record_worker_finished_activity(worker, "Failed").await;
                    return Ok(());
                }
                codes::CANCEL => {
                    self.mark_as_finished(order, worker, WorkerState::Cancelled, None)
                        .await?;
                    self.record_worker_finished_activity(worker, "Cancelled").await;
                    return Ok(());
                }
                codes::JOIN => {
                    self.mark_as_finished(order, worker, WorkerState::Finished, None)
                        .await?;
                    self.record_worker_finished_activity(worker, "Joined").await;
                    return Ok(());
                }
                target => {
                    let next = step_uri.with_step(target);
                    tracing::trace!("Target transition: {}", next);
                    worker.push_step(next.clone());
                    let category = self.step_category(&next).await?;
                    self.store.save_worker(worker).await?;
                    self.publish_step(worker, &category).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Dispatch on the executable's special form or URI scheme. The returned
    /// string is the transition code, or one of the internal sentinels.
    async fn run_executable(
        &self,
        step: &Step,
        flow: &Workflow,
        worker: &mut Worker,
        worker_uri: &str,
        record: &StepRecord,
    ) -> Result<String, EngineError> {
        match Executable::parse(&step.executable) {
            Executable::Special(SpecialForm::Return(value)) => {
                let code = match value {
                    Some(raw) => self
                        .return_code_from_context(worker, &raw)
                        .await?
                        .unwrap_or_default(),
                    None => String::new(),
                };
                tracing::info!("Worker {} returned: {}", worker_uri, code);
                Ok(code)
            }
            Executable::Special(SpecialForm::Split(names)) => {
                self.publish_split_children(worker, step, flow, &names).await?;
                Ok(codes::REPUBLISHED.to_string())
            }
            Executable::Special(SpecialForm::Join) => Ok(codes::JOIN.to_string()),
            Executable::Special(SpecialForm::Fork(names)) => {
                self.publish_fork_children(worker, step, flow, &names).await?;
                Ok(codes::OKAY.to_string())
            }
            Executable::Special(SpecialForm::Fail) => Ok(codes::FAIL.to_string()),
            Executable::Special(SpecialForm::Cancel) => Ok(codes::CANCEL.to_string()),
            Executable::Script(script_uri) => {
                let vals = ScriptVals {
                    order_uri: worker.order_uri.clone(),
                    worker_uri: worker_uri.to_string(),
                    worker_id: worker.id.clone(),
                    audit_log_uri: self.workflow_audit_uri(worker),
                    step_name: step.name.clone(),
                    step_start_time: record.start_time,
                };
                let limit = step.soft_timeout_secs.map(Duration::from_secs);
                let result = self.scripts.run(&script_uri, &vals, limit).await?;
                Ok(result.unwrap_or_default())
            }
            Executable::Workflow(raw) => {
                self.enter_nested_workflow(worker, &raw).await?;
                Ok(codes::REPUBLISHED.to_string())
            }
            Executable::Invocable { authority, uri } => {
                let handler = self
                    .registry
                    .get(&authority)
                    .ok_or(DefinitionError::UnknownInvocable(authority))?;
                let ctx = InvokeContext {
                    order_uri: &worker.order_uri,
                    worker_uri: worker_uri.to_string(),
                    worker_id: &worker.id,
                    step_name: &step.name,
                    step_start_time: record.start_time,
                    view: worker.effective_view(),
                    store: self.store.as_ref(),
                };
                tracing::debug!("Invoking {} for step {}", uri, step.name);
                let code = match step.soft_timeout_secs {
                    Some(seconds) => {
                        match tokio::time::timeout(
                            Duration::from_secs(seconds),
                            handler.invoke(ctx),
                        )
                        .await
                        {
                            Ok(result) => result?,
                            Err(_) => return Err(InvokeError::Timeout { seconds }.into()),
                        }
                    }
                    None => handler.invoke(ctx).await?,
                };
                Ok(code)
            }
            Executable::Unknown(raw) => {
                if raw.starts_with('$') {
                    Err(DefinitionError::UnknownSpecialForm(raw).into())
                } else {
                    tracing::error!("Unsupported executable URI: {}", raw);
                    Ok(codes::SUSPEND.to_string())
                }
            }
        }
    }

    /// Push a nested workflow call frame and republish the worker at the
    /// nested start step
    async fn enter_nested_workflow(
        &self,
        worker: &mut Worker,
        raw_uri: &str,
    ) -> Result<(), EngineError> {
        let target = StepUri::new(raw_uri);
        let flow_uri = target.workflow();
        let nested = self
            .workflows
            .workflow(&flow_uri)
            .await?
            .ok_or_else(|| DefinitionError::WorkflowNotFound(flow_uri.to_string()))?;
        let step_name = match target.step_name() {
            Some(name) => name.to_string(),
            None => nested
                .start_step
                .clone()
                .ok_or_else(|| DefinitionError::NoStartStep(raw_uri.to_string()))?,
        };
        let nested_step_uri = flow_uri.step(&step_name);
        let category = self.step_category(&nested_step_uri).await?;
        let app_status_name = self.create_app_status_name(&nested, worker).await;
        worker.push_frame(nested_step_uri, nested.view.clone(), app_status_name);
        self.store.save_worker(worker).await?;
        self.publish_step(worker, &category).await?;
        Ok(())
    }

    /// Prepare the context overlay and step record before the executable runs
    async fn pre_execute_step(
        &self,
        order: &WorkOrder,
        worker: &mut Worker,
        step: &Step,
        step_uri: &StepUri,
    ) -> Result<StepRecord, EngineError> {
        worker.view_overlay = step.view.clone();
        self.record_app_status_step_start(order, worker, step).await;
        self.store.save_worker(worker).await?;

        let record = StepRecord {
            step_uri: step_uri.clone(),
            name: step.name.clone(),
            start_time: Utc::now(),
            end_time: None,
            hostname: self.config.hostname.clone(),
            status: OrderState::Active,
            return_value: None,
            exception: None,
            activity_id: worker.activity_id.clone(),
        };
        self.store
            .append_step_record(&order.uri, &worker.id, &record)
            .await?;
        Ok(record)
    }

    /// Finish the step record and per-step worker state. Runs on every exit
    /// path, error or not.
    #[allow(clippy::too_many_arguments)]
    async fn post_execute_step(
        &self,
        order: &WorkOrder,
        worker: &mut Worker,
        step: &Step,
        step_uri: &StepUri,
        code: &str,
        record: Option<StepRecord>,
        failure: Option<&EngineError>,
    ) -> Result<(), EngineError> {
        match record {
            None => tracing::error!("Step {} ended but no step record was created", step_uri),
            Some(mut record) => {
                if record.step_uri == *step_uri {
                    record.end_time = Some(Utc::now());
                    record.return_value = Some(code.to_string());
                    let transition = resolve_transition(step, code);
                    let failed = failure.is_some() || transition.target == codes::FAIL;
                    if failed {
                        record.status = OrderState::Error;
                        if let Some(err) = failure {
                            record.exception = Some(ExceptionInfo::new(err.to_string()));
                        }
                        if worker.detail.is_none() {
                            worker.detail = Some(format!(
                                "Target step is {} - exception is {}",
                                transition.target,
                                if failure.is_some() { "present" } else { "absent" }
                            ));
                        }
                        if let Some(activity_id) = &record.activity_id {
                            self.activity.abort(activity_id, "Step failed").await;
                        }
                    } else {
                        record.status = OrderState::Finished;
                        if let Some(activity_id) = &record.activity_id {
                            self.activity.finish(activity_id, "Step finished").await;
                        }
                    }
                    self.store
                        .update_step_record(&order.uri, &worker.id, &record)
                        .await?;
                } else {
                    tracing::error!(
                        "Step '{}' ended but last recorded was '{}' in worker {}",
                        step_uri,
                        record.step_uri,
                        worker.uri()
                    );
                }
            }
        }
        self.record_app_status_step_finish(order, worker, step).await;
        worker.view_overlay = HashMap::new();
        self.store.save_worker(worker).await?;
        Ok(())
    }

    /// Resolve a `$RETURN` operand through the execution context: naked
    /// values are literals, `$`-prefixed values are variable lookups
    async fn return_code_from_context(
        &self,
        worker: &Worker,
        raw: &str,
    ) -> Result<Option<String>, EngineError> {
        let alias = context::treat_as_default_literal(raw);
        if alias.is_empty() {
            return Ok(None);
        }
        let view = worker.effective_view();
        context::get_context_value(self.store.as_ref(), &worker.order_uri, &alias, &view).await
    }

    async fn fail_worker(&self, order: &mut WorkOrder, worker: &mut Worker, err: &EngineError) {
        let exc = ExceptionInfo::new(err.to_string());
        if let Err(e) = self
            .mark_as_finished(order, worker, WorkerState::Error, Some(exc))
            .await
        {
            tracing::error!("Failed to record worker error state: {}", e);
        }
    }
}
