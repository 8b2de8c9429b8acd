use crate::registry::InvocableRegistry;
use std::sync::Arc;
use std::time::Duration;
use stepcore::{
    ActivityTracker, AuditLog, DefinitionError, EngineError, EventBus, LockService, MetricsSink,
    NullActivity, NullAudit, NullMetrics, OrderStore, ScriptRuntime, StatusEvent, Step, StepUri,
    Transport, Worker, Workflow, WorkflowStore,
};
use tokio::sync::broadcast;

/// Configuration for the step engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded wait for the work-order lock
    pub lock_wait: Duration,
    /// Bounded hold (TTL) for the work-order lock
    pub lock_ttl: Duration,
    pub event_capacity: usize,
    /// Recorded on every step record
    pub hostname: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(10),
            lock_ttl: Duration::from_secs(10),
            event_capacity: 1000,
            hostname: "localhost".to_string(),
        }
    }
}

/// The step-execution engine. Message-driven and stateless between steps:
/// an external consumer picks a published worker off the transport and hands
/// it to [`StepEngine::execute_step`]; all durable state lives behind the
/// store, so steps are resumable on any node.
pub struct StepEngine {
    pub(crate) store: Arc<dyn OrderStore>,
    pub(crate) workflows: Arc<dyn WorkflowStore>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) locks: Arc<dyn LockService>,
    pub(crate) scripts: Arc<dyn ScriptRuntime>,
    pub(crate) registry: Arc<InvocableRegistry>,
    pub(crate) audit: Arc<dyn AuditLog>,
    pub(crate) activity: Arc<dyn ActivityTracker>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) config: EngineConfig,
}

impl StepEngine {
    pub fn builder(
        store: Arc<dyn OrderStore>,
        workflows: Arc<dyn WorkflowStore>,
        transport: Arc<dyn Transport>,
        locks: Arc<dyn LockService>,
        scripts: Arc<dyn ScriptRuntime>,
    ) -> StepEngineBuilder {
        StepEngineBuilder {
            store,
            workflows,
            transport,
            locks,
            scripts,
            registry: None,
            audit: None,
            activity: None,
            metrics: None,
            config: EngineConfig::default(),
        }
    }

    pub fn registry(&self) -> &InvocableRegistry {
        &self.registry
    }

    /// Subscribe to status-update events
    pub fn subscribe_events(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit_event(&self, event: StatusEvent) {
        self.events.emit(event);
    }

    /// Resolve (workflow, step) from a fully-qualified step URI. A missing
    /// workflow is fatal; a missing step is reported as `None` so callers can
    /// decide how to terminate the worker.
    pub(crate) async fn workflow_with_step(
        &self,
        step_uri: &StepUri,
    ) -> Result<(Workflow, Option<Step>), EngineError> {
        let workflow_uri = step_uri.workflow();
        let flow = self
            .workflows
            .workflow(&workflow_uri)
            .await?
            .ok_or_else(|| DefinitionError::WorkflowNotFound(workflow_uri.to_string()))?;
        let step = step_uri
            .step_name()
            .and_then(|name| flow.step(name))
            .cloned();
        Ok((flow, step))
    }

    /// Routing category for a step: its override, else the workflow default
    pub(crate) fn calculate_category(step: &Step, flow: &Workflow) -> String {
        step.category_override
            .clone()
            .unwrap_or_else(|| flow.category.clone())
    }

    pub(crate) async fn step_category(&self, step_uri: &StepUri) -> Result<String, EngineError> {
        let (flow, step) = self.workflow_with_step(step_uri).await?;
        let step =
            step.ok_or_else(|| DefinitionError::StepNotFound(step_uri.to_string()))?;
        Ok(Self::calculate_category(&step, &flow))
    }

    /// Hand a runnable worker to the transport under a routing category
    pub(crate) async fn publish_step(
        &self,
        worker: &Worker,
        category: &str,
    ) -> Result<(), EngineError> {
        tracing::debug!(
            "Publishing worker {} under category '{}'",
            worker.uri(),
            category
        );
        self.transport.publish(worker, category).await?;
        Ok(())
    }
}

/// Builder wiring collaborators into a [`StepEngine`]
pub struct StepEngineBuilder {
    store: Arc<dyn OrderStore>,
    workflows: Arc<dyn WorkflowStore>,
    transport: Arc<dyn Transport>,
    locks: Arc<dyn LockService>,
    scripts: Arc<dyn ScriptRuntime>,
    registry: Option<Arc<InvocableRegistry>>,
    audit: Option<Arc<dyn AuditLog>>,
    activity: Option<Arc<dyn ActivityTracker>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    config: EngineConfig,
}

impl StepEngineBuilder {
    pub fn with_registry(mut self, registry: Arc<InvocableRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_activity(mut self, activity: Arc<dyn ActivityTracker>) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> StepEngine {
        let event_capacity = self.config.event_capacity;
        StepEngine {
            store: self.store,
            workflows: self.workflows,
            transport: self.transport,
            locks: self.locks,
            scripts: self.scripts,
            registry: self.registry.unwrap_or_else(|| Arc::new(InvocableRegistry::new())),
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAudit)),
            activity: self.activity.unwrap_or_else(|| Arc::new(NullActivity)),
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NullMetrics)),
            events: Arc::new(EventBus::new(event_capacity)),
            config: self.config,
        }
    }
}
