use crate::invocables::{EchoInvocable, FailInvocable, SetContextInvocable, SetOutputInvocable};
use crate::lock::MemoryLockService;
use crate::script::FnScriptRuntime;
use crate::store::MemoryStore;
use crate::transport::MemoryTransport;
use std::sync::Arc;
use stepcore::EngineError;
use stepruntime::{InvocableRegistry, StepEngine, StepEngineBuilder};

/// Backstop against workflows that republish forever
const MAX_DRIVEN_STEPS: usize = 10_000;

/// Bundle of in-memory collaborators wired for one engine
pub struct MemoryWorld {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<MemoryTransport>,
    pub locks: Arc<MemoryLockService>,
    pub scripts: Arc<FnScriptRuntime>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            transport: Arc::new(MemoryTransport::new()),
            locks: Arc::new(MemoryLockService::new()),
            scripts: Arc::new(FnScriptRuntime::new()),
        }
    }

    /// Engine builder pre-wired with this world's collaborators
    pub fn engine_builder(&self) -> StepEngineBuilder {
        StepEngine::builder(
            self.store.clone(),
            self.store.clone(),
            self.transport.clone(),
            self.locks.clone(),
            self.scripts.clone(),
        )
    }

    /// Engine with the stock invocables registered
    pub fn engine(&self) -> StepEngine {
        let mut registry = InvocableRegistry::new();
        registry.register(Arc::new(EchoInvocable));
        registry.register(Arc::new(SetContextInvocable));
        registry.register(Arc::new(SetOutputInvocable));
        registry.register(Arc::new(FailInvocable));
        self.engine_builder()
            .with_registry(Arc::new(registry))
            .build()
    }
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume published workers until the queue drains, executing one step per
/// message. This is the consumption loop a real deployment runs per node.
pub async fn run_until_idle(
    engine: &StepEngine,
    transport: &MemoryTransport,
) -> Result<usize, EngineError> {
    let mut steps = 0;
    while let Some(envelope) = transport.pop().await {
        let mut worker = envelope.worker;
        engine.execute_step(&mut worker).await?;
        steps += 1;
        if steps >= MAX_DRIVEN_STEPS {
            return Err(EngineError::Execution(format!(
                "run_until_idle gave up after {} steps",
                steps
            )));
        }
    }
    Ok(steps)
}
