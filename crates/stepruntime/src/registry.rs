use std::collections::HashMap;
use std::sync::Arc;
use stepcore::Invocable;

/// Registry of native step handlers, keyed by executable-URI authority.
/// Plugin-style extension is explicit registration: an
/// `invocable://Archive/...` step dispatches to whatever handler registered
/// the authority `Archive`.
pub struct InvocableRegistry {
    handlers: HashMap<String, Arc<dyn Invocable>>,
}

impl InvocableRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn Invocable>) {
        let authority = handler.authority().to_string();
        tracing::info!("Registering invocable authority: {}", authority);
        self.handlers.insert(authority, handler);
    }

    pub fn get(&self, authority: &str) -> Option<Arc<dyn Invocable>> {
        self.handlers.get(authority).cloned()
    }

    pub fn authorities(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl Default for InvocableRegistry {
    fn default() -> Self {
        Self::new()
    }
}
