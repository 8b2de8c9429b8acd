use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stepcore::{InvokeError, ScriptRuntime, ScriptVals};
use tokio::sync::RwLock;

type ScriptFn = Arc<dyn Fn(&ScriptVals) -> Result<Option<String>, InvokeError> + Send + Sync>;

/// Script runtime backed by registered closures; the script language itself
/// stays outside the engine, this covers the seam.
#[derive(Default)]
pub struct FnScriptRuntime {
    scripts: RwLock<HashMap<String, ScriptFn>>,
}

impl FnScriptRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<F>(&self, uri: impl Into<String>, script: F)
    where
        F: Fn(&ScriptVals) -> Result<Option<String>, InvokeError> + Send + Sync + 'static,
    {
        self.scripts
            .write()
            .await
            .insert(uri.into(), Arc::new(script));
    }
}

#[async_trait]
impl ScriptRuntime for FnScriptRuntime {
    async fn run(
        &self,
        script_uri: &str,
        vals: &ScriptVals,
        _time_limit: Option<Duration>,
    ) -> Result<Option<String>, InvokeError> {
        let script = self
            .scripts
            .read()
            .await
            .get(script_uri)
            .cloned()
            .ok_or_else(|| InvokeError::Failed(format!("Script not found: {}", script_uri)))?;
        script(vals)
    }
}
