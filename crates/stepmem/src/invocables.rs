//! Stock native invocables, registered by authority. Useful for demos and
//! tests; real deployments register their own handlers.

use async_trait::async_trait;
use stepcore::{Invocable, InvokeContext, InvokeError};
use stepruntime::context;

/// `invocable://Echo` — logs the step and succeeds
pub struct EchoInvocable;

#[async_trait]
impl Invocable for EchoInvocable {
    fn authority(&self) -> &str {
        "Echo"
    }

    async fn invoke(&self, ctx: InvokeContext<'_>) -> Result<String, InvokeError> {
        tracing::info!("Echo: step {} of {}", ctx.step_name, ctx.order_uri);
        Ok("ok".to_string())
    }
}

/// `invocable://SetContext` — stores every entry of the step's effective view
/// as a literal context value
pub struct SetContextInvocable;

#[async_trait]
impl Invocable for SetContextInvocable {
    fn authority(&self) -> &str {
        "SetContext"
    }

    async fn invoke(&self, ctx: InvokeContext<'_>) -> Result<String, InvokeError> {
        for (key, value) in &ctx.view {
            ctx.store
                .set_context_value(
                    ctx.order_uri,
                    key,
                    &format!("{}{}", context::LITERAL_MARKER, value),
                )
                .await
                .map_err(|e| InvokeError::Failed(e.to_string()))?;
        }
        Ok("ok".to_string())
    }
}

/// `invocable://SetOutput` — copies the step's effective view into the
/// order's ephemeral output document
pub struct SetOutputInvocable;

#[async_trait]
impl Invocable for SetOutputInvocable {
    fn authority(&self) -> &str {
        "SetOutput"
    }

    async fn invoke(&self, ctx: InvokeContext<'_>) -> Result<String, InvokeError> {
        for (key, value) in &ctx.view {
            ctx.store
                .set_output_value(
                    ctx.order_uri,
                    key,
                    serde_json::Value::String(value.clone()),
                )
                .await
                .map_err(|e| InvokeError::Failed(e.to_string()))?;
        }
        Ok("ok".to_string())
    }
}

/// `invocable://Fail` — always fails, for exercising error paths
pub struct FailInvocable;

#[async_trait]
impl Invocable for FailInvocable {
    fn authority(&self) -> &str {
        "Fail"
    }

    async fn invoke(&self, _ctx: InvokeContext<'_>) -> Result<String, InvokeError> {
        Err(InvokeError::Failed("deliberate failure".to_string()))
    }
}
