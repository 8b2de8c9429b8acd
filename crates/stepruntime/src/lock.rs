use crate::engine::StepEngine;
use stepcore::{EngineError, LockError, LockHandle, WorkOrder, Worker};

/// Proof of a held (or skipped) work-order lock. The handle returned by the
/// lock service is threaded through this guard and must be given back via
/// [`StepEngine::release_order_lock`] on every exit path.
#[must_use = "an acquired order lock must be released"]
pub struct OrderLock {
    pub(crate) name: String,
    pub(crate) handle: Option<LockHandle>,
}

/// More than one worker registered, or the acting worker belongs to a join
/// group: shared work-order state is contended.
pub(crate) fn multi_worker(order: &WorkOrder, worker: &Worker) -> bool {
    order.worker_ids.len() > 1 || worker.in_join_group()
}

/// Lock key for a work order's shared state. Currently the whole order path;
/// a per-join-group key can be substituted here without touching call sites.
pub(crate) fn order_lock_key(order: &WorkOrder) -> String {
    order.uri.path().to_string()
}

impl StepEngine {
    /// Acquire the advisory lock scoped to the work order's path. Skipped in
    /// the mono-worker case unless `force` is set; completion paths force it
    /// because "am I the last worker" is itself a shared-state read.
    pub(crate) async fn grab_order_lock(
        &self,
        order: &WorkOrder,
        worker: &Worker,
        force: bool,
    ) -> Result<OrderLock, EngineError> {
        let name = order_lock_key(order);
        if !(force || multi_worker(order, worker)) {
            return Ok(OrderLock { name, handle: None });
        }
        let handle = self
            .locks
            .acquire(&name, self.config.lock_wait, self.config.lock_ttl)
            .await?
            .ok_or_else(|| LockError::Timeout(name.clone()))?;
        Ok(OrderLock {
            name,
            handle: Some(handle),
        })
    }

    /// Release a held lock. Failures are logged, not raised: the TTL bounds
    /// the damage and the caller is usually already unwinding an error.
    pub(crate) async fn release_order_lock(&self, lock: OrderLock) {
        if let Some(handle) = lock.handle {
            if let Err(e) = self.locks.release(&lock.name, handle).await {
                tracing::error!("Failed to release order lock '{}': {}", lock.name, e);
            }
        }
    }
}
