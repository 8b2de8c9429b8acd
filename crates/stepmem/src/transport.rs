use async_trait::async_trait;
use std::collections::VecDeque;
use stepcore::{DispatchedWorker, Transport, TransportError, Worker};
use tokio::sync::Mutex;

/// In-process FIFO transport. Published workers queue up until a consumer
/// pops them; the scheduling half of the queue stays outside the engine.
#[derive(Default)]
pub struct MemoryTransport {
    queue: Mutex<VecDeque<DispatchedWorker>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest published worker, any category
    pub async fn pop(&self) -> Option<DispatchedWorker> {
        self.queue.lock().await.pop_front()
    }

    /// Take the oldest published worker with the given worker id
    pub async fn pop_worker(&self, worker_id: &str) -> Option<DispatchedWorker> {
        let mut queue = self.queue.lock().await;
        let position = queue.iter().position(|d| d.worker.id == worker_id)?;
        queue.remove(position)
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Categories of everything currently queued, in publish order
    pub async fn queued_categories(&self) -> Vec<String> {
        self.queue
            .lock()
            .await
            .iter()
            .map(|d| d.category.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, worker: &Worker, category: &str) -> Result<(), TransportError> {
        tracing::debug!("Queueing worker {} under '{}'", worker.uri(), category);
        self.queue.lock().await.push_back(DispatchedWorker {
            category: category.to_string(),
            worker: worker.clone(),
        });
        Ok(())
    }
}
