use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use stepcore::{
    AppStatusGroup, JoinCountdown, OrderUri, StepRecord, StoreError, WorkOrder, Worker, Workflow,
    WorkflowStore, WorkflowUri,
};
use stepcore::OrderStore;
use tokio::sync::RwLock;

type Key = (String, String);

/// In-memory, last-write-wins store for work orders, workers, countdowns,
/// step records, context fields, and app-status documents. Also serves as the
/// workflow-definition repository.
#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<String, WorkOrder>>,
    workers: RwLock<HashMap<Key, Worker>>,
    countdowns: RwLock<HashMap<Key, JoinCountdown>>,
    records: RwLock<HashMap<Key, Vec<StepRecord>>>,
    context: RwLock<HashMap<Key, String>>,
    app_status: RwLock<HashMap<String, AppStatusGroup>>,
    cancels: RwLock<HashSet<String>>,
    outputs: RwLock<HashMap<String, HashMap<String, serde_json::Value>>>,
    args_hashes: RwLock<HashMap<String, String>>,
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow definition
    pub async fn add_workflow(&self, workflow: Workflow) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.uri.to_string(), workflow);
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn load_order(&self, uri: &OrderUri) -> Result<WorkOrder, StoreError> {
        self.orders
            .read()
            .await
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(uri.to_string()))
    }

    async fn save_order(&self, order: &WorkOrder) -> Result<(), StoreError> {
        self.orders
            .write()
            .await
            .insert(order.uri.to_string(), order.clone());
        Ok(())
    }

    async fn load_worker(&self, uri: &OrderUri, id: &str) -> Result<Option<Worker>, StoreError> {
        Ok(self
            .workers
            .read()
            .await
            .get(&(uri.to_string(), id.to_string()))
            .cloned())
    }

    async fn save_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        self.workers.write().await.insert(
            (worker.order_uri.to_string(), worker.id.clone()),
            worker.clone(),
        );
        Ok(())
    }

    async fn load_countdown(
        &self,
        uri: &OrderUri,
        parent_id: &str,
    ) -> Result<Option<JoinCountdown>, StoreError> {
        Ok(self
            .countdowns
            .read()
            .await
            .get(&(uri.to_string(), parent_id.to_string()))
            .cloned())
    }

    async fn save_countdown(&self, countdown: &JoinCountdown) -> Result<(), StoreError> {
        self.countdowns.write().await.insert(
            (countdown.order_uri.to_string(), countdown.parent_id.clone()),
            countdown.clone(),
        );
        Ok(())
    }

    async fn delete_countdown(&self, uri: &OrderUri, parent_id: &str) -> Result<(), StoreError> {
        self.countdowns
            .write()
            .await
            .remove(&(uri.to_string(), parent_id.to_string()));
        Ok(())
    }

    async fn append_step_record(
        &self,
        uri: &OrderUri,
        worker_id: &str,
        record: &StepRecord,
    ) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .entry((uri.to_string(), worker_id.to_string()))
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn update_step_record(
        &self,
        uri: &OrderUri,
        worker_id: &str,
        record: &StepRecord,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let list = records
            .get_mut(&(uri.to_string(), worker_id.to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("{}#{}", uri, worker_id)))?;
        for existing in list.iter_mut() {
            if existing.start_time == record.start_time && existing.step_uri == record.step_uri {
                *existing = record.clone();
                return Ok(());
            }
        }
        Err(StoreError::NotFound(format!(
            "step record {} in {}#{}",
            record.step_uri, uri, worker_id
        )))
    }

    async fn step_records(
        &self,
        uri: &OrderUri,
        worker_id: &str,
    ) -> Result<Vec<StepRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .get(&(uri.to_string(), worker_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn context_value(
        &self,
        uri: &OrderUri,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .context
            .read()
            .await
            .get(&(uri.to_string(), name.to_string()))
            .cloned())
    }

    async fn set_context_value(
        &self,
        uri: &OrderUri,
        name: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.context
            .write()
            .await
            .insert((uri.to_string(), name.to_string()), value.to_string());
        Ok(())
    }

    async fn load_app_status(&self, name: &str) -> Result<Option<AppStatusGroup>, StoreError> {
        Ok(self.app_status.read().await.get(name).cloned())
    }

    async fn save_app_status(&self, group: &AppStatusGroup) -> Result<(), StoreError> {
        self.app_status
            .write()
            .await
            .insert(group.name.clone(), group.clone());
        Ok(())
    }

    async fn cancel_requested(&self, uri: &OrderUri) -> Result<bool, StoreError> {
        Ok(self.cancels.read().await.contains(uri.as_str()))
    }

    async fn request_cancel(&self, uri: &OrderUri) -> Result<(), StoreError> {
        self.cancels.write().await.insert(uri.to_string());
        Ok(())
    }

    async fn set_output_value(
        &self,
        uri: &OrderUri,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.outputs
            .write()
            .await
            .entry(uri.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn output_document(
        &self,
        uri: &OrderUri,
    ) -> Result<Option<HashMap<String, serde_json::Value>>, StoreError> {
        Ok(self.outputs.read().await.get(uri.as_str()).cloned())
    }

    async fn save_args_hash(&self, uri: &OrderUri, hash: &str) -> Result<(), StoreError> {
        self.args_hashes
            .write()
            .await
            .insert(uri.to_string(), hash.to_string());
        Ok(())
    }

    async fn args_hash(&self, uri: &OrderUri) -> Result<Option<String>, StoreError> {
        Ok(self.args_hashes.read().await.get(uri.as_str()).cloned())
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn workflow(&self, uri: &WorkflowUri) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.read().await.get(uri.as_str()).cloned())
    }
}
