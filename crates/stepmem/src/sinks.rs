use async_trait::async_trait;
use stepcore::{ActivityTracker, AuditLog, MetricsSink, OrderState, WorkOrder};
use tokio::sync::Mutex;

/// Audit sink that remembers every entry, for assertions
#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub log_uri: String,
    pub category: String,
    pub level: u8,
    pub message: String,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditLog for RecordingAudit {
    async fn write(&self, log_uri: &str, category: &str, level: u8, message: &str) {
        self.entries.lock().await.push(AuditEntry {
            log_uri: log_uri.to_string(),
            category: category.to_string(),
            level,
            message: message.to_string(),
        });
    }
}

/// Activity sink that remembers every update
#[derive(Default)]
pub struct RecordingActivity {
    events: Mutex<Vec<String>>,
}

impl RecordingActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<String> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl ActivityTracker for RecordingActivity {
    async fn update(&self, activity_id: &str, message: &str) {
        self.events
            .lock()
            .await
            .push(format!("update {}: {}", activity_id, message));
    }

    async fn finish(&self, activity_id: &str, message: &str) {
        self.events
            .lock()
            .await
            .push(format!("finish {}: {}", activity_id, message));
    }

    async fn abort(&self, activity_id: &str, message: &str) {
        self.events
            .lock()
            .await
            .push(format!("abort {}: {}", activity_id, message));
    }
}

/// Metrics sink that remembers every finished order
#[derive(Default)]
pub struct RecordingMetrics {
    finished: Mutex<Vec<(String, Option<String>, OrderState)>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn finished(&self) -> Vec<(String, Option<String>, OrderState)> {
        self.finished.lock().await.clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetrics {
    async fn order_finished(
        &self,
        order: &WorkOrder,
        args_hash: Option<String>,
        status: OrderState,
    ) {
        self.finished
            .lock()
            .await
            .push((order.uri.to_string(), args_hash, status));
    }
}
