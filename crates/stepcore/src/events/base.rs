use crate::order::WorkerState;
use crate::uri::OrderUri;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Severity attached to a status-update event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl From<WorkerState> for Severity {
    fn from(state: WorkerState) -> Self {
        match state {
            WorkerState::Error => Severity::Error,
            WorkerState::Blocked => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// Fired whenever a worker reaches a state worth reporting outward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub order_uri: OrderUri,
    pub worker_id: String,
    pub status: WorkerState,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(order_uri: OrderUri, worker_id: impl Into<String>, status: WorkerState) -> Self {
        Self {
            order_uri,
            worker_id: worker_id.into(),
            severity: Severity::from(status),
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast bus for status-update events
pub struct EventBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: StatusEvent) {
        let _ = self.sender.send(event);
    }
}
