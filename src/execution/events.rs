//! Execution notifications: a broadcast bus for all listeners plus an
//! optional per-call observer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::types::{ExecutionStatus, ProgressEvent};

/// Non-terminal status changes of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Started,
    /// Still running after the warning threshold.
    Warning,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Progress(ProgressEvent),
    Status { status: StatusKind, message: String },
    Error { message: String },
    Completed { status: ExecutionStatus, execution_time_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub tool_call_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl ExecutionEvent {
    pub fn new(tool_call_id: &str, session_id: &str, kind: EventKind) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Per-call callbacks. Both default to no-ops.
pub trait ExecutionObserver: Send + Sync {
    fn on_progress(&self, _tool_call_id: &str, _event: &ProgressEvent) {}

    fn on_status(&self, _tool_call_id: &str, _status: StatusKind, _message: &str) {}
}

/// Fan-out of execution events. Publishing never blocks; slow subscribers
/// observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ExecutionEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
