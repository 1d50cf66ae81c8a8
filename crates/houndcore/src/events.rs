use crate::{ExecutionStatus, StepType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events published during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        execution_id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        execution_id: ExecutionId,
        step_id: String,
        step_type: StepType,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        execution_id: ExecutionId,
        step_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        execution_id: ExecutionId,
        step_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    RetryScheduled {
        execution_id: ExecutionId,
        step_id: String,
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    EvidenceAdded {
        execution_id: ExecutionId,
        label: String,
        timestamp: DateTime<Utc>,
    },
}

/// Emitter scoped to one execution. Sends are fire-and-forget: a
/// missing or lagging subscriber never blocks the engine.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    sender: Option<broadcast::Sender<ExecutionEvent>>,
}

impl EventEmitter {
    pub fn new(execution_id: ExecutionId, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            execution_id,
            sender: Some(sender),
        }
    }

    /// Emitter with no bus attached, used by contexts restored from a
    /// snapshot until an orchestrator re-binds them.
    pub fn detached(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            sender: None,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn status_changed(&self, from: ExecutionStatus, to: ExecutionStatus) {
        self.emit(ExecutionEvent::StatusChanged {
            execution_id: self.execution_id,
            from,
            to,
            timestamp: Utc::now(),
        });
    }

    pub fn evidence_added(&self, label: impl Into<String>) {
        self.emit(ExecutionEvent::EvidenceAdded {
            execution_id: self.execution_id,
            label: label.into(),
            timestamp: Utc::now(),
        });
    }
}

/// Global event bus backed by a broadcast channel
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId) -> EventEmitter {
        EventEmitter::new(execution_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
