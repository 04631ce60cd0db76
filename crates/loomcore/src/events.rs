use crate::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events published while a run progresses. Subscribers filter by
/// `event_id` to follow one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    RunStarted {
        event_id: EventId,
        workflow_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    ActionStarted {
        event_id: EventId,
        action_id: String,
        kind: String,
        timestamp: DateTime<Utc>,
    },
    ActionCompleted {
        event_id: EventId,
        action_id: String,
        output: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ActionFailed {
        event_id: EventId,
        action_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        event_id: EventId,
        success: bool,
        output: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Emitter bound to one run, handed to the engine and to nodes.
#[derive(Clone)]
pub struct EventEmitter {
    event_id: EventId,
    sender: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new(event_id: EventId, sender: broadcast::Sender<RunEvent>) -> Self {
        Self { event_id, sender }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn action_started(&self, action_id: &str, kind: &str) {
        self.send(RunEvent::ActionStarted {
            event_id: self.event_id,
            action_id: action_id.to_string(),
            kind: kind.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn action_completed(&self, action_id: &str, output: Value, duration_ms: u64) {
        self.send(RunEvent::ActionCompleted {
            event_id: self.event_id,
            action_id: action_id.to_string(),
            output,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn action_failed(&self, action_id: &str, error: &str) {
        self.send(RunEvent::ActionFailed {
            event_id: self.event_id,
            action_id: action_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn send(&self, event: RunEvent) {
        // Nobody listening is fine; runs never block on observers.
        let _ = self.sender.send(event);
    }
}

/// Process-wide broadcast bus for run events.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, event_id: EventId) -> EventEmitter {
        EventEmitter::new(event_id, self.sender.clone())
    }
}
