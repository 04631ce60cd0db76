use crate::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Dispatched but never ran to completion, e.g. a loop driver
    /// interrupted by cooperative cancellation mid-iteration.
    Skipped,
}

/// Record of one action execution attempt. Written atomically, exactly
/// once per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub action_id: String,
    pub kind: String,
    pub input: Value,
    pub output: Value,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepTrace {
    pub fn succeeded(
        action_id: impl Into<String>,
        kind: impl Into<String>,
        input: Value,
        output: Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            kind: kind.into(),
            input,
            output,
            status: StepStatus::Succeeded,
            error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        action_id: impl Into<String>,
        kind: impl Into<String>,
        input: Value,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            kind: kind.into(),
            input,
            output: Value::Null,
            status: StepStatus::Failed,
            error: Some(error.into()),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn skipped(
        action_id: impl Into<String>,
        kind: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            kind: kind.into(),
            input: Value::Null,
            output: Value::Null,
            status: StepStatus::Skipped,
            error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Copy with the potentially large payloads stripped, for lightweight
    /// polling queries.
    pub fn without_output(&self) -> Self {
        let mut stripped = self.clone();
        stripped.input = Value::Null;
        stripped.output = Value::Null;
        stripped
    }
}

/// The ordered record of per-action execution outcomes for one run.
/// Append-only while the run is live; the sole source of truth for what
/// happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTrace {
    pub event_id: EventId,
    pub steps: Vec<StepTrace>,
    /// Terminal output, set exactly when the run completed successfully.
    pub output: Option<Value>,
    /// Terminal error, set exactly when the run completed with a failure.
    pub error: Option<String>,
}

impl EventTrace {
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            steps: Vec::new(),
            output: None,
            error: None,
        }
    }

    pub fn push(&mut self, step: StepTrace) {
        self.steps.push(step);
    }

    pub fn step(&self, action_id: &str) -> Option<&StepTrace> {
        self.steps.iter().find(|s| s.action_id == action_id)
    }

    pub fn finish_ok(&mut self, output: Value) {
        self.output = Some(output);
    }

    pub fn finish_err(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    /// A run is terminal once it carries either an output or an error.
    pub fn is_terminal(&self) -> bool {
        self.output.is_some() || self.error.is_some()
    }
}
