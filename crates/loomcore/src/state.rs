use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Reserved state key holding the normalized trigger message.
pub const TRIGGER_KEY: &str = "$trigger";

/// Reserved state key holding the most recently produced value: the last
/// completed action's output, or the cursor data inside a loop body.
pub const CURRENT_KEY: &str = "$current";

/// Per-run mutable mapping from symbolic keys (`$trigger`, `$current`,
/// action ids) to values produced by prior actions. Exclusively owned by
/// one in-flight run; never shared across runs.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RunState {
    entries: HashMap<String, Value>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Record an action's output under its id and advance `$current`.
    pub fn set_output(&mut self, action_id: &str, value: Value) {
        self.entries.insert(action_id.to_string(), value.clone());
        self.entries.insert(CURRENT_KEY.to_string(), value);
    }

    pub fn set_trigger(&mut self, trigger: Value) {
        self.entries.insert(TRIGGER_KEY.to_string(), trigger);
    }

    pub fn set_current(&mut self, value: Value) {
        self.entries.insert(CURRENT_KEY.to_string(), value);
    }

    pub fn current(&self) -> Option<&Value> {
        self.entries.get(CURRENT_KEY)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
