use crate::executor::ExecutionEngine;
use crate::mediator::{EventMediator, EventReceipt};
use crate::registry::{ConnectRegistry, NodeRegistry};
use loomcore::{
    EngineError, EventBus, RunEvent, TriggerMessage, WorkflowConfig, WorkflowId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};

/// Main runtime facade: owns the registries, the mediator, and the
/// workflow snapshot store.
pub struct LoomRuntime {
    registry: Arc<NodeRegistry>,
    connects: Arc<ConnectRegistry>,
    mediator: Arc<EventMediator>,
    workflows: Arc<RwLock<HashMap<WorkflowId, Arc<WorkflowConfig>>>>,
}

impl LoomRuntime {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let connects = Arc::new(ConnectRegistry::new());
        let engine =
            ExecutionEngine::new(registry.clone(), connects.clone(), config.max_parallel_actions);
        let bus = Arc::new(EventBus::new(config.event_buffer_size));
        let mediator = Arc::new(EventMediator::new(engine, bus));
        Self {
            registry,
            connects,
            mediator,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn connects(&self) -> &Arc<ConnectRegistry> {
        &self.connects
    }

    pub fn mediator(&self) -> &Arc<EventMediator> {
        &self.mediator
    }

    /// Register a workflow snapshot.
    pub async fn register_workflow(&self, config: WorkflowConfig) -> WorkflowId {
        let id = config.id;
        self.workflows.write().await.insert(id, Arc::new(config));
        id
    }

    pub async fn workflow(&self, id: WorkflowId) -> Option<Arc<WorkflowConfig>> {
        self.workflows.read().await.get(&id).cloned()
    }

    pub async fn list_workflows(&self) -> Vec<Arc<WorkflowConfig>> {
        self.workflows.read().await.values().cloned().collect()
    }

    /// Submit a trigger against a registered workflow.
    pub async fn send_event(
        &self,
        workflow_id: WorkflowId,
        trigger: TriggerMessage,
        wait_output: bool,
    ) -> Result<EventReceipt, EngineError> {
        let config = self
            .workflow(workflow_id)
            .await
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        self.mediator.send_event(config, trigger, wait_output).await
    }

    /// Submit a webhook trigger; the sender is answered per the
    /// workflow's respond policy.
    pub async fn send_webhook_event(
        &self,
        workflow_id: WorkflowId,
        trigger: TriggerMessage,
        respond_tx: oneshot::Sender<Value>,
    ) -> Result<EventReceipt, EngineError> {
        let config = self
            .workflow(workflow_id)
            .await
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        self.mediator
            .send_webhook_event(config, trigger, respond_tx)
            .await
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.mediator.subscribe()
    }
}

/// Configuration for the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Concurrency cap for composite fan-out within one run.
    pub max_parallel_actions: usize,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_actions: 10,
            event_buffer_size: 1000,
        }
    }
}
