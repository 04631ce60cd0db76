use crate::executor::{ExecutionEngine, RespondPolicy, RunOutcome};
use dashmap::DashMap;
use loomcore::{
    EngineError, EventBus, EventId, EventTrace, RespondData, RespondMode, RunEvent, StepTrace,
    TriggerMessage, WorkflowConfig,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The run boundary: accepts trigger submissions, assigns event ids,
/// records traces, exposes trace queries and cooperative cancellation,
/// and supports both wait-for-result and fire-and-subscribe completion.
pub struct EventMediator {
    engine: ExecutionEngine,
    bus: Arc<EventBus>,
    /// Trace per event, kept after completion for queries.
    traces: Arc<DashMap<EventId, Arc<RwLock<EventTrace>>>>,
    /// Cancellation tokens for live runs only; retired on stop or finish.
    live: Arc<DashMap<EventId, CancellationToken>>,
}

/// What a trigger submission returns: the run identifier, plus the
/// terminal output when the caller asked to wait.
#[derive(Debug, Clone)]
pub struct EventReceipt {
    pub event_id: EventId,
    pub output: Option<Value>,
}

impl EventMediator {
    pub fn new(engine: ExecutionEngine, bus: Arc<EventBus>) -> Self {
        Self {
            engine,
            bus,
            traces: Arc::new(DashMap::new()),
            live: Arc::new(DashMap::new()),
        }
    }

    /// Start a run. Configuration errors surface here, before an event id
    /// is allocated or any action runs. With `wait_output` the call
    /// blocks until the run is terminal and returns its output inline;
    /// otherwise it returns immediately and progress is published on the
    /// broadcast channel keyed by event id.
    pub async fn send_event(
        &self,
        config: Arc<WorkflowConfig>,
        trigger: TriggerMessage,
        wait_output: bool,
    ) -> Result<EventReceipt, EngineError> {
        self.submit(config, trigger, wait_output, None).await
    }

    /// Start a run on behalf of an HTTP webhook caller. The sender is
    /// answered per the workflow's respond policy; it always receives a
    /// value by the time the run is terminal.
    pub async fn send_webhook_event(
        &self,
        config: Arc<WorkflowConfig>,
        trigger: TriggerMessage,
        respond_tx: oneshot::Sender<Value>,
    ) -> Result<EventReceipt, EngineError> {
        self.submit(config, trigger, false, Some(respond_tx)).await
    }

    async fn submit(
        &self,
        config: Arc<WorkflowConfig>,
        trigger: TriggerMessage,
        wait_output: bool,
        respond_tx: Option<oneshot::Sender<Value>>,
    ) -> Result<EventReceipt, EngineError> {
        let loaded = self.engine.load(config)?;

        let responder = match respond_tx {
            Some(tx) => Arc::new(Responder::for_policy(tx, loaded.respond.clone())),
            None => Arc::new(Responder::disabled()),
        };

        let event_id = Uuid::new_v4();
        let trace = Arc::new(RwLock::new(EventTrace::new(event_id)));
        self.traces.insert(event_id, trace.clone());

        let token = CancellationToken::new();
        self.live.insert(event_id, token.clone());

        let (done_tx, done_rx) = oneshot::channel::<RunOutcome>();
        let engine = self.engine.clone();
        let bus = self.bus.clone();
        let live = self.live.clone();
        tokio::spawn(async move {
            let outcome = engine
                .run(loaded, trigger, event_id, trace, bus, token, responder)
                .await;
            live.remove(&event_id);
            let _ = done_tx.send(outcome);
        });

        if wait_output {
            let outcome = done_rx
                .await
                .map_err(|_| EngineError::Execution("run task dropped".to_string()))?;
            match outcome.error {
                Some(error) => Err(EngineError::Execution(error)),
                None => Ok(EventReceipt {
                    event_id,
                    output: outcome.output,
                }),
            }
        } else {
            Ok(EventReceipt {
                event_id,
                output: None,
            })
        }
    }

    /// Every step trace for a run, in recorded order. `include_output =
    /// false` strips the payloads for lightweight polling.
    pub async fn get_event_trace(
        &self,
        event_id: EventId,
        include_output: bool,
    ) -> Result<Vec<StepTrace>, EngineError> {
        let trace = self
            .traces
            .get(&event_id)
            .ok_or_else(|| EngineError::TraceNotFound(event_id.to_string()))?
            .clone();
        let guard = trace.read().await;
        let steps = if include_output {
            guard.steps.clone()
        } else {
            guard.steps.iter().map(StepTrace::without_output).collect()
        };
        Ok(steps)
    }

    /// The trace entry for one action, if it ran.
    pub async fn get_event_step_trace(
        &self,
        event_id: EventId,
        action_id: &str,
        include_output: bool,
    ) -> Result<StepTrace, EngineError> {
        let trace = self
            .traces
            .get(&event_id)
            .ok_or_else(|| EngineError::TraceNotFound(event_id.to_string()))?
            .clone();
        let guard = trace.read().await;
        let step = guard
            .step(action_id)
            .ok_or_else(|| EngineError::TraceNotFound(format!("{event_id}/{action_id}")))?;
        Ok(if include_output {
            step.clone()
        } else {
            step.without_output()
        })
    }

    /// The full trace record (steps plus terminal output/error).
    pub async fn get_event_record(&self, event_id: EventId) -> Result<EventTrace, EngineError> {
        let trace = self
            .traces
            .get(&event_id)
            .ok_or_else(|| EngineError::TraceNotFound(event_id.to_string()))?
            .clone();
        let record = trace.read().await.clone();
        Ok(record)
    }

    /// Cooperative cancellation: stop scheduling new actions for a run.
    /// Already-started actions run to completion. Returns whether a live
    /// run was found and signaled; idempotent, so a second call for the
    /// same event returns `false`.
    pub fn stop_event(&self, event_id: EventId) -> bool {
        match self.live.remove(&event_id) {
            Some((_, token)) => {
                tracing::info!(event_id = %event_id, "stop requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

/// Answers the HTTP caller of a webhook-triggered run exactly once,
/// per the workflow's respond policy. Runs without an HTTP caller use
/// the disabled variant, where every send is a no-op.
pub struct Responder {
    tx: Mutex<Option<oneshot::Sender<Value>>>,
    data: RespondData,
    watch: Option<String>,
    /// Hold a captured node result until the run is terminal.
    defer: bool,
    captured: Mutex<Option<Value>>,
}

impl Responder {
    pub(crate) fn disabled() -> Self {
        Self {
            tx: Mutex::new(None),
            data: RespondData::WorkflowResult,
            watch: None,
            defer: true,
            captured: Mutex::new(None),
        }
    }

    pub(crate) fn for_policy(tx: oneshot::Sender<Value>, policy: Option<RespondPolicy>) -> Self {
        match policy {
            Some(policy) => Self {
                tx: Mutex::new(Some(tx)),
                data: policy.data,
                watch: policy.watch,
                defer: policy.mode == RespondMode::OnFinished,
                captured: Mutex::new(None),
            },
            // No webhook action declared: answer with the run result.
            None => Self {
                tx: Mutex::new(Some(tx)),
                data: RespondData::WorkflowResult,
                watch: None,
                defer: true,
                captured: Mutex::new(None),
            },
        }
    }

    /// Called by the engine after each action completes.
    pub fn on_action(&self, action_id: &str, output: &Value) {
        if self.data != RespondData::NodeResult {
            return;
        }
        if self.watch.as_deref() != Some(action_id) {
            return;
        }
        if self.defer {
            if let Ok(mut captured) = self.captured.lock() {
                captured.get_or_insert_with(|| output.clone());
            }
        } else {
            self.try_send(output.clone());
        }
    }

    /// Called by the engine when the run is terminal. Guarantees the
    /// caller is unblocked even when the watched action never ran.
    pub fn on_finish(&self, outcome: &RunOutcome) {
        let captured = self
            .captured
            .lock()
            .ok()
            .and_then(|mut c| c.take())
            .filter(|_| self.data == RespondData::NodeResult);
        let value = match captured {
            Some(v) => v,
            None => match (&outcome.output, &outcome.error) {
                (Some(output), _) => output.clone(),
                (None, Some(error)) => json!({ "success": false, "error": error }),
                (None, None) => Value::Null,
            },
        };
        self.try_send(value);
    }

    fn try_send(&self, value: Value) {
        if let Ok(mut tx) = self.tx.lock() {
            if let Some(tx) = tx.take() {
                let _ = tx.send(value);
            }
        }
    }
}
