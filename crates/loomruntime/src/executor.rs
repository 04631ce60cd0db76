use crate::mediator::Responder;
use crate::registry::{ConnectRegistry, NodeRegistry};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use loomcore::{
    ConfigError, ConnectConfig, EnumeratorCursor, EventBus, EventEmitter, EventId, EventTrace,
    LinkKind, Node, NodeContext, NodeError, RespondData, RespondMode, RunEvent, RunState,
    StepTrace, TriggerMessage, WorkflowAction, WorkflowConfig,
};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Interprets workflow graphs: builds an execution plan from the relation
/// list, walks it in dependency waves, and drives the loop protocol for
/// enumerator actions.
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<NodeRegistry>,
    connects: Arc<ConnectRegistry>,
    max_parallel: usize,
}

/// A validated workflow snapshot, ready to run. Construction performs all
/// fatal configuration checks so nothing past this point can fail for
/// configuration reasons.
pub struct LoadedWorkflow {
    pub config: Arc<WorkflowConfig>,
    actions: HashMap<String, LoadedAction>,
    /// Top-level dependency waves; loop bodies and done markers excluded.
    plan: Vec<Vec<String>>,
    /// Enumerator action id -> dependency waves of its loop body.
    bodies: HashMap<String, Vec<Vec<String>>>,
    pub(crate) respond: Option<RespondPolicy>,
}

struct LoadedAction {
    spec: WorkflowAction,
    node: Arc<dyn Node>,
    connect: Option<Arc<ConnectConfig>>,
}

/// How a webhook-triggered run answers its HTTP caller.
#[derive(Debug, Clone)]
pub(crate) struct RespondPolicy {
    pub mode: RespondMode,
    pub data: RespondData,
    /// Action whose output answers the caller when `data` is
    /// `NodeResult`; `None` means the terminal workflow result.
    pub watch: Option<String>,
}

/// Terminal result of one run: exactly one of `output`/`error` is set.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub output: Option<Value>,
    pub error: Option<String>,
}

enum RunHalt {
    Cancelled,
    Failed { action_id: String, error: NodeError },
}

/// Everything a run carries besides the plan itself.
struct RunCtx<'a> {
    loaded: &'a LoadedWorkflow,
    state: Arc<RwLock<RunState>>,
    trigger: Arc<TriggerMessage>,
    emitter: EventEmitter,
    cancel: CancellationToken,
    trace: Arc<RwLock<EventTrace>>,
    responder: Arc<Responder>,
}

/// Outcome of one dispatched wave member.
struct StepRun {
    action_id: String,
    kind: String,
    input: Value,
    started_at: chrono::DateTime<Utc>,
    duration_ms: u64,
    result: Result<Value, NodeError>,
}

enum Member {
    /// Single-shot action; trace/state bookkeeping happens in the wave
    /// processor so entries land in dispatch order.
    Single(StepRun),
    /// Loop driver; it appends its own traces (body iterations included)
    /// and reports only how the run should proceed.
    Loop(Result<(), RunHalt>),
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<NodeRegistry>,
        connects: Arc<ConnectRegistry>,
        max_parallel: usize,
    ) -> Self {
        Self {
            registry,
            connects,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Validate a workflow snapshot and build its execution plan.
    ///
    /// Every action's kind must resolve, every relation endpoint must
    /// exist and match both nodes' declared link kinds, every input
    /// expression must parse, and the non-loop relation must be acyclic.
    pub fn load(&self, config: Arc<WorkflowConfig>) -> Result<LoadedWorkflow, ConfigError> {
        if !config.is_active || config.is_deleted {
            return Err(ConfigError::Inactive);
        }

        let mut actions: HashMap<String, LoadedAction> = HashMap::new();
        for spec in &config.actions {
            if actions.contains_key(&spec.id) {
                return Err(ConfigError::DuplicateAction(spec.id.clone()));
            }
            let node: Arc<dyn Node> = Arc::from(self.registry.create_node(spec)?);
            let connect = match &spec.connect_id {
                Some(id) => Some(
                    self.connects
                        .get(id)
                        .ok_or_else(|| ConfigError::UnknownConnect(id.clone()))?,
                ),
                None => None,
            };
            validate_input_exprs(spec)?;
            actions.insert(
                spec.id.clone(),
                LoadedAction {
                    spec: spec.clone(),
                    node,
                    connect,
                },
            );
        }

        for rel in &config.relation {
            let from = actions
                .get(&rel.from)
                .ok_or_else(|| ConfigError::UnknownAction(rel.from.clone()))?;
            let to = actions
                .get(&rel.to)
                .ok_or_else(|| ConfigError::UnknownAction(rel.to.clone()))?;

            if !from.node.links().produces_output(rel.link) {
                return Err(ConfigError::LinkMismatch {
                    from: rel.from.clone(),
                    to: rel.to.clone(),
                    link: rel.link.to_string(),
                    side: rel.from.clone(),
                });
            }
            if !to.node.links().accepts_input(rel.link) {
                return Err(ConfigError::LinkMismatch {
                    from: rel.from.clone(),
                    to: rel.to.clone(),
                    link: rel.link.to_string(),
                    side: rel.to.clone(),
                });
            }
        }

        check_acyclic(&config)?;

        let bodies_members = collect_loop_bodies(&config);
        let done_markers = collect_done_markers(&config);

        // An action id inside a loop body resolves dependencies to the
        // owning enumerator: successors wait for the whole loop.
        let owner_of: HashMap<&str, &str> = bodies_members
            .iter()
            .flat_map(|(owner, members)| {
                members.iter().map(move |m| (m.as_str(), owner.as_str()))
            })
            .collect();

        let all_body: HashSet<&str> = owner_of.keys().copied().collect();
        let top_level: Vec<&str> = config
            .actions
            .iter()
            .map(|a| a.id.as_str())
            .filter(|id| !all_body.contains(id) && !done_markers.contains(*id))
            .collect();

        let plan = build_waves(&config, &top_level, &owner_of)?;

        let mut bodies = HashMap::new();
        for (owner, members) in &bodies_members {
            let member_refs: Vec<&str> = members.iter().map(String::as_str).collect();
            bodies.insert(owner.clone(), build_waves(&config, &member_refs, &owner_of)?);
        }

        let respond = match config.webhook_action() {
            Some(spec) => Some(resolve_respond_policy(&config, spec)?),
            None => None,
        };

        Ok(LoadedWorkflow {
            config,
            actions,
            plan,
            bodies,
            respond,
        })
    }

    /// Execute a loaded workflow against a trigger, producing a completed
    /// run: a terminal output or a recorded failure, and one trace entry
    /// per dispatched action.
    pub async fn run(
        &self,
        loaded: LoadedWorkflow,
        trigger: TriggerMessage,
        event_id: EventId,
        trace: Arc<RwLock<EventTrace>>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
        responder: Arc<Responder>,
    ) -> RunOutcome {
        let t0 = Instant::now();
        bus.emit(RunEvent::RunStarted {
            event_id,
            workflow_id: loaded.config.id,
            timestamp: Utc::now(),
        });
        tracing::info!(event_id = %event_id, workflow = %loaded.config.name, "run started");

        let state = Arc::new(RwLock::new(RunState::new()));
        {
            let mut st = state.write().await;
            st.set_trigger(serde_json::to_value(&trigger).unwrap_or(Value::Null));
        }

        let rc = RunCtx {
            loaded: &loaded,
            state: state.clone(),
            trigger: Arc::new(trigger),
            emitter: bus.create_emitter(event_id),
            cancel,
            trace: trace.clone(),
            responder: responder.clone(),
        };

        let halted = self.execute_waves(&rc, &loaded.plan).await;

        let outcome = match halted {
            Ok(()) => {
                let output = state.read().await.current().cloned().unwrap_or(Value::Null);
                RunOutcome {
                    output: Some(output),
                    error: None,
                }
            }
            Err(RunHalt::Cancelled) => RunOutcome {
                output: None,
                error: Some("cancelled".to_string()),
            },
            Err(RunHalt::Failed { action_id, error }) => RunOutcome {
                output: None,
                error: Some(format!("action '{action_id}' failed: {error}")),
            },
        };

        {
            let mut tr = trace.write().await;
            match (&outcome.output, &outcome.error) {
                (Some(output), _) => tr.finish_ok(output.clone()),
                (None, Some(error)) => tr.finish_err(error.clone()),
                (None, None) => tr.finish_err("run ended without outcome"),
            }
        }

        responder.on_finish(&outcome);

        let success = outcome.error.is_none();
        bus.emit(RunEvent::RunCompleted {
            event_id,
            success,
            output: outcome.output.clone().unwrap_or(Value::Null),
            duration_ms: t0.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        tracing::info!(event_id = %event_id, success, "run completed");

        outcome
    }

    /// Execute dependency waves. Within a wave members run concurrently
    /// (composite fan-out); trace entries are appended in dispatch order
    /// once the wave settles, so readers observe a completed prefix.
    fn execute_waves<'a>(
        &'a self,
        rc: &'a RunCtx<'a>,
        waves: &'a [Vec<String>],
    ) -> BoxFuture<'a, Result<(), RunHalt>> {
        Box::pin(async move {
            for wave in waves {
                if rc.cancel.is_cancelled() {
                    return Err(RunHalt::Cancelled);
                }

                for chunk in wave.chunks(self.max_parallel) {
                    let mut running = FuturesUnordered::new();
                    for action_id in chunk {
                        running.push(self.run_member(rc, action_id));
                    }

                    let mut outcomes: HashMap<String, Member> = HashMap::new();
                    while let Some((id, member)) = running.next().await {
                        outcomes.insert(id, member);
                    }

                    let mut halt: Option<RunHalt> = None;
                    for action_id in chunk {
                        let Some(member) = outcomes.remove(action_id) else {
                            continue;
                        };
                        match member {
                            Member::Single(step) => {
                                let failed = self.settle_step(rc, step).await;
                                if halt.is_none() {
                                    halt = failed;
                                }
                            }
                            Member::Loop(Err(h)) => {
                                if halt.is_none() {
                                    halt = Some(h);
                                }
                            }
                            Member::Loop(Ok(())) => {}
                        }
                    }
                    if let Some(h) = halt {
                        return Err(h);
                    }
                }
            }
            Ok(())
        })
    }

    async fn run_member<'a>(&'a self, rc: &'a RunCtx<'a>, action_id: &'a str) -> (String, Member) {
        if rc.loaded.bodies.contains_key(action_id) {
            let result = self.drive_loop(rc, action_id).await;
            (action_id.to_string(), Member::Loop(result))
        } else {
            let step = self.dispatch_action(rc, action_id).await;
            (action_id.to_string(), Member::Single(step))
        }
    }

    /// Record a settled single-shot step: one trace entry, state update,
    /// events, webhook respond check. Returns the halt to apply if the
    /// step failed (first unhandled node error aborts the whole run).
    async fn settle_step(&self, rc: &RunCtx<'_>, step: StepRun) -> Option<RunHalt> {
        match step.result {
            Ok(output) => {
                rc.trace.write().await.push(StepTrace::succeeded(
                    &step.action_id,
                    &step.kind,
                    step.input,
                    output.clone(),
                    step.started_at,
                ));
                rc.state.write().await.set_output(&step.action_id, output.clone());
                rc.emitter
                    .action_completed(&step.action_id, output.clone(), step.duration_ms);
                rc.responder.on_action(&step.action_id, &output);
                None
            }
            Err(error) => {
                tracing::warn!(action = %step.action_id, %error, "action failed");
                rc.trace.write().await.push(StepTrace::failed(
                    &step.action_id,
                    &step.kind,
                    step.input,
                    error.to_string(),
                    step.started_at,
                ));
                rc.emitter.action_failed(&step.action_id, &error.to_string());
                Some(RunHalt::Failed {
                    action_id: step.action_id,
                    error,
                })
            }
        }
    }

    /// Resolve inputs, invoke `execute`, convert a declared timeout into
    /// a failed result instead of hanging the run.
    async fn dispatch_action(&self, rc: &RunCtx<'_>, action_id: &str) -> StepRun {
        let la = &rc.loaded.actions[action_id];
        let started_at = Utc::now();
        let t0 = Instant::now();
        rc.emitter.action_started(action_id, &la.spec.kind);

        let resolved = {
            let st = rc.state.read().await;
            loomcore::resolve_inputs(&la.spec.inputs, &st)
        };
        let resolved = match resolved {
            Ok(inputs) => inputs,
            Err(error) => {
                return StepRun {
                    action_id: action_id.to_string(),
                    kind: la.spec.kind.clone(),
                    input: Value::Null,
                    started_at,
                    duration_ms: t0.elapsed().as_millis() as u64,
                    result: Err(error),
                }
            }
        };
        let input_record = Value::Object(resolved.clone().into_iter().collect());

        let ctx = self.node_context(rc, la, resolved);
        let fut = la.node.execute(ctx);
        let result = match la.spec.timeout_ms {
            Some(ms) => match timeout(Duration::from_millis(ms), fut).await {
                Ok(r) => r,
                Err(_) => Err(NodeError::Timeout { ms }),
            },
            None => fut.await,
        };

        StepRun {
            action_id: action_id.to_string(),
            kind: la.spec.kind.clone(),
            input: input_record,
            started_at,
            duration_ms: t0.elapsed().as_millis() as u64,
            result,
        }
    }

    /// Drive an enumerator action: `first`, then per iteration execute
    /// the body subgraph and advance with `next`, until `eof` or the
    /// `times` bound. `next` is never called after `eof` is observed; an
    /// out-of-range `next` surfaces as a fatal run error.
    async fn drive_loop(&self, rc: &RunCtx<'_>, action_id: &str) -> Result<(), RunHalt> {
        let la = &rc.loaded.actions[action_id];
        let started_at = Utc::now();
        let t0 = Instant::now();
        rc.emitter.action_started(action_id, &la.spec.kind);

        let resolved = {
            let st = rc.state.read().await;
            loomcore::resolve_inputs(&la.spec.inputs, &st)
        };
        let resolved = match resolved {
            Ok(inputs) => inputs,
            Err(error) => {
                return Err(self
                    .fail_enumerator(rc, la, Value::Null, started_at, error)
                    .await)
            }
        };
        let input_record = Value::Object(resolved.clone().into_iter().collect());
        let ctx = self.node_context(rc, la, resolved);

        let mut cursor = match la.node.first(ctx.clone()).await {
            Ok(c) => c,
            Err(error) => {
                return Err(self
                    .fail_enumerator(rc, la, input_record, started_at, error)
                    .await)
            }
        };

        let times = la.spec.times;
        let mut iterations: u64 = 0;
        let body = &rc.loaded.bodies[action_id];

        loop {
            if cursor.eof {
                break;
            }
            if times > 0 && iterations >= times {
                break;
            }
            if rc.cancel.is_cancelled() {
                rc.trace
                    .write()
                    .await
                    .push(StepTrace::skipped(action_id, &la.spec.kind, started_at));
                return Err(RunHalt::Cancelled);
            }

            {
                let mut st = rc.state.write().await;
                st.set_current(cursor.data.clone());
                st.insert(
                    action_id,
                    serde_json::to_value(&cursor).unwrap_or(Value::Null),
                );
            }

            if let Err(halt) = self.execute_waves(rc, body).await {
                // The enumerator was dispatched too; account for it.
                match halt {
                    RunHalt::Cancelled => {
                        rc.trace
                            .write()
                            .await
                            .push(StepTrace::skipped(action_id, &la.spec.kind, started_at));
                    }
                    RunHalt::Failed { ref error, .. } => {
                        rc.trace.write().await.push(StepTrace::failed(
                            action_id,
                            &la.spec.kind,
                            input_record.clone(),
                            format!("loop body failed: {error}"),
                            started_at,
                        ));
                    }
                }
                return Err(halt);
            }
            iterations += 1;

            if times > 0 && iterations >= times {
                break;
            }

            cursor = match la.node.next(ctx.clone(), cursor.current).await {
                Ok(c) => c,
                Err(error) => {
                    return Err(self
                        .fail_enumerator(rc, la, input_record, started_at, error)
                        .await)
                }
            };
        }

        let output = loop_summary(iterations, &cursor);
        rc.trace.write().await.push(StepTrace::succeeded(
            action_id,
            &la.spec.kind,
            input_record,
            output.clone(),
            started_at,
        ));
        rc.state.write().await.set_output(action_id, output.clone());
        rc.emitter
            .action_completed(action_id, output.clone(), t0.elapsed().as_millis() as u64);
        rc.responder.on_action(action_id, &output);
        Ok(())
    }

    async fn fail_enumerator(
        &self,
        rc: &RunCtx<'_>,
        la: &LoadedAction,
        input: Value,
        started_at: chrono::DateTime<Utc>,
        error: NodeError,
    ) -> RunHalt {
        tracing::warn!(action = %la.spec.id, %error, "enumerator failed");
        rc.trace.write().await.push(StepTrace::failed(
            &la.spec.id,
            &la.spec.kind,
            input,
            error.to_string(),
            started_at,
        ));
        rc.emitter.action_failed(&la.spec.id, &error.to_string());
        RunHalt::Failed {
            action_id: la.spec.id.clone(),
            error,
        }
    }

    fn node_context(
        &self,
        rc: &RunCtx<'_>,
        la: &LoadedAction,
        inputs: HashMap<String, Value>,
    ) -> NodeContext {
        NodeContext {
            action_id: la.spec.id.clone(),
            inputs,
            state: rc.state.clone(),
            trigger: rc.trigger.clone(),
            connect: la.connect.clone(),
            events: rc.emitter.clone(),
            cancellation: rc.cancel.clone(),
        }
    }
}

fn loop_summary(iterations: u64, cursor: &EnumeratorCursor) -> Value {
    json!({
        "iterations": iterations,
        "current": cursor.current,
        "eof": cursor.eof,
    })
}

/// Every `$`-expression in an action's inputs must parse at load time.
fn validate_input_exprs(spec: &WorkflowAction) -> Result<(), ConfigError> {
    fn walk(value: &Value, action: &str) -> Result<(), ConfigError> {
        match value {
            Value::String(s) if s.starts_with("\\$") => Ok(()),
            _ => {
                if let Some(expr) = loomcore::is_path_expr(value) {
                    loomcore::validate_path(expr).map_err(|e| ConfigError::BadExpression {
                        expr: expr.to_string(),
                        reason: format!("{e} (action '{action}')"),
                    })
                } else {
                    match value {
                        Value::Array(items) => {
                            items.iter().try_for_each(|v| walk(v, action))
                        }
                        Value::Object(map) => {
                            map.values().try_for_each(|v| walk(v, action))
                        }
                        _ => Ok(()),
                    }
                }
            }
        }
    }
    spec.inputs
        .values()
        .try_for_each(|v| walk(v, &spec.id))
}

/// Cycles are only legal through `Loop` edges (re-entry by design);
/// everything else must form a DAG.
fn check_acyclic(config: &WorkflowConfig) -> Result<(), ConfigError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();
    for action in &config.actions {
        index.insert(action.id.as_str(), graph.add_node(action.id.as_str()));
    }
    for rel in &config.relation {
        if rel.link == LinkKind::Loop {
            continue;
        }
        if let (Some(&from), Some(&to)) =
            (index.get(rel.from.as_str()), index.get(rel.to.as_str()))
        {
            graph.add_edge(from, to, ());
        }
    }
    toposort(&graph, None)
        .map(|_| ())
        .map_err(|_| ConfigError::CyclicRelation)
}

/// Actions belonging to each enumerator's loop body: everything reachable
/// from its `Loop` edges through `Data`/`Composite` edges.
fn collect_loop_bodies(config: &WorkflowConfig) -> HashMap<String, Vec<String>> {
    let mut bodies = HashMap::new();
    for action in &config.actions {
        let entries: Vec<&str> = config
            .relation
            .iter()
            .filter(|r| r.link == LinkKind::Loop && r.from == action.id)
            .map(|r| r.to.as_str())
            .collect();
        if entries.is_empty() {
            continue;
        }

        let mut members = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = entries.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if id == action.id || !seen.insert(id) {
                continue;
            }
            members.push(id.to_string());
            for rel in &config.relation {
                if rel.from == id
                    && matches!(rel.link, LinkKind::Data | LinkKind::Composite)
                {
                    queue.push_back(rel.to.as_str());
                }
            }
        }
        bodies.insert(action.id.clone(), members);
    }
    bodies
}

/// Actions whose every incoming edge is `Done` are terminal markers and
/// are never dispatched.
fn collect_done_markers(config: &WorkflowConfig) -> HashSet<&str> {
    config
        .actions
        .iter()
        .filter_map(|action| {
            let incoming: Vec<&LinkKind> = config
                .relation
                .iter()
                .filter(|r| r.to == action.id)
                .map(|r| &r.link)
                .collect();
            if !incoming.is_empty() && incoming.iter().all(|l| **l == LinkKind::Done) {
                Some(action.id.as_str())
            } else {
                None
            }
        })
        .collect()
}

/// Group a set of actions into dependency waves: an action is ready once
/// every producer feeding it has completed. Producers inside a loop body
/// resolve to the owning enumerator.
fn build_waves(
    config: &WorkflowConfig,
    members: &[&str],
    owner_of: &HashMap<&str, &str>,
) -> Result<Vec<Vec<String>>, ConfigError> {
    let member_set: HashSet<&str> = members.iter().copied().collect();
    let mut deps: HashMap<&str, HashSet<&str>> = HashMap::new();
    for id in members {
        let mut producers = HashSet::new();
        for rel in &config.relation {
            if rel.to != *id || rel.link == LinkKind::Loop {
                continue;
            }
            let producer = owner_of
                .get(rel.from.as_str())
                .copied()
                .unwrap_or(rel.from.as_str());
            if producer != *id && member_set.contains(producer) {
                producers.insert(producer);
            }
        }
        deps.insert(id, producers);
    }

    let mut waves = Vec::new();
    let mut completed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&str> = members.to_vec();
    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| deps[id].is_subset(&completed))
            .collect();
        if ready.is_empty() {
            return Err(ConfigError::CyclicRelation);
        }
        remaining.retain(|id| !ready.contains(id));
        completed.extend(ready.iter().copied());
        waves.push(ready.into_iter().map(String::from).collect());
    }
    Ok(waves)
}

fn resolve_respond_policy(
    config: &WorkflowConfig,
    spec: &WorkflowAction,
) -> Result<RespondPolicy, ConfigError> {
    let watch = match (spec.respond_data, spec.respond_mode) {
        (RespondData::WorkflowResult, _) => None,
        (RespondData::NodeResult, RespondMode::OnCall | RespondMode::OnFinished) => {
            Some(spec.id.clone())
        }
        (RespondData::NodeResult, RespondMode::OnNode) => {
            let target = spec
                .inputs
                .get("respond_node")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ConfigError::UnknownRespondNode("<unset>".to_string()))?;
            if config.find_action(target).is_none() {
                return Err(ConfigError::UnknownRespondNode(target.to_string()));
            }
            Some(target.to_string())
        }
    };
    Ok(RespondPolicy {
        mode: spec.respond_mode,
        data: spec.respond_data,
        watch,
    })
}
