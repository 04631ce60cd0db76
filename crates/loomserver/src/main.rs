use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpRequest, HttpResponse, HttpServer, Responder,
    Result as ActixResult,
};
use actix_ws::Message;
use loomcore::{EngineError, TriggerMessage, VerifyError, WorkflowConfig, WorkflowId};
use loomhooks::{check_method, AdapterSet, HmacAdapter, HookOutcome, InboundRequest, SuiteAdapter};
use loomnodes::HttpAgentInvoker;
use loomruntime::{init_global_registry, LoomRuntime, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<LoomRuntime>,
    adapters: Arc<AdapterSet>,
}

#[derive(Debug, Deserialize)]
struct SendEventRequest {
    workflow_id: WorkflowId,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    wait_output: bool,
}

#[derive(Debug, Serialize)]
struct SendEventResponse {
    event_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TraceQuery {
    #[serde(default = "default_include_output")]
    include_output: bool,
}

fn default_include_output() -> bool {
    true
}

fn engine_error_response(e: EngineError) -> HttpResponse {
    match e {
        EngineError::TraceNotFound(_) | EngineError::WorkflowNotFound(_) => {
            HttpResponse::NotFound().json(ErrorResponse::new(e.to_string()))
        }
        EngineError::Config(_) | EngineError::Verify(_) => {
            HttpResponse::BadRequest().json(ErrorResponse::new(e.to_string()))
        }
        other => HttpResponse::InternalServerError().json(ErrorResponse::new(other.to_string())),
    }
}

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "loom"
    }))
}

#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    config: web::Json<WorkflowConfig>,
) -> ActixResult<impl Responder> {
    let config = config.into_inner();
    info!("registering workflow: {} ({})", config.name, config.id);
    let id = data.runtime.register_workflow(config).await;
    Ok(HttpResponse::Created().json(serde_json::json!({ "id": id })))
}

#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflows: Vec<_> = data
        .runtime
        .list_workflows()
        .await
        .iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "actions": w.actions.len(),
                "relation": w.relation.len(),
                "is_active": w.is_active,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(workflows))
}

#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    match data.runtime.workflow(id).await {
        Some(workflow) => Ok(HttpResponse::Ok().json(workflow.as_ref())),
        None => Ok(HttpResponse::NotFound()
            .json(ErrorResponse::new(format!("workflow {id} not found")))),
    }
}

/// Trigger submission: sync (wait_output) or async (event id only).
#[post("/api/events")]
async fn send_event(
    data: web::Data<AppState>,
    req: web::Json<SendEventRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    let trigger = TriggerMessage::manual(req.workflow_id, req.payload);

    match data
        .runtime
        .send_event(req.workflow_id, trigger, req.wait_output)
        .await
    {
        Ok(receipt) => Ok(HttpResponse::Ok().json(SendEventResponse {
            event_id: receipt.event_id,
            output: receipt.output,
        })),
        Err(e) => {
            error!("event submission failed: {e}");
            Ok(engine_error_response(e))
        }
    }
}

#[get("/api/events/{id}/trace")]
async fn get_event_trace(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<TraceQuery>,
) -> ActixResult<impl Responder> {
    let event_id = path.into_inner();
    match data
        .runtime
        .mediator()
        .get_event_trace(event_id, query.include_output)
        .await
    {
        Ok(steps) => Ok(HttpResponse::Ok().json(steps)),
        Err(e) => Ok(engine_error_response(e)),
    }
}

#[get("/api/events/{id}/trace/{action_id}")]
async fn get_event_step_trace(
    data: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
    query: web::Query<TraceQuery>,
) -> ActixResult<impl Responder> {
    let (event_id, action_id) = path.into_inner();
    match data
        .runtime
        .mediator()
        .get_event_step_trace(event_id, &action_id, query.include_output)
        .await
    {
        Ok(step) => Ok(HttpResponse::Ok().json(step)),
        Err(e) => Ok(engine_error_response(e)),
    }
}

#[post("/api/events/{id}/stop")]
async fn stop_event(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let event_id = path.into_inner();
    let success = data.runtime.mediator().stop_event(event_id);
    Ok(HttpResponse::Ok().json(StopResponse { success }))
}

/// Webhook ingress, keyed by workflow id, accepting any HTTP method.
/// GET verification-phase requests answer with the decrypted echo; all
/// other requests are decoded, method-checked against the webhook
/// action's configuration, and submitted as a run.
async fn hook_ingress(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<WorkflowId>,
    query: web::Query<HashMap<String, String>>,
    body: web::Bytes,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    let Some(config) = data.runtime.workflow(workflow_id).await else {
        return Ok(HttpResponse::NotFound()
            .json(ErrorResponse::new(format!("workflow {workflow_id} not found"))));
    };
    let Some(action) = config.webhook_action() else {
        let e = VerifyError::NoWebhookAction(workflow_id.to_string());
        return Ok(HttpResponse::BadRequest().json(ErrorResponse::new(e.to_string())));
    };

    let provider = action
        .inputs
        .get("provider")
        .and_then(|v| v.as_str())
        .unwrap_or("plain");
    let adapter = match data.adapters.get(provider) {
        Ok(adapter) => adapter,
        Err(e) => return Ok(HttpResponse::BadRequest().json(ErrorResponse::new(e.to_string()))),
    };

    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_ascii_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();
    let inbound = InboundRequest {
        method: req.method().as_str().to_string(),
        path: req.path().to_string(),
        query: query.into_inner(),
        headers,
        body: body.to_vec(),
        content_type: req
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    };

    let outcome = match adapter.handle(&inbound, workflow_id) {
        Ok(outcome) => outcome,
        Err(e) => {
            info!(workflow_id = %workflow_id, error = %e, "webhook rejected");
            return Ok(HttpResponse::Unauthorized().json(ErrorResponse::new(e.to_string())));
        }
    };

    match outcome {
        // Byte-exact echo body, per the provider verification protocol.
        HookOutcome::Echo(echo) => Ok(HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(echo)),
        HookOutcome::Trigger(trigger) => {
            let expected = action
                .inputs
                .get("method")
                .and_then(|v| v.as_str())
                .unwrap_or("POST");
            if let Err(e) = check_method(expected, &trigger.method) {
                return Ok(
                    HttpResponse::MethodNotAllowed().json(ErrorResponse::new(e.to_string()))
                );
            }

            let (tx, rx) = tokio::sync::oneshot::channel();
            match data
                .runtime
                .send_webhook_event(workflow_id, trigger, tx)
                .await
            {
                Ok(receipt) => match rx.await {
                    Ok(value) => Ok(HttpResponse::Ok().json(serde_json::json!({
                        "event_id": receipt.event_id,
                        "output": value,
                    }))),
                    Err(_) => Ok(HttpResponse::Ok().json(serde_json::json!({
                        "event_id": receipt.event_id,
                    }))),
                },
                Err(e) => {
                    error!("webhook run failed to start: {e}");
                    Ok(engine_error_response(e))
                }
            }
        }
    }
}

/// WebSocket endpoint streaming run events.
#[get("/api/ws")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");
    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

#[get("/api/nodes")]
async fn list_node_kinds(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let kinds: Vec<_> = registry
        .list_kinds()
        .iter()
        .map(|kind| {
            let info = registry.info(kind);
            serde_json::json!({
                "kind": kind,
                "description": info.as_ref().map(|i| i.description.clone()).unwrap_or_default(),
                "category": info.as_ref().map(|i| i.category.clone()).unwrap_or_default(),
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(kinds))
}

fn build_adapters() -> AdapterSet {
    let adapters = AdapterSet::new();

    if let Ok(secret) = std::env::var("WEBHOOK_HMAC_SECRET") {
        adapters.register(Arc::new(HmacAdapter::new(secret.into_bytes())));
    }
    if let (Ok(token), Ok(key)) = (
        std::env::var("SUITE_CALLBACK_TOKEN"),
        std::env::var("SUITE_CALLBACK_AES_KEY"),
    ) {
        match SuiteAdapter::new(token, &key) {
            Ok(adapter) => adapters.register(Arc::new(adapter)),
            Err(e) => error!("suite adapter disabled: {e}"),
        }
    }

    adapters
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting loom server");

    let registry = init_global_registry(|registry| {
        loomnodes::register_builtin(registry);
        loomnodes::register_agent(registry, Arc::new(HttpAgentInvoker::from_env()));
    });

    let runtime = Arc::new(LoomRuntime::with_config(registry, RuntimeConfig::default()));
    let adapters = Arc::new(build_adapters());

    let app_state = web::Data::new(AppState { runtime, adapters });

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!("server listening on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(create_workflow)
            .service(list_workflows)
            .service(get_workflow)
            .service(send_event)
            .service(get_event_trace)
            .service(get_event_step_trace)
            .service(stop_event)
            .service(websocket_events)
            .service(list_node_kinds)
            .service(web::resource("/api/hooks/{workflow_id}").route(web::route().to(hook_ingress)))
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
