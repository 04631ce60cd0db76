use anyhow::Result;
use clap::{Parser, Subcommand};
use loomcore::{
    LinkKind, RunEvent, TriggerMessage, WorkflowAction, WorkflowConfig,
};
use loomruntime::{init_global_registry, LoomRuntime, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "Loom workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file against a trigger payload
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger payload as JSON string
        #[arg(short, long)]
        payload: Option<String>,

        /// Return only the event id instead of waiting for the output
        #[arg(long)]
        no_wait: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn build_runtime() -> LoomRuntime {
    let registry = init_global_registry(|registry| {
        loomnodes::register_builtin(registry);
        loomnodes::register_agent(
            registry,
            Arc::new(loomnodes::HttpAgentInvoker::from_env()),
        );
    });
    LoomRuntime::with_config(registry, RuntimeConfig::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            payload,
            no_wait,
            verbose,
        } => {
            let level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
                )
                .init();

            run_workflow(file, payload, !no_wait).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

async fn run_workflow(file: PathBuf, payload: Option<String>, wait: bool) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let config_json = std::fs::read_to_string(&file)?;
    let config: WorkflowConfig = serde_json::from_str(&config_json)?;
    let workflow_id = config.id;

    println!("📋 Workflow: {}", config.name);
    println!("   Actions: {}", config.actions.len());
    println!("   Relations: {}", config.relation.len());
    println!();

    let body: serde_json::Value = match payload {
        Some(raw) => serde_json::from_str(&raw)?,
        None => serde_json::Value::Null,
    };

    let runtime = build_runtime();
    runtime.register_workflow(config).await;

    // Stream run events while the workflow executes.
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RunEvent::RunStarted { event_id, .. } => {
                    println!("▶️  Run started: {event_id}");
                }
                RunEvent::ActionStarted { action_id, kind, .. } => {
                    println!("  ⚡ {action_id} ({kind})");
                }
                RunEvent::ActionCompleted {
                    action_id,
                    duration_ms,
                    ..
                } => {
                    println!("  ✅ {action_id} completed in {duration_ms}ms");
                }
                RunEvent::ActionFailed {
                    action_id, error, ..
                } => {
                    println!("  ❌ {action_id} failed: {error}");
                }
                RunEvent::RunCompleted {
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Run completed in {duration_ms}ms");
                    } else {
                        println!("💥 Run failed after {duration_ms}ms");
                    }
                }
            }
        }
    });

    let trigger = TriggerMessage::manual(workflow_id, body);
    let result = runtime.send_event(workflow_id, trigger, wait).await;

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let receipt = result?;
    println!();
    println!("📊 Event: {}", receipt.event_id);
    if let Some(output) = receipt.output {
        println!("📤 Output:");
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    let steps = runtime
        .mediator()
        .get_event_trace(receipt.event_id, false)
        .await?;
    println!();
    println!("🧾 Trace ({} steps):", steps.len());
    for step in steps {
        println!(
            "   {:?} {} ({}) at {}",
            step.status, step.action_id, step.kind, step.started_at
        );
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let config_json = std::fs::read_to_string(&file)?;
    let config: WorkflowConfig = serde_json::from_str(&config_json)?;

    // Full load-time validation: kinds, links, expressions, cycles.
    let registry = init_global_registry(|registry| {
        loomnodes::register_builtin(registry);
        loomnodes::register_agent(
            registry,
            Arc::new(loomnodes::HttpAgentInvoker::from_env()),
        );
    });
    let runtime = LoomRuntime::new(registry);
    let engine = loomruntime::ExecutionEngine::new(
        runtime.registry().clone(),
        runtime.connects().clone(),
        1,
    );
    engine.load(Arc::new(config.clone()))?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", config.name);
    println!("   Actions: {}", config.actions.len());
    println!("   Relations: {}", config.relation.len());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available node kinds:");
    println!();

    let registry = init_global_registry(|registry| {
        loomnodes::register_builtin(registry);
        loomnodes::register_agent(
            registry,
            Arc::new(loomnodes::HttpAgentInvoker::from_env()),
        );
    });

    for kind in registry.list_kinds() {
        if let Some(info) = registry.info(&kind) {
            println!("  • {} ({})", kind, info.category);
            if !info.description.is_empty() {
                println!("    {}", info.description);
            }
        } else {
            println!("  • {kind}");
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let mut config = WorkflowConfig::new("Greeting pipeline");

    config.add_action(WorkflowAction::new("start", "trigger.manual"));
    config.add_action(
        WorkflowAction::new("greet", "transform.template")
            .with_input("template", "hello {{start.user}}"),
    );
    config.add_action(WorkflowAction::new("end", "log.message"));

    config.relate("start", "greet", LinkKind::Data);
    config.relate("greet", "end", LinkKind::Done);

    let json = serde_json::to_string_pretty(&config)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  loom run --file {} --payload '{{\"user\": \"ada\"}}'",
        output.display()
    );

    Ok(())
}
