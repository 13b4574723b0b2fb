// crates/relaycli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relaycore::{
    DataMap, Edge, ExecutionEvent, ExecutionMode, ExecutionStatus, Node, NodeEvent, NodeType,
    WorkflowDefinition, WorkflowGraph,
};
use relayruntime::{InMemoryExecutionStore, InMemoryWorkflowStore, Runtime, RuntimeConfig, TriggerInput};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Execution mode: manual, webhook, schedule or test
        #[arg(short, long, default_value = "manual")]
        mode: ExecutionMode,

        /// User the execution runs as
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file and print its execution order
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            mode,
            user,
            config,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(file, input, mode, user, config).await?;
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

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&workflow_json)
        .with_context(|| format!("Failed to parse workflow {}", file.display()))
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => RuntimeConfig::default(),
    };
    Ok(config.with_env_overrides(std::env::vars())?)
}

fn parse_input(input: Option<String>) -> Result<DataMap> {
    let Some(input_str) = input else {
        return Ok(DataMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input_str).context("Input is not valid JSON")? {
        serde_json::Value::Object(obj) => Ok(obj),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_workflow(
    file: PathBuf,
    input: Option<String>,
    mode: ExecutionMode,
    user: String,
    config: Option<PathBuf>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(&file)?;
    let config = load_config(config.as_deref())?;
    let trigger_data = parse_input(input)?;
    tracing::debug!(?config, "Runtime configuration");

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.graph.nodes().len());
    println!("   Edges: {}", workflow.graph.edges().len());
    println!();

    let workflow_id = workflow.id.clone();
    let workflows = Arc::new(InMemoryWorkflowStore::new());
    workflows.put_definition(workflow).await;

    let runtime = Runtime::new(
        config,
        Arc::new(relaynodes::standard_registry()),
        workflows,
        Arc::new(InMemoryExecutionStore::new()),
    );

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::ExecutionStarted { node_count, .. } => {
                    println!("▶️  Execution started ({} nodes)", node_count);
                }
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    execution_time_ms,
                    ..
                } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, execution_time_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     📊 [{}] {}% - {}", node_id, percent, msg),
                        None => println!("     📊 [{}] {}%", node_id, percent),
                    },
                },
                ExecutionEvent::ExecutionFinished {
                    status, duration_ms, ..
                } => {
                    match status {
                        ExecutionStatus::Success => {
                            println!("✨ Execution completed successfully in {}ms", duration_ms)
                        }
                        other => println!("💥 Execution ended {} after {}ms", other, duration_ms),
                    }
                    break;
                }
            }
        }
    });

    let trigger = TriggerInput::new(workflow_id, user)
        .with_mode(mode)
        .with_data(trigger_data);
    let execution = runtime.execute(trigger).await?;

    // The listener stops after the finish event.
    let _ = event_task.await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", execution.id());
    println!("   Status: {}", execution.status());
    println!("   Duration: {}", execution.formatted_duration());

    let results = execution.node_results();
    if !results.is_empty() {
        println!();
        println!("📤 Node results:");
        for (node_id, result) in results {
            if result.success {
                let data = serde_json::to_string(&result.data.clone().unwrap_or_default())?;
                println!("   {} ({}ms): {}", node_id, result.execution_time_ms, data);
            } else {
                println!(
                    "   {} ({}ms): failed: {}",
                    node_id,
                    result.execution_time_ms,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    if execution.status() != ExecutionStatus::Success {
        bail!(
            "Execution {}: {}",
            execution.status(),
            execution.error().unwrap_or("no error recorded")
        );
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(&file)?;
    let registry = relaynodes::standard_registry();

    workflow
        .graph
        .validate(&registry)
        .context("Workflow graph is invalid")?;
    let order = relayruntime::sort(&workflow.graph)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.graph.nodes().len());
    println!("   Edges: {}", workflow.graph.edges().len());
    println!("   Execution order: {}", order.join(" → "));

    let missing: Vec<&str> = workflow
        .graph
        .nodes()
        .iter()
        .map(|n| n.node_type.as_str())
        .filter(|t| !registry.has(t))
        .collect();
    if !missing.is_empty() {
        println!("⚠️  No executor registered for: {}", missing.join(", "));
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = relaynodes::standard_registry();

    for node_type in registry.list_supported_types() {
        if let Some(metadata) = registry.metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let mut graph = WorkflowGraph::new();
    graph.add_node(Node::new("start", NodeType::MANUAL_TRIGGER, "Start").with_position(100.0, 100.0))?;
    graph.add_node(
        Node::new("fetch", NodeType::HTTP_REQUEST, "Fetch Data")
            .with_config("url", "https://api.github.com/zen")
            .with_config("method", "GET")
            .with_config("headers", serde_json::json!({"User-Agent": "relay"}))
            .with_position(300.0, 100.0),
    )?;
    graph.add_node(
        Node::new("shape", NodeType::DATA_TRANSFORMER, "Keep Body")
            .with_config("remove", serde_json::json!(["headers"]))
            .with_config("rename", serde_json::json!({"body": "zen"}))
            .with_position(500.0, 100.0),
    )?;
    graph.add_edge(Edge::new("start", "fetch"))?;
    graph.add_edge(Edge::new("fetch", "shape"))?;

    let mut workflow = WorkflowDefinition::new("example-http", "Example HTTP Workflow").with_graph(graph);
    workflow.description = Some("Fetches data from an API and reshapes the result".to_string());

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  relay run --file {} --input '{{\"requested_by\": \"me\"}}'",
        output.display()
    );

    Ok(())
}
