use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use houndactions::{HttpAutomation, HttpIngest, SimulatedPage};
use houndcore::{ExecutionEvent, OutputBinding, Step, StepType, Value, Workflow};
use houndruntime::{EngineConfig, ExecutionStore, Orchestrator};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hound")]
#[command(about = "Workflow automation engine CLI", long_about = None)]
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

        /// Initial variables as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Single variable assignment, name=value (repeatable)
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Page-automation endpoint URL
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Ingestion backend endpoint URL
        #[arg(long)]
        ingest_endpoint: Option<String>,

        /// Run against the in-memory simulated page instead of a
        /// remote endpoint
        #[arg(long)]
        simulate: bool,

        /// Directory for execution snapshots
        #[arg(long, default_value = ".hound/state")]
        state_dir: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List stored executions
    Executions {
        #[arg(long, default_value = ".hound/state")]
        state_dir: PathBuf,
    },

    /// Resume an interrupted execution from its snapshot
    Resume {
        /// Execution id to resume
        id: String,

        /// Path to the workflow JSON file the execution was created
        /// from
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long)]
        endpoint: Option<String>,

        #[arg(long)]
        simulate: bool,

        #[arg(long, default_value = ".hound/state")]
        state_dir: PathBuf,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Delete old finished execution snapshots
    Cleanup {
        /// Remove terminal executions older than this many days
        #[arg(long, default_value_t = 7)]
        days: i64,

        #[arg(long, default_value = ".hound/state")]
        state_dir: PathBuf,
    },

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            vars,
            endpoint,
            ingest_endpoint,
            simulate,
            state_dir,
            verbose,
        } => {
            init_logging(verbose);
            let variables = parse_variables(input, vars)?;
            let orchestrator =
                build_orchestrator(simulate, endpoint, ingest_endpoint, &state_dir).await?;
            run_workflow(&orchestrator, file, variables).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Executions { state_dir } => {
            list_executions(state_dir).await?;
        }

        Commands::Resume {
            id,
            file,
            endpoint,
            simulate,
            state_dir,
            verbose,
        } => {
            init_logging(verbose);
            let orchestrator = build_orchestrator(simulate, endpoint, None, &state_dir).await?;
            resume_execution(&orchestrator, &id, file).await?;
        }

        Commands::Cleanup { days, state_dir } => {
            let store = ExecutionStore::open(state_dir).await?;
            let removed = store.cleanup(chrono::Duration::days(days)).await?;
            println!("🧹 Removed {} old execution snapshot(s)", removed);
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

/// `--input '{"a": 1}'` merged with any number of `--var name=value`;
/// the latter win on collision.
fn parse_variables(input: Option<String>, vars: Vec<String>) -> Result<HashMap<String, Value>> {
    let mut variables: HashMap<String, Value> = if let Some(input_str) = input {
        let json: serde_json::Value = serde_json::from_str(&input_str)?;
        match json {
            serde_json::Value::Object(obj) => obj
                .into_iter()
                .map(|(k, v)| (k, Value::from_json(v)))
                .collect(),
            _ => return Err(anyhow!("--input must be a JSON object")),
        }
    } else {
        HashMap::new()
    };

    for assignment in vars {
        let (name, raw) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("--var must be name=value, got '{assignment}'"))?;
        // Values that parse as JSON keep their type; anything else is
        // a plain string.
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from_json)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        variables.insert(name.to_string(), value);
    }

    Ok(variables)
}

async fn build_orchestrator(
    simulate: bool,
    endpoint: Option<String>,
    ingest_endpoint: Option<String>,
    state_dir: &PathBuf,
) -> Result<Orchestrator> {
    let store = Arc::new(ExecutionStore::open(state_dir.clone()).await?);
    let mut orchestrator = if simulate {
        Orchestrator::new(Arc::new(SimulatedPage::new()), EngineConfig::default())
    } else {
        let endpoint = endpoint.ok_or_else(|| {
            anyhow!("either --simulate or --endpoint <url> is required")
        })?;
        Orchestrator::new(Arc::new(HttpAutomation::new(endpoint)), EngineConfig::default())
    };
    if let Some(ingest) = ingest_endpoint {
        orchestrator = orchestrator.with_ingest(Arc::new(HttpIngest::new(ingest)));
    }
    Ok(orchestrator.with_store(store))
}

fn load_workflow(file: &PathBuf) -> Result<Workflow> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let workflow: Workflow = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(workflow)
}

fn spawn_event_printer(
    mut events: tokio::sync::broadcast::Receiver<ExecutionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::ExecutionStarted { workflow_id, .. } => {
                    println!("▶️  Execution started: {}", workflow_id);
                }
                ExecutionEvent::StepStarted {
                    step_id, step_type, ..
                } => {
                    println!("  ⚡ Starting step: {} ({})", step_id, step_type);
                }
                ExecutionEvent::StepCompleted {
                    step_id,
                    duration_ms,
                    ..
                } => {
                    println!("  ✅ Step {} completed in {}ms", step_id, duration_ms);
                }
                ExecutionEvent::StepFailed { step_id, error, .. } => {
                    println!("  ❌ Step {} failed: {}", step_id, error);
                }
                ExecutionEvent::RetryScheduled {
                    step_id,
                    attempt,
                    delay_ms,
                    ..
                } => {
                    println!(
                        "  🔁 Retrying step {} (attempt {}) in {}ms",
                        step_id, attempt, delay_ms
                    );
                }
                ExecutionEvent::StatusChanged { from, to, .. } => {
                    println!("  🔄 Status: {} -> {}", from, to);
                }
                ExecutionEvent::EvidenceAdded { label, .. } => {
                    println!("  📎 Evidence captured: {}", label);
                }
                ExecutionEvent::ExecutionFinished {
                    status,
                    duration_ms,
                    ..
                } => {
                    println!("✨ Execution {} after {}ms", status, duration_ms);
                }
            }
        }
    })
}

async fn run_workflow(
    orchestrator: &Orchestrator,
    file: PathBuf,
    variables: HashMap<String, Value>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(&file)?;
    println!("📋 Workflow: {}", workflow.name);
    println!("   Steps: {}", workflow.steps.len());
    println!();

    let workflow_id = workflow.id.clone();
    orchestrator.manager().register(workflow).await?;

    let printer = spawn_event_printer(orchestrator.subscribe_events());
    let summary = orchestrator.run_workflow(&workflow_id, variables).await?;

    // Let buffered events drain before the summary block.
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    printer.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", summary.execution_id);
    println!("   Status: {}", summary.status);
    println!(
        "   Completed: {}/{} steps",
        summary.completed_steps, summary.total_steps
    );
    println!("   Evidence items: {}", summary.evidence_count);
    if summary.error_count > 0 {
        println!("   Errors: {}", summary.error_count);
    }

    Ok(())
}

async fn resume_execution(orchestrator: &Orchestrator, id: &str, file: PathBuf) -> Result<()> {
    let execution_id = ExecutionStore::parse_id(id)
        .map_err(|_| anyhow!("'{id}' is not a valid execution id"))?;
    let workflow = load_workflow(&file)?;
    orchestrator.manager().register(workflow).await?;

    println!("⏯️  Resuming execution: {}", execution_id);
    let printer = spawn_event_printer(orchestrator.subscribe_events());
    let summary = orchestrator.resume_execution(execution_id).await?;

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    printer.abort();

    println!();
    println!(
        "📊 Resumed execution {}: {} ({}/{} steps)",
        summary.execution_id, summary.status, summary.completed_steps, summary.total_steps
    );
    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(&file)?;
    workflow.validate()?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Steps: {}", workflow.steps.len());

    Ok(())
}

async fn list_executions(state_dir: PathBuf) -> Result<()> {
    let store = ExecutionStore::open(state_dir).await?;
    let listings = store.list().await?;
    if listings.is_empty() {
        println!("No stored executions");
        return Ok(());
    }

    println!("📦 Stored executions:");
    for listing in listings {
        println!(
            "  • {}  {}  {}  {}/{} steps  saved {}",
            listing.execution_id,
            listing.workflow_id,
            listing.status,
            listing.current_step_index,
            listing.total_steps,
            listing.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let workflow = Workflow::new("example-search", "Example search capture")
        .with_description("Navigates to a page, extracts the headline and captures a screenshot")
        .with_step(
            Step::new("open", StepType::Navigate).with_param("url", Value::String("${url}".into())),
        )
        .with_step(
            Step::new("headline", StepType::Extract)
                .with_param("selector", Value::String("h1".into()))
                .with_output("headline", OutputBinding::Field("data".into())),
        )
        .with_step(Step::new("shot", StepType::Screenshot));

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  hound run --file {} --simulate --input '{{\"url\": \"https://example.test\"}}'",
        output.display()
    );

    Ok(())
}
