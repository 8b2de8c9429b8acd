use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use stepcore::{codes, Executable, OrderStore, Step, Workflow};
use stepmem::{run_until_idle, MemoryWorld};
use stepruntime::ROOT_WORKER_ID;

#[derive(Parser)]
#[command(name = "step")]
#[command(about = "Step Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file against the in-memory collaborators
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial arguments as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Effective user recorded on the work order
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List registered invocable authorities
    Invocables,

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
            user,
            verbose,
        } => {
            if verbose {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::DEBUG)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::INFO)
                    .init();
            }

            run_workflow(file, input, user).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Invocables => {
            list_invocables();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

async fn run_workflow(file: PathBuf, input: Option<String>, user: String) -> Result<()> {
    println!("Loading workflow from: {}", file.display());

    let workflow_json = std::fs::read_to_string(&file)?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)?;
    let workflow_uri = workflow.uri.clone();

    println!("Workflow: {}", workflow.name);
    println!("   Steps: {}", workflow.steps.len());
    println!();

    let args: HashMap<String, serde_json::Value> = if let Some(input_str) = input {
        let json: serde_json::Value = serde_json::from_str(&input_str)?;
        match json {
            serde_json::Value::Object(obj) => obj.into_iter().collect(),
            _ => return Err(anyhow::anyhow!("Input must be a JSON object")),
        }
    } else {
        HashMap::new()
    };

    let world = MemoryWorld::new();
    world.store.add_workflow(workflow).await;
    let engine = world.engine();

    // print status updates as workers reach reportable states
    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!(
                "  [{:?}] worker {} -> {:?}",
                event.severity, event.worker_id, event.status
            );
        }
    });

    let (order, worker) = engine.create_work_order(&workflow_uri, args, &user, 0).await?;
    println!("Started work order: {}", order.uri);
    engine.start(&worker).await?;

    let steps = run_until_idle(&engine, &world.transport).await?;

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let finished = world.store.load_order(&order.uri).await?;
    println!();
    println!("Execution summary:");
    println!("   Steps executed: {}", steps);
    println!("   Status: {:?}", finished.status);
    println!("   Workers: {:?}", finished.worker_ids);
    if let Some(end) = finished.end_time {
        println!("   Duration: {}ms", (end - finished.start_time).num_milliseconds());
    }

    if !finished.outputs.is_empty() {
        println!();
        println!("Outputs:");
        for (key, value) in &finished.outputs {
            println!("   {}: {}", key, value);
        }
    }

    let records = world.store.step_records(&order.uri, ROOT_WORKER_ID).await?;
    if !records.is_empty() {
        println!();
        println!("Root worker trail:");
        for record in records {
            println!(
                "   {} [{:?}] -> {}",
                record.name,
                record.status,
                record.return_value.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("Validating workflow: {}", file.display());

    let workflow_json = std::fs::read_to_string(&file)?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)?;

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match &workflow.start_step {
        None => errors.push("no start step declared".to_string()),
        Some(start) => {
            if workflow.step(start).is_none() {
                errors.push(format!("start step '{}' does not exist", start));
            }
        }
    }
    if workflow.category.is_empty() {
        errors.push("workflow category is empty".to_string());
    }

    for step in &workflow.steps {
        if step.executable.is_empty() {
            errors.push(format!("step '{}' has no executable", step.name));
        } else if let Executable::Unknown(raw) = Executable::parse(&step.executable) {
            if raw.starts_with('$') {
                errors.push(format!(
                    "step '{}' uses unknown special form {}",
                    step.name, raw
                ));
            } else {
                warnings.push(format!(
                    "step '{}' executable '{}' has an unrecognized scheme; it will suspend",
                    step.name, raw
                ));
            }
        }
        for transition in &step.transitions {
            if transition.target.is_empty() {
                errors.push(format!(
                    "step '{}' transition '{}' has an empty target",
                    step.name, transition.name
                ));
                continue;
            }
            let reserved = transition.target.starts_with(codes::RETURN)
                || transition.target == codes::FAIL
                || transition.target == codes::CANCEL
                || transition.target == codes::JOIN;
            if !reserved && workflow.step(&transition.target).is_none() {
                errors.push(format!(
                    "step '{}' transition '{}' targets unknown step '{}'",
                    step.name, transition.name, transition.target
                ));
            }
        }
        for name in split_or_fork_targets(step) {
            if workflow.step(&name).is_none() {
                warnings.push(format!(
                    "step '{}' fans out to unknown step '{}'; that child will be stillborn",
                    step.name, name
                ));
            }
        }
    }

    for warning in &warnings {
        println!("   warning: {}", warning);
    }
    if errors.is_empty() {
        println!("Workflow is valid:");
        println!("   Name: {}", workflow.name);
        println!("   Steps: {}", workflow.steps.len());
        Ok(())
    } else {
        for error in &errors {
            println!("   error: {}", error);
        }
        Err(anyhow::anyhow!("{} validation error(s)", errors.len()))
    }
}

fn split_or_fork_targets(step: &Step) -> Vec<String> {
    use stepcore::SpecialForm;
    match SpecialForm::parse(&step.executable) {
        Some(SpecialForm::Split(names)) | Some(SpecialForm::Fork(names)) => names,
        _ => Vec::new(),
    }
}

fn list_invocables() {
    println!("Registered invocable authorities:");
    println!();

    let world = MemoryWorld::new();
    let engine = world.engine();
    let mut authorities = engine.registry().authorities();
    authorities.sort();
    for authority in authorities {
        println!("  - invocable://{}", authority);
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let workflow = Workflow::new("workflow://demo/order-intake", "Order intake", "alpha")
        .with_start_step("Intake")
        .with_step(
            Step::new("Intake", "invocable://Echo")
                .with_transition("ok", "FanOut")
                .with_transition("", "$FAIL"),
        )
        .with_step(
            Step::new("FanOut", "$SPLIT:Enrich,Price")
                .with_transition("ok", "Publish")
                .with_transition("error", "$FAIL"),
        )
        .with_step(Step::new("Enrich", "invocable://Echo").with_transition("ok", "$JOIN"))
        .with_step(Step::new("Price", "invocable://Echo").with_transition("ok", "$JOIN"))
        .with_step(
            Step::new("Publish", "invocable://SetOutput")
                .with_view("published", "true")
                .with_transition("ok", "$RETURN"),
        );

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  step run --file {}", output.display());

    Ok(())
}
