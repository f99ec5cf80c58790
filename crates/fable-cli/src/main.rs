//! CLI binary for running, resuming, and inspecting Fable workflows.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use fable_engine::{
    create_pause_marker, resume_command, FileStore, NullIndex, PhaseEngine, RetryExecutor,
    RunStatus, WorkflowConfig, WorkflowController, WorkflowState,
};
use fable_llm::{DynService, OpenAiCompatService};

#[derive(Parser)]
#[command(name = "fable", version, about = "Resilient long-form content generation workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new project from scratch
    Start {
        /// Project name (keys the checkpoint and pause marker)
        #[arg(short, long)]
        project: String,

        /// Path to a workflow config JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// One-line premise for the story
        #[arg(long)]
        premise: Option<String>,

        /// Number of chapters to write
        #[arg(long)]
        chapters: Option<u32>,

        /// Checkpoint/output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },

    /// Resume a project from its checkpoint
    Resume {
        #[arg(short, long)]
        project: String,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Approve a pending review gate before continuing
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject a pending review gate (re-runs the producing phase)
        #[arg(long)]
        reject: bool,

        /// Feedback attached to the review decision
        #[arg(long, default_value = "")]
        feedback: String,

        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },

    /// Show checkpointed progress for a project
    Status {
        #[arg(short, long)]
        project: String,

        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },

    /// Ask a running workflow to pause at its next step boundary
    Pause {
        #[arg(short, long)]
        project: String,

        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Start {
            project,
            config,
            premise,
            chapters,
            output,
        } => cmd_start(&project, config.as_deref(), premise, chapters, &output).await,
        Commands::Resume {
            project,
            config,
            approve,
            reject,
            feedback,
            output,
        } => cmd_resume(&project, config.as_deref(), approve, reject, &feedback, &output).await,
        Commands::Status { project, output } => cmd_status(&project, &output).await,
        Commands::Pause { project, output } => cmd_pause(&project, &output).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(
    project: &str,
    config_path: Option<&Path>,
    output: &Path,
) -> anyhow::Result<WorkflowConfig> {
    let mut config = match config_path {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::new(project),
    };
    config.project_name = project.to_string();
    config.checkpoint_dir = output.to_path_buf();
    Ok(config)
}

/// Build the provider fallback chain from the environment: OpenRouter
/// first, Groq as fallback, then a local Ollama endpoint if configured.
fn service_chain() -> anyhow::Result<Vec<Arc<DynService>>> {
    let model = std::env::var("FABLE_MODEL")
        .unwrap_or_else(|_| "meta-llama/llama-3.3-70b-instruct".to_string());
    let mut chain: Vec<Arc<DynService>> = Vec::new();

    if let Ok(service) = OpenAiCompatService::openrouter_from_env(&model) {
        chain.push(Arc::new(DynService::new(service)));
    }
    if let Ok(service) = OpenAiCompatService::groq_from_env(&model) {
        chain.push(Arc::new(DynService::new(service)));
    }
    if let Ok(base_url) = std::env::var("OLLAMA_BASE_URL") {
        chain.push(Arc::new(DynService::new(OpenAiCompatService::ollama(
            format!("{}/v1", base_url.trim_end_matches('/')),
            &model,
        ))));
    }

    if chain.is_empty() {
        anyhow::bail!(
            "no generation providers configured; set OPENROUTER_API_KEY, \
             GROQ_API_KEY, or OLLAMA_BASE_URL"
        );
    }
    Ok(chain)
}

async fn build_engine(
    config: WorkflowConfig,
    state: WorkflowState,
    controller: &WorkflowController,
) -> anyhow::Result<PhaseEngine> {
    let chain = service_chain()?;
    let executor = RetryExecutor::new(chain, config.retry.clone());
    let store_path = config
        .checkpoint_dir
        .join(format!("{}_project.json", config.project_name));
    let store = Arc::new(FileStore::open(store_path).await?);
    Ok(PhaseEngine::new(
        config,
        executor,
        store,
        Arc::new(NullIndex),
        state,
        controller.interrupter(),
    ))
}

async fn drive(
    project: &str,
    config: WorkflowConfig,
    state: WorkflowState,
) -> anyhow::Result<ExitCode> {
    let dir = config.checkpoint_dir.clone();
    let mut controller = WorkflowController::new(project, &dir);
    let mut engine = build_engine(config, state, &controller).await?;

    tracing::info!(project, "Launching workflow");
    let result = controller.run(&mut engine).await;
    report_outcome(project, result, &engine)
}

fn report_outcome(
    project: &str,
    result: fable_types::Result<RunStatus>,
    engine: &PhaseEngine,
) -> anyhow::Result<ExitCode> {
    match result {
        Ok(RunStatus::Complete) => {
            println!(
                "Workflow complete: {} words written.",
                engine.state().total_words_written
            );
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunStatus::Paused) => {
            println!("Workflow paused. Resume with: {}", resume_command(project));
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunStatus::AwaitingReview) => {
            println!("Structure is ready for review.");
            println!("Approve with: {} --approve", resume_command(project));
            println!(
                "Reject with:  {} --reject --feedback '<notes>'",
                resume_command(project)
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let failed = engine
                .state()
                .failed_step
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            eprintln!("Workflow failed at step '{failed}': {e}");
            eprintln!(
                "A checkpoint was saved. Resume with: {}",
                resume_command(project)
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_start(
    project: &str,
    config_path: Option<&Path>,
    premise: Option<String>,
    chapters: Option<u32>,
    output: &Path,
) -> anyhow::Result<ExitCode> {
    if WorkflowState::load(project, output).await?.is_some() {
        anyhow::bail!(
            "project '{project}' already has a checkpoint; use `{}` or pick a new name",
            resume_command(project)
        );
    }

    let mut config = load_config(project, config_path, output)?;
    if let Some(premise) = premise {
        config.premise = premise;
    }
    if let Some(chapters) = chapters {
        config.target_chapters = chapters;
    }

    let state = WorkflowState::new(project, output);
    drive(project, config, state).await
}

async fn cmd_resume(
    project: &str,
    config_path: Option<&Path>,
    approve: bool,
    reject: bool,
    feedback: &str,
    output: &Path,
) -> anyhow::Result<ExitCode> {
    let state = WorkflowState::load(project, output)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no checkpoint found for project '{project}'"))?;

    let config = load_config(project, config_path, output)?;
    let dir = config.checkpoint_dir.clone();
    let mut controller = WorkflowController::new(project, &dir);
    let mut engine = build_engine(config, state, &controller).await?;

    if approve || reject {
        engine.resume(approve, feedback).await;
    }

    tracing::info!(project, "Resuming workflow");
    let result = controller.run(&mut engine).await;
    report_outcome(project, result, &engine)
}

async fn cmd_status(project: &str, output: &Path) -> anyhow::Result<ExitCode> {
    let state = WorkflowState::load(project, output)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no checkpoint found for project '{project}'"))?;

    let report = state.status_report();
    println!("Project: {}", report.project_name);
    println!("Phase: {} ({:.1}%)", state.phase.name(), report.progress_percent);
    println!("Completed steps:");
    for step in &report.completed_steps {
        println!("  [x] {step}");
    }
    if let Some(ref step) = report.current_step {
        println!("In flight: {step}");
    }
    if let Some(ref step) = report.next_step {
        println!("Next: {step}");
    }
    if let Some(ref step) = report.failed_step {
        println!("Failed: {step}");
        println!("Resume with: {}", resume_command(project));
    }
    if let Some(gate) = &report.review_gate {
        println!("Review gate [{}]: {:?}", gate.phase, gate.status);
    }
    println!(
        "Chapters: {}/{} complete, {} words",
        report.chapters_completed, report.total_chapters, report.total_words_written
    );
    println!("Generation calls: {}", report.total_calls);
    for (provider, calls) in &report.provider_usage {
        println!("  {provider}: {calls}");
    }
    if report.total_errors > 0 {
        println!("Errors logged: {}", report.total_errors);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_pause(project: &str, output: &Path) -> anyhow::Result<ExitCode> {
    let path = create_pause_marker(project, output).await?;
    println!("Pause marker created: {}", path.display());
    println!("The workflow will checkpoint and stop at its next step boundary.");
    Ok(ExitCode::SUCCESS)
}
