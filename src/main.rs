use chrono::{TimeZone, Utc};
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{error, info};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::{Commands, OverrideArgs};
use planloop::checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
use planloop::config::{Config, RunOverrides};
use planloop::domain::{Run, RunStatus, RunSummary};
use planloop::llm::AnthropicModel;
use planloop::memory::JsonlMemory;
use planloop::prompt::PromptRenderer;
use planloop::reflect::ConsoleGate;
use planloop::runner::LoopController;
use planloop::tools::CapabilityRegistry;

/// Exit code for invalid arguments or configuration
const EXIT_USAGE: i32 = 2;

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("planloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("planloop.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Load the config file and apply command-line overrides; errors here are usage errors
fn load_config(cli: &Cli, overrides: Option<&OverrideArgs>) -> Result<Config> {
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(args) = overrides {
        config.apply(&RunOverrides::from(args));
    }
    config.validate()?;
    Ok(config)
}

fn run_application(cli: &Cli) -> Result<i32> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let overrides = match &cli.command {
        Commands::Run { overrides, .. } | Commands::Resume { overrides, .. } => Some(overrides),
        Commands::Inspect { .. } | Commands::Runs => None,
    };
    let config = match load_config(cli, overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            return Ok(EXIT_USAGE);
        }
    };

    match &cli.command {
        Commands::Run { goal, resume, .. } => handle_run_command(goal, resume.as_deref(), cli, &config),
        Commands::Resume { run_id, .. } => handle_resume_command(run_id, cli, &config),
        Commands::Inspect { run_id } => handle_inspect_command(run_id, &config),
        Commands::Runs => handle_runs_command(&config),
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn CheckpointStore>> {
    if config.storage.enabled {
        let store = SqliteCheckpointStore::open(&config.storage.db_path)
            .context(format!("Failed to open checkpoint store {}", config.storage.db_path.display()))?;
        Ok(Arc::new(store))
    } else {
        info!("Checkpoints disabled, keeping them in memory");
        Ok(Arc::new(MemoryCheckpointStore::new()))
    }
}

fn build_controller(config: &Config) -> Result<LoopController> {
    let model = AnthropicModel::new(config.llm.anthropic()).context("Failed to create language model")?;
    let registry = CapabilityRegistry::with_builtins(&config.capabilities.workspace, config.capabilities.max_output_bytes);
    let store = open_store(config)?;

    let mut renderer = PromptRenderer::new()?;
    if let Some(dir) = &config.prompts_dir {
        renderer = renderer
            .with_overrides(dir)
            .context(format!("Failed to load prompt overrides from {}", dir.display()))?;
    }

    let mut controller = LoopController::new(Arc::new(model), Arc::new(registry), store, config.loop_settings())?
        .with_renderer(renderer)
        .with_memory(Arc::new(JsonlMemory::new(&config.storage.memory_path)));
    if config.run_loop.human_checkpoint_enabled {
        controller = controller.with_gate(Arc::new(ConsoleGate::new()));
    }
    Ok(controller)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Upper bound on waiting for leftover tasks once a run has returned
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Cancel the controller's runs on Ctrl+C
fn spawn_interrupt_handler(controller: &LoopController) {
    let cancel = controller.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "Interrupted, stopping after the current step...".yellow());
            cancel.cancel();
        }
    });
}

fn handle_run_command(goal: &str, resume: Option<&str>, cli: &Cli, config: &Config) -> Result<i32> {
    info!("Running goal: {}", goal);
    if cli.is_verbose() {
        println!("{} {}", "Goal:".green(), goal);
    }
    let controller = build_controller(config)?;
    let rt = runtime()?;
    let run = rt.block_on(async {
        spawn_interrupt_handler(&controller);
        match resume {
            Some(run_id) => controller.start_with_id(run_id, goal).await,
            None => controller.start(goal).await,
        }
    });
    rt.shutdown_timeout(SHUTDOWN_GRACE);
    let run = run?;
    Ok(report(&run, cli))
}

fn handle_resume_command(run_id: &str, cli: &Cli, config: &Config) -> Result<i32> {
    info!("Resuming run: {}", run_id);
    if cli.is_verbose() {
        println!("{} {}", "Resuming:".green(), run_id);
    }
    let controller = build_controller(config)?;
    let rt = runtime()?;
    let run = rt.block_on(async {
        spawn_interrupt_handler(&controller);
        controller.resume(run_id).await
    });
    rt.shutdown_timeout(SHUTDOWN_GRACE);
    let run = run?;
    Ok(report(&run, cli))
}

/// Print the terminal status and return the process exit code
fn report(run: &Run, cli: &Cli) -> i32 {
    let status = match run.status {
        RunStatus::FinishedGoal | RunStatus::FinishedLimit => run.status.as_str().green(),
        RunStatus::Running => run.status.as_str().yellow(),
        RunStatus::FinishedError | RunStatus::AbortedByOperator => run.status.as_str().red(),
    };
    println!("{} {} ({} cycle(s))", "Run".bold(), run.id.cyan(), run.cycle);
    println!("{} {}", "Status:".bold(), status);

    if cli.is_verbose() {
        if let Some(summary) = run.last_reflection().and_then(|r| r.payload.summary.as_deref()) {
            println!("{} {}", "Summary:".bold(), summary);
        }
        println!("{} {}s", "Elapsed:".bold(), run.elapsed().as_secs());
    }
    if run.status == RunStatus::FinishedError {
        if let Some(detail) = &run.last_error {
            println!("{} {}", "Error:".red().bold(), detail);
        }
    }
    run.status.exit_code()
}

fn format_timestamp(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_summary(summary: &RunSummary) {
    println!("{} {}", "Run:".bold(), summary.id.cyan());
    println!("{} {}", "Goal:".bold(), summary.goal);
    println!("{} {}", "Status:".bold(), summary.status);
    println!("{} {}", "Cycles:".bold(), summary.cycle);
    println!("{} {}s", "Elapsed:".bold(), summary.elapsed_ms / 1000);
    println!("{} {}", "Created:".bold(), format_timestamp(summary.created_at));
    println!("{} {}", "Updated:".bold(), format_timestamp(summary.updated_at));
    if let Some(err) = &summary.last_error {
        println!("{} {}", "Last error:".bold(), err.red());
    }
}

fn handle_inspect_command(run_id: &str, config: &Config) -> Result<i32> {
    info!("Inspecting run: {}", run_id);
    let store = SqliteCheckpointStore::open(&config.storage.db_path).context("Failed to open checkpoint store")?;
    let Some(summary) = store.load_run(run_id)? else {
        eprintln!("{} no run recorded with id {}", "Error:".red().bold(), run_id);
        return Ok(1);
    };
    print_summary(&summary);

    let rows = store.load_rows(run_id)?;
    let mut current_cycle = 0;
    for row in &rows {
        let payload = &row.payload;
        if payload.cycle != current_cycle {
            current_cycle = payload.cycle;
            println!("\n{} {}: {}", "Cycle".bold(), current_cycle, payload.rationale);
        }
        let outcome = if payload.result.success {
            "ok".green()
        } else {
            "failed".red()
        };
        println!(
            "  [{}] step {} {} {}: {}",
            row.seq,
            payload.step.step_number,
            payload.step.capability.cyan(),
            outcome,
            payload.result.preview(80)
        );
        if let Some(reflection) = &payload.reflection {
            let decision = match &reflection.parse_error {
                Some(err) => format!("unparseable reflection ({})", err),
                None => format!("{:?}", reflection.payload.decision).to_lowercase(),
            };
            println!("  {} {}", "reflection:".yellow(), decision);
            if let Some(text) = &reflection.payload.summary {
                println!("    {}", text);
            }
        }
    }
    if rows.is_empty() {
        println!("\n{}", "No checkpoints recorded".dimmed());
    }
    Ok(0)
}

fn handle_runs_command(config: &Config) -> Result<i32> {
    let store = SqliteCheckpointStore::open(&config.storage.db_path).context("Failed to open checkpoint store")?;
    let runs = store.list_runs()?;
    if runs.is_empty() {
        println!("{}", "No runs recorded".dimmed());
        return Ok(0);
    }
    for run in runs {
        let status = if run.status.exit_code() == 0 {
            run.status.as_str().green()
        } else {
            run.status.as_str().red()
        };
        println!(
            "{}  {:<20}  cycles={:<3} {}  {}",
            run.id.cyan(),
            status,
            run.cycle,
            format_timestamp(run.updated_at),
            run.goal
        );
    }
    Ok(0)
}

fn main() {
    if let Err(e) = setup_logging() {
        eprintln!("{} failed to set up logging: {:#}", "Warning:".yellow(), e);
    }

    let cli = Cli::parse();
    info!("Starting with config from: {:?}", cli.config);

    let code = match run_application(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("Application failed: {:#}", e);
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}
