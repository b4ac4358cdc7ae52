//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start a new run for a goal (or resume one with --resume)
//! - resume: continue a run from its last complete cycle
//! - inspect: show a run's status, cycles and step results
//! - runs: list recorded runs

use clap::{Args, Parser, Subcommand};
use planloop::config::RunOverrides;
use std::path::PathBuf;

/// Planloop - an autonomous plan/execute/reflect task loop
#[derive(Parser, Debug)]
#[command(name = "planloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a run for a goal
    Run {
        /// Goal text
        goal: String,

        /// Resume this run id instead of starting fresh
        #[arg(long, value_name = "RUN_ID")]
        resume: Option<String>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Resume an interrupted run
    Resume {
        /// Run id to resume
        run_id: String,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Show a run's status, cycles and step results
    Inspect {
        /// Run id to inspect
        run_id: String,
    },

    /// List recorded runs
    Runs,
}

/// Loop overrides shared by `run` and `resume`
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Maximum number of cycles
    #[arg(long, value_name = "N")]
    pub max_iterations: Option<u32>,

    /// Wall-clock limit in minutes
    #[arg(long, value_name = "MIN")]
    pub time_limit: Option<u64>,

    /// Ask the operator to confirm every N cycles
    #[arg(long, value_name = "N")]
    pub checkpoint_interval: Option<u32>,

    /// Keep checkpoints in memory only
    #[arg(long)]
    pub no_checkpoint: bool,

    /// Never ask the operator to confirm
    #[arg(long)]
    pub no_human_checkpoint: bool,
}

impl From<&OverrideArgs> for RunOverrides {
    fn from(args: &OverrideArgs) -> Self {
        RunOverrides {
            max_iterations: args.max_iterations,
            time_limit_minutes: args.time_limit,
            checkpoint_interval: args.checkpoint_interval,
            no_checkpoint: args.no_checkpoint,
            no_human_checkpoint: args.no_human_checkpoint,
        }
    }
}
