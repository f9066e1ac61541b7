//! CLI command definitions using clap.

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Scenarist - declarative scenario execution controller
#[derive(Parser, Debug)]
#[command(name = "scenarist")]
#[command(version)]
#[command(about = "Run scenario jobs once, then check that monitors saw them")]
#[command(
    long_about = "Scenarist reconciles Scenario resources: it builds a job from the scenario's templates, waits for it to finish, and evaluates the scenario's expectations against live monitors."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the job descriptor a scenario manifest would produce
    Render {
        /// Scenario manifest (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,

        /// Reconciler config (TOML) supplying the job name prefix
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Query a Datadog monitor once and compare its state
    Check {
        /// Numeric monitor ID
        #[arg(short, long)]
        monitor_id: String,

        /// Expected overall state, e.g. Alert or OK
        #[arg(short, long)]
        expect: String,

        /// Bound on the query, e.g. 30s or 1m
        #[arg(short, long, default_value = "30s")]
        timeout: String,
    },

    /// Reconcile a manifest against in-memory collaborators
    Simulate {
        /// Scenario manifest (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,

        /// Reconciler config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// How the simulated job ends
        #[arg(long, value_enum, default_value_t = SimulatedOutcome::Complete)]
        outcome: SimulatedOutcome,

        /// Polls that observe the job as still running
        #[arg(long, default_value_t = 1)]
        running_polls: u32,

        /// State every referenced monitor reports
        #[arg(long, default_value = "Alert")]
        monitor_state: String,

        /// Request deletion afterwards and run the finalizer
        #[arg(long, default_value_t = false)]
        delete: bool,
    },
}

/// Terminal condition of a simulated job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimulatedOutcome {
    Complete,
    Fail,
}
