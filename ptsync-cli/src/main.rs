//! ptsync — Provisional Temporary permit synchronization CLI.
//!
//! # Usage
//!
//! ```text
//! ptsync [--config settings.json] [--dry-run] [--skip-phase <n>]...
//!        [--phase-only <n>] [--verbose]
//! ```
//!
//! Exit codes: 0 success, 1 handled failure (initialization or workflow),
//! 2 user interrupt, 3 unhandled fatal error.

mod logging;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use colored::Colorize;
use tabled::{Table, Tabled};

use ptsync_engine::{Orchestrator, PhaseOutcome};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ptsync",
    version,
    about = "Synchronize PT permit layers across environments",
    long_about = None,
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, short = 'c', default_value = "settings.json")]
    config: PathBuf,

    /// Validate configuration and connections without modifying data.
    #[arg(long, short = 'd')]
    dry_run: bool,

    /// Skip specific phase(s); may be given multiple times.
    #[arg(long = "skip-phase", short = 's', value_name = "N")]
    skip_phase: Vec<u8>,

    /// Execute only the specified phase.
    #[arg(
        long = "phase-only",
        short = 'p',
        value_name = "N",
        conflicts_with = "skip_phase"
    )]
    phase_only: Option<u8>,

    /// Enable verbose logging.
    #[arg(long, short = 'v')]
    verbose: bool,
}

enum RunOutcome {
    Success,
    Failure,
    Interrupted,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(if cli.verbose { "debug" } else { "info" });

    match run(cli) {
        Ok(RunOutcome::Success) => {
            println!("{}", "✓ execution completed successfully".green());
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Failure) => {
            println!("{}", "✗ execution completed with errors — check logs".red());
            ExitCode::from(1)
        }
        Ok(RunOutcome::Interrupted) => {
            eprintln!("{}", "execution interrupted by user".yellow());
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("{} {err:#}", "fatal error:".red());
            ExitCode::from(3)
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

fn run(cli: Cli) -> anyhow::Result<RunOutcome> {
    let started = Instant::now();
    let run_date = chrono::Local::now().date_naive();

    let mut orchestrator = match Orchestrator::initialize(&cli.config, run_date) {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            eprintln!("initialization failed: {err}");
            return Ok(RunOutcome::Failure);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let finished = runtime.block_on(async {
        tokio::select! {
            success = drive(&mut orchestrator, &cli) => Some(success),
            _ = tokio::signal::ctrl_c() => None,
        }
    });

    let Some(success) = finished else {
        return Ok(RunOutcome::Interrupted);
    };

    orchestrator.cleanup_and_finalize(started);
    if !cli.dry_run {
        print_results(orchestrator.results());
    }

    Ok(if success {
        RunOutcome::Success
    } else {
        RunOutcome::Failure
    })
}

async fn drive(orchestrator: &mut Orchestrator, cli: &Cli) -> bool {
    if cli.dry_run {
        orchestrator.dry_run().await
    } else if let Some(number) = cli.phase_only {
        orchestrator.execute_phase_only(number).await
    } else {
        orchestrator.execute_full_workflow(&cli.skip_phase).await
    }
}

// ---------------------------------------------------------------------------
// Result table
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Operations")]
    operations: usize,
    #[tabled(rename = "Status")]
    status: String,
}

fn print_results(results: &BTreeMap<String, PhaseOutcome>) {
    if results.is_empty() {
        return;
    }
    let rows: Vec<PhaseRow> = results
        .iter()
        .map(|(key, outcome)| PhaseRow {
            step: key.clone(),
            operations: outcome.operations.len(),
            status: if outcome.success() {
                "ok".green().to_string()
            } else {
                "failed".red().to_string()
            },
        })
        .collect();
    println!("{}", Table::new(rows));
}
